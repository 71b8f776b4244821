// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory address space.
//!
//! The address space is a tree of nodes keyed by [`NodeId`]. Variable nodes
//! carry a current [`DataValue`] guarded by a per-node lock, so writes to one
//! node serialize while writes to different nodes proceed independently.
//!
//! Every successful [`AddressSpace::set_value`] is reported to the registered
//! [`ChangeObserver`]s while the node lock is still held. Observers therefore
//! see writes to a node in the order they were applied.
//!
//! # Examples
//!
//! ```
//! use uaperf_core::address_space::AddressSpace;
//! use uaperf_core::types::{NodeId, QualifiedName, Value};
//!
//! let space = AddressSpace::new();
//! let var = NodeId::string(2, "Counter");
//! space
//!     .add_variable(&NodeId::OBJECTS_FOLDER, var.clone(), QualifiedName::new(2, "Counter"), Value::Int32(0))
//!     .unwrap();
//!
//! space.set_value(&var, Value::Int32(5)).unwrap();
//! assert_eq!(space.read_value(&var).unwrap().value, Value::Int32(5));
//!
//! let node = space.get_node(&QualifiedName::path(["Objects", "2:Counter"])).unwrap();
//! assert_eq!(node.node_id, var);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{AddressSpaceError, UaResult};
use crate::types::{DataValue, NodeClass, NodeId, QualifiedName, Value};

// =============================================================================
// ChangeObserver
// =============================================================================

/// Receives every successful value write.
///
/// Called synchronously from inside `set_value` with the node lock held.
/// Implementations must not write to the address space and should only
/// enqueue work.
pub trait ChangeObserver: Send + Sync {
    /// A value was written to `node_id`.
    fn on_value_written(&self, node_id: &NodeId, value: &DataValue);
}

// =============================================================================
// Node
// =============================================================================

/// Snapshot of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node id.
    pub node_id: NodeId,
    /// Browse name.
    pub browse_name: QualifiedName,
    /// Object or Variable.
    pub node_class: NodeClass,
    /// Current value (Variable nodes only).
    pub value: Option<DataValue>,
    /// Child ids in insertion order.
    pub children: Vec<NodeId>,
}

impl Node {
    /// Returns `true` if the node carries a value.
    pub fn is_variable(&self) -> bool {
        self.node_class == NodeClass::Variable
    }
}

struct NodeEntry {
    node_id: NodeId,
    browse_name: QualifiedName,
    value: Option<Mutex<DataValue>>,
    children: RwLock<Vec<NodeId>>,
}

impl NodeEntry {
    fn node_class(&self) -> NodeClass {
        if self.value.is_some() {
            NodeClass::Variable
        } else {
            NodeClass::Object
        }
    }

    fn snapshot(&self) -> Node {
        Node {
            node_id: self.node_id.clone(),
            browse_name: self.browse_name.clone(),
            node_class: self.node_class(),
            value: self.value.as_ref().map(|slot| slot.lock().clone()),
            children: self.children.read().clone(),
        }
    }
}

// =============================================================================
// SourceClock
// =============================================================================

/// Strictly increasing timestamps at microsecond resolution.
#[derive(Debug, Default)]
struct SourceClock {
    last_micros: AtomicI64,
}

impl SourceClock {
    fn next(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let previous = self
            .last_micros
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        let stamp = now.max(previous + 1);
        DateTime::from_timestamp_micros(stamp).unwrap_or_else(Utc::now)
    }
}

// =============================================================================
// AddressSpace
// =============================================================================

/// Hierarchical, typed node store.
pub struct AddressSpace {
    nodes: RwLock<HashMap<NodeId, Arc<NodeEntry>>>,
    observers: RwLock<Vec<Weak<dyn ChangeObserver>>>,
    clock: SourceClock,
    writes: AtomicU64,
}

impl AddressSpace {
    /// Creates an address space with the standard folders:
    /// `Root`, `Root/Objects`, `Root/Types`, `Root/Views` and
    /// `Root/Objects/Server`.
    pub fn new() -> Self {
        let space = Self {
            nodes: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            clock: SourceClock::default(),
            writes: AtomicU64::new(0),
        };
        space.insert_root();
        space.bootstrap();
        space
    }

    fn bootstrap(&self) {
        let standard = [
            (NodeId::ROOT_FOLDER, NodeId::OBJECTS_FOLDER, "Objects"),
            (NodeId::ROOT_FOLDER, NodeId::TYPES_FOLDER, "Types"),
            (NodeId::ROOT_FOLDER, NodeId::VIEWS_FOLDER, "Views"),
            (NodeId::OBJECTS_FOLDER, NodeId::SERVER, "Server"),
        ];
        for (parent, id, name) in standard {
            // Fresh map, these cannot collide.
            let _ = self.add_object(&parent, id, QualifiedName::new(0, name));
        }
    }

    fn insert_root(&self) {
        let root = Arc::new(NodeEntry {
            node_id: NodeId::ROOT_FOLDER,
            browse_name: QualifiedName::new(0, "Root"),
            value: None,
            children: RwLock::new(Vec::new()),
        });
        self.nodes.write().insert(NodeId::ROOT_FOLDER, root);
    }

    // =========================================================================
    // Node creation
    // =========================================================================

    /// Adds a node under `parent`.
    ///
    /// A node with an initial value is a Variable, otherwise an Object.
    ///
    /// # Errors
    ///
    /// - `DuplicateNodeId` if `node_id` exists
    /// - `ParentNotFound` if `parent` does not exist
    pub fn add_node(
        &self,
        parent: &NodeId,
        node_id: NodeId,
        browse_name: QualifiedName,
        initial_value: Option<Value>,
    ) -> UaResult<Node> {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&node_id) {
            return Err(AddressSpaceError::duplicate_node_id(&node_id).into());
        }
        let parent_entry = nodes
            .get(parent)
            .cloned()
            .ok_or_else(|| AddressSpaceError::parent_not_found(parent))?;

        let value = initial_value.map(|v| DataValue::new(v, self.clock.next()));
        let entry = Arc::new(NodeEntry {
            node_id: node_id.clone(),
            browse_name,
            value: value.map(Mutex::new),
            children: RwLock::new(Vec::new()),
        });
        let node = entry.snapshot();
        nodes.insert(node_id.clone(), entry);
        parent_entry.children.write().push(node_id);

        debug!(node_id = %node.node_id, parent = %parent, class = %node.node_class, "Node added");
        Ok(node)
    }

    /// Adds an Object node.
    pub fn add_object(
        &self,
        parent: &NodeId,
        node_id: NodeId,
        browse_name: QualifiedName,
    ) -> UaResult<Node> {
        self.add_node(parent, node_id, browse_name, None)
    }

    /// Adds a Variable node with an initial value.
    pub fn add_variable(
        &self,
        parent: &NodeId,
        node_id: NodeId,
        browse_name: QualifiedName,
        initial_value: Value,
    ) -> UaResult<Node> {
        self.add_node(parent, node_id, browse_name, Some(initial_value))
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    fn entry(&self, node_id: &NodeId) -> Option<Arc<NodeEntry>> {
        self.nodes.read().get(node_id).cloned()
    }

    /// Resolves a path relative to Root by exact browse name match at each
    /// level. An empty path resolves to Root.
    ///
    /// # Errors
    ///
    /// `PathNotFound` naming the full path if any segment is missing.
    pub fn get_node(&self, path: &[QualifiedName]) -> UaResult<Node> {
        let not_found = || AddressSpaceError::path_not_found(QualifiedName::join(path));

        let nodes = self.nodes.read();
        let mut current = nodes.get(&NodeId::ROOT_FOLDER).cloned().ok_or_else(not_found)?;
        for segment in path {
            let next = current
                .children
                .read()
                .iter()
                .filter_map(|id| nodes.get(id))
                .find(|child| &child.browse_name == segment)
                .cloned()
                .ok_or_else(not_found)?;
            current = next;
        }
        drop(nodes);

        trace!(path = %QualifiedName::join(path), node_id = %current.node_id, "Path resolved");
        Ok(current.snapshot())
    }

    /// Returns a snapshot of the node.
    pub fn node(&self, node_id: &NodeId) -> UaResult<Node> {
        self.entry(node_id)
            .map(|entry| entry.snapshot())
            .ok_or_else(|| AddressSpaceError::node_not_found(node_id).into())
    }

    /// Returns snapshots of the node's children in insertion order.
    pub fn children(&self, node_id: &NodeId) -> UaResult<Vec<Node>> {
        let entry = self
            .entry(node_id)
            .ok_or_else(|| AddressSpaceError::node_not_found(node_id))?;
        let ids = entry.children.read().clone();
        Ok(ids
            .iter()
            .filter_map(|id| self.entry(id))
            .map(|child| child.snapshot())
            .collect())
    }

    /// Returns the node class, or `None` for an unknown id.
    pub fn node_class(&self, node_id: &NodeId) -> Option<NodeClass> {
        self.entry(node_id).map(|entry| entry.node_class())
    }

    /// Returns `true` if a node with this id exists.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.read().contains_key(node_id)
    }

    /// Number of nodes, including the standard folders.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Always `false`: Root exists from construction.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Reads the current value of a variable.
    pub fn read_value(&self, node_id: &NodeId) -> UaResult<DataValue> {
        let entry = self
            .entry(node_id)
            .ok_or_else(|| AddressSpaceError::node_not_found(node_id))?;
        let slot = entry
            .value
            .as_ref()
            .ok_or_else(|| AddressSpaceError::not_a_variable(node_id))?;
        let current = slot.lock().clone();
        Ok(current)
    }

    /// Writes a new value and notifies observers before returning.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` for an unknown id
    /// - `NotAVariable` if the node has no value slot
    /// - `TypeMismatch` if the tag (or array length) differs from the stored value
    pub fn set_value(&self, node_id: &NodeId, value: Value) -> UaResult<DataValue> {
        let entry = self
            .entry(node_id)
            .ok_or_else(|| AddressSpaceError::node_not_found(node_id))?;
        let slot = entry
            .value
            .as_ref()
            .ok_or_else(|| AddressSpaceError::not_a_variable(node_id))?;

        let mut current = slot.lock();
        if !current.value.same_type(&value) {
            return Err(AddressSpaceError::type_mismatch(
                node_id,
                current.value.type_name(),
                value.type_name(),
            )
            .into());
        }

        *current = DataValue::new(value, self.clock.next());
        self.writes.fetch_add(1, Ordering::Relaxed);

        for observer in self.observers.read().iter().filter_map(Weak::upgrade) {
            observer.on_value_written(node_id, &current);
        }

        Ok(current.clone())
    }

    /// Total successful writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Registers a change observer. Dropped observers are pruned lazily.
    pub fn register_observer(&self, observer: Weak<dyn ChangeObserver>) {
        let mut observers = self.observers.write();
        observers.retain(|o| o.strong_count() > 0);
        observers.push(observer);
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .iter()
            .filter(|o| o.strong_count() > 0)
            .count()
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("nodes", &self.len())
            .field("observers", &self.observer_count())
            .field("writes", &self.write_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
