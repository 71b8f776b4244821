// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server-side subscription engine.
//!
//! # Architecture
//!
//! ```text
//! AddressSpace::set_value ──▶ on_value_written ──┐
//!                                                 │  data index (node → items)
//! SubscriptionEngine::trigger_event ─────────────┤  event index (notifier → items)
//!                                                 ▼
//!                                  ┌────────────────────────────┐
//!                                  │ ServerSubscription (FIFO)  │ one per subscription
//!                                  └────────────────────────────┘
//!                                                 │ Notify
//!                                                 ▼
//!                                  publisher task ──▶ NotificationTransport
//! ```
//!
//! Change detection runs synchronously on the writer's thread and only
//! appends to the subscription queue. Each subscription owns one publisher
//! task that drains its queue into batches, at most once per publishing
//! interval, and hands them to the transport in order.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use uaperf_core::address_space::{AddressSpace, ChangeObserver};
use uaperf_core::error::{AddressSpaceError, SubscriptionError, UaResult};
use uaperf_core::types::{AttributeId, DataValue, Event, EventFilter, NodeClass, NodeId};

use crate::notification::{MonitoredItemHandle, NotificationBatch, NotificationEntry, SubscriptionId};

use super::transport::NotificationTransport;

// =============================================================================
// Subscription State
// =============================================================================

/// Lifecycle of a subscription: `Created → Active → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Registered, publisher not yet running.
    #[default]
    Created,

    /// Receiving and publishing notifications.
    Active,

    /// Terminal. Items and pending entries are discarded.
    Closed,
}

impl SubscriptionState {
    /// Returns `true` if the subscription accepts operations.
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns `true` if the subscription is in a terminal state.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Active => write!(f, "Active"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Monitored Item
// =============================================================================

/// A registration linking a subscription to a node attribute.
///
/// Items are never mutated, only added or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredItem {
    /// Handle, unique within the subscription.
    pub handle: MonitoredItemHandle,
    /// Variable (data change) or notifier (events).
    pub node_id: NodeId,
    /// Monitored attribute.
    pub attribute: AttributeId,
    /// Event filter for event items.
    pub filter: Option<EventFilter>,
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters for one subscription.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    notifications_queued: AtomicU64,
    notifications_published: AtomicU64,
    batches_published: AtomicU64,
    delivery_failures: AtomicU64,
}

impl SubscriptionStats {
    /// Returns a point-in-time copy.
    pub fn snapshot(&self) -> SubscriptionStatsSnapshot {
        SubscriptionStatsSnapshot {
            notifications_queued: self.notifications_queued.load(Ordering::Relaxed),
            notifications_published: self.notifications_published.load(Ordering::Relaxed),
            batches_published: self.batches_published.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`SubscriptionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionStatsSnapshot {
    /// Entries appended by change detection.
    pub notifications_queued: u64,
    /// Entries handed to the transport.
    pub notifications_published: u64,
    /// Batches handed to the transport.
    pub batches_published: u64,
    /// Batches the transport rejected.
    pub delivery_failures: u64,
}

/// Engine-wide counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    subscriptions_created: AtomicU64,
    subscriptions_closed: AtomicU64,
    notifications_queued: AtomicU64,
    batches_published: AtomicU64,
    delivery_failures: AtomicU64,
    events_triggered: AtomicU64,
}

impl EngineStats {
    /// Total subscriptions created.
    pub fn subscriptions_created(&self) -> u64 {
        self.subscriptions_created.load(Ordering::Relaxed)
    }

    /// Total subscriptions closed.
    pub fn subscriptions_closed(&self) -> u64 {
        self.subscriptions_closed.load(Ordering::Relaxed)
    }

    /// Total entries queued across subscriptions.
    pub fn notifications_queued(&self) -> u64 {
        self.notifications_queued.load(Ordering::Relaxed)
    }

    /// Total batches delivered.
    pub fn batches_published(&self) -> u64 {
        self.batches_published.load(Ordering::Relaxed)
    }

    /// Total failed deliveries.
    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }

    /// Total events triggered.
    pub fn events_triggered(&self) -> u64 {
        self.events_triggered.load(Ordering::Relaxed)
    }
}

// =============================================================================
// ServerSubscription
// =============================================================================

struct ServerSubscription {
    id: SubscriptionId,
    publishing_interval: Duration,
    state: RwLock<SubscriptionState>,
    // Mirrors `state == Closed` for the detection path, which must not take
    // the state lock.
    closed: AtomicBool,
    items: Mutex<HashMap<MonitoredItemHandle, MonitoredItem>>,
    queue: Mutex<VecDeque<NotificationEntry>>,
    wakeup: Notify,
    next_handle: AtomicU32,
    sequence: AtomicU32,
    stats: SubscriptionStats,
}

impl ServerSubscription {
    fn new(id: SubscriptionId, publishing_interval: Duration) -> Self {
        Self {
            id,
            publishing_interval,
            state: RwLock::new(SubscriptionState::Created),
            closed: AtomicBool::new(false),
            items: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            next_handle: AtomicU32::new(1),
            sequence: AtomicU32::new(0),
            stats: SubscriptionStats::default(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn allocate_handle(&self) -> MonitoredItemHandle {
        MonitoredItemHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Appends an entry and wakes the publisher. Returns `false` if closed.
    fn enqueue(&self, entry: NotificationEntry) -> bool {
        {
            let mut queue = self.queue.lock();
            if self.is_closed() {
                return false;
            }
            queue.push_back(entry);
        }
        self.stats.notifications_queued.fetch_add(1, Ordering::Relaxed);
        self.wakeup.notify_one();
        true
    }

    /// Drains the queue into a batch, dropping entries for items removed
    /// since they were queued.
    fn take_batch(&self) -> Option<NotificationBatch> {
        let drained: Vec<NotificationEntry> = self.queue.lock().drain(..).collect();
        if drained.is_empty() {
            return None;
        }

        let entries: Vec<NotificationEntry> = {
            let items = self.items.lock();
            drained
                .into_iter()
                .filter(|entry| items.contains_key(&entry.handle()))
                .collect()
        };
        if entries.is_empty() {
            return None;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Some(NotificationBatch::new(self.id, sequence, entries))
    }
}

struct IndexedItem {
    subscription: Arc<ServerSubscription>,
    handle: MonitoredItemHandle,
    filter: EventFilter,
}

type ItemIndex = RwLock<HashMap<NodeId, Vec<IndexedItem>>>;

fn remove_indexed(index: &ItemIndex, node_id: &NodeId, id: SubscriptionId, handle: MonitoredItemHandle) {
    let mut index = index.write();
    if let Some(items) = index.get_mut(node_id) {
        items.retain(|item| !(item.subscription.id == id && item.handle == handle));
        if items.is_empty() {
            index.remove(node_id);
        }
    }
}

// =============================================================================
// SubscriptionEngine
// =============================================================================

/// Registry of subscriptions and their monitored items.
///
/// Created with [`SubscriptionEngine::new`], which registers the engine as
/// a change observer of the address space.
pub struct SubscriptionEngine {
    address_space: Arc<AddressSpace>,
    subscriptions: DashMap<SubscriptionId, Arc<ServerSubscription>>,
    data_index: ItemIndex,
    event_index: ItemIndex,
    next_subscription_id: AtomicU32,
    stats: Arc<EngineStats>,
}

impl SubscriptionEngine {
    /// Creates an engine observing `address_space`.
    pub fn new(address_space: Arc<AddressSpace>) -> Arc<Self> {
        let engine = Arc::new(Self {
            address_space,
            subscriptions: DashMap::new(),
            data_index: RwLock::new(HashMap::new()),
            event_index: RwLock::new(HashMap::new()),
            next_subscription_id: AtomicU32::new(1),
            stats: Arc::new(EngineStats::default()),
        });
        let observer: Weak<dyn ChangeObserver> = Arc::downgrade(&engine) as Weak<dyn ChangeObserver>;
        engine.address_space.register_observer(observer);
        engine
    }

    /// The observed address space.
    pub fn address_space(&self) -> &Arc<AddressSpace> {
        &self.address_space
    }

    /// Engine-wide counters.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    fn subscription(&self, id: SubscriptionId) -> UaResult<Arc<ServerSubscription>> {
        match self.subscriptions.get(&id) {
            Some(entry) => Ok(Arc::clone(entry.value())),
            None if self.was_issued(id) => Err(SubscriptionError::closed(id.value()).into()),
            None => Err(SubscriptionError::not_found(id.value()).into()),
        }
    }

    /// Ids are sequential and never reused, so an issued id missing from
    /// the map belongs to a closed subscription.
    fn was_issued(&self, id: SubscriptionId) -> bool {
        id.value() != 0 && id.value() < self.next_subscription_id.load(Ordering::Acquire)
    }

    // =========================================================================
    // Subscription lifecycle
    // =========================================================================

    /// Creates an active subscription and spawns its publisher task.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_subscription(
        self: &Arc<Self>,
        publishing_interval: Duration,
        transport: Arc<dyn NotificationTransport>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Arc::new(ServerSubscription::new(id, publishing_interval));
        self.subscriptions.insert(id, Arc::clone(&subscription));

        tokio::spawn(run_publisher(
            Arc::clone(&subscription),
            transport,
            Arc::downgrade(self),
            Arc::clone(&self.stats),
        ));
        *subscription.state.write() = SubscriptionState::Active;

        self.stats.subscriptions_created.fetch_add(1, Ordering::Relaxed);
        info!(
            subscription_id = %id,
            publishing_interval_ms = publishing_interval.as_millis() as u64,
            "Subscription created"
        );
        id
    }

    /// Closes a subscription, discarding its items and pending entries.
    ///
    /// The engine releases the subscription; only its id keeps answering
    /// with `SubscriptionClosed`.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` for an unknown id
    /// - `SubscriptionClosed` if already closed
    pub fn close_subscription(&self, id: SubscriptionId) -> UaResult<()> {
        let subscription = self.subscription(id)?;
        {
            let mut state = subscription.state.write();
            if state.is_terminal() {
                return Err(SubscriptionError::closed(id.value()).into());
            }
            *state = SubscriptionState::Closed;
            subscription.closed.store(true, Ordering::Release);
        }
        self.subscriptions.remove(&id);

        let items: Vec<MonitoredItem> = subscription
            .items
            .lock()
            .drain()
            .map(|(_, item)| item)
            .collect();
        for item in &items {
            self.remove_from_index(id, item);
        }
        let discarded = {
            let mut queue = subscription.queue.lock();
            let discarded = queue.len();
            queue.clear();
            discarded
        };
        subscription.wakeup.notify_one();

        self.stats.subscriptions_closed.fetch_add(1, Ordering::Relaxed);
        info!(
            subscription_id = %id,
            items = items.len(),
            discarded,
            "Subscription closed"
        );
        Ok(())
    }

    /// Closes every active subscription. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let active: Vec<SubscriptionId> = self
            .subscriptions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| *entry.key())
            .collect();
        active
            .into_iter()
            .filter(|id| self.close_subscription(*id).is_ok())
            .count()
    }

    // =========================================================================
    // Monitored items
    // =========================================================================

    /// Monitors the value of a variable node.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` / `SubscriptionClosed`
    /// - `NodeNotFound` for an unknown node
    /// - `NotSubscribable` if the node has no value
    pub fn subscribe_data_change(
        &self,
        id: SubscriptionId,
        node_id: &NodeId,
    ) -> UaResult<MonitoredItemHandle> {
        let subscription = self.subscription(id)?;
        let state = subscription.state.read();
        if state.is_terminal() {
            return Err(SubscriptionError::closed(id.value()).into());
        }

        match self.address_space.node_class(node_id) {
            None => return Err(AddressSpaceError::node_not_found(node_id).into()),
            Some(NodeClass::Object) => return Err(SubscriptionError::not_subscribable(node_id).into()),
            Some(NodeClass::Variable) => {}
        }

        let handle = subscription.allocate_handle();
        subscription.items.lock().insert(
            handle,
            MonitoredItem {
                handle,
                node_id: node_id.clone(),
                attribute: AttributeId::Value,
                filter: None,
            },
        );
        self.data_index
            .write()
            .entry(node_id.clone())
            .or_default()
            .push(IndexedItem {
                subscription: Arc::clone(&subscription),
                handle,
                filter: EventFilter::default(),
            });
        drop(state);

        debug!(subscription_id = %id, handle = %handle, node_id = %node_id, "Data change item created");
        Ok(handle)
    }

    /// Monitors events of a notifier node (the Server node by default).
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` / `SubscriptionClosed`
    /// - `NodeNotFound` for an unknown notifier
    /// - `InvalidSeverity` for a filter with an out-of-range minimum
    pub fn subscribe_events(
        &self,
        id: SubscriptionId,
        notifier: Option<NodeId>,
        filter: Option<EventFilter>,
    ) -> UaResult<MonitoredItemHandle> {
        let subscription = self.subscription(id)?;
        let state = subscription.state.read();
        if state.is_terminal() {
            return Err(SubscriptionError::closed(id.value()).into());
        }

        let notifier = notifier.unwrap_or(NodeId::SERVER);
        if !self.address_space.contains(&notifier) {
            return Err(AddressSpaceError::node_not_found(&notifier).into());
        }
        let filter = filter.unwrap_or_default();
        filter.validate()?;

        let handle = subscription.allocate_handle();
        subscription.items.lock().insert(
            handle,
            MonitoredItem {
                handle,
                node_id: notifier.clone(),
                attribute: AttributeId::EventNotifier,
                filter: Some(filter.clone()),
            },
        );
        self.event_index
            .write()
            .entry(notifier.clone())
            .or_default()
            .push(IndexedItem {
                subscription: Arc::clone(&subscription),
                handle,
                filter,
            });
        drop(state);

        debug!(subscription_id = %id, handle = %handle, notifier = %notifier, "Event item created");
        Ok(handle)
    }

    /// Removes a monitored item. Entries already queued for it are dropped.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` / `SubscriptionClosed`
    /// - `UnknownHandle` if the handle is not (or no longer) registered
    pub fn unsubscribe(&self, id: SubscriptionId, handle: MonitoredItemHandle) -> UaResult<()> {
        let subscription = self.subscription(id)?;
        let state = subscription.state.read();
        if state.is_terminal() {
            return Err(SubscriptionError::closed(id.value()).into());
        }

        let item = subscription
            .items
            .lock()
            .remove(&handle)
            .ok_or_else(|| SubscriptionError::unknown_handle(id.value(), handle.value()))?;
        self.remove_from_index(id, &item);
        drop(state);

        debug!(subscription_id = %id, handle = %handle, "Monitored item removed");
        Ok(())
    }

    fn remove_from_index(&self, id: SubscriptionId, item: &MonitoredItem) {
        let index = match item.attribute {
            AttributeId::Value => &self.data_index,
            AttributeId::EventNotifier => &self.event_index,
        };
        remove_indexed(index, &item.node_id, id, item.handle);
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Reports an event to every event item whose notifier is the event's
    /// source node and whose filter accepts it. Returns the number of
    /// entries queued.
    pub fn trigger_event(&self, event: &Event) -> usize {
        self.stats.events_triggered.fetch_add(1, Ordering::Relaxed);

        let index = self.event_index.read();
        let Some(items) = index.get(&event.source_node) else {
            return 0;
        };

        let mut queued = 0;
        for item in items.iter().filter(|item| item.filter.accepts(event)) {
            let entry = NotificationEntry::Event {
                handle: item.handle,
                event: event.clone(),
            };
            if item.subscription.enqueue(entry) {
                queued += 1;
            }
        }
        self.stats
            .notifications_queued
            .fetch_add(queued as u64, Ordering::Relaxed);
        queued
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Number of subscriptions held by the engine. Closed subscriptions are
    /// released, so this is the number of open ones.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .count()
    }

    /// Current state, or `None` for an id this engine never issued.
    pub fn state(&self, id: SubscriptionId) -> Option<SubscriptionState> {
        match self.subscriptions.get(&id) {
            Some(entry) => Some(*entry.value().state.read()),
            None if self.was_issued(id) => Some(SubscriptionState::Closed),
            None => None,
        }
    }

    /// Number of items currently owned by the subscription.
    pub fn monitored_item_count(&self, id: SubscriptionId) -> UaResult<usize> {
        Ok(self.subscription(id)?.items.lock().len())
    }

    /// Items currently owned by the subscription, ordered by handle.
    pub fn monitored_items(&self, id: SubscriptionId) -> UaResult<Vec<MonitoredItem>> {
        let subscription = self.subscription(id)?;
        let mut items: Vec<MonitoredItem> = subscription.items.lock().values().cloned().collect();
        items.sort_by_key(|item| item.handle);
        Ok(items)
    }

    /// Counters of one subscription.
    pub fn subscription_stats(&self, id: SubscriptionId) -> UaResult<SubscriptionStatsSnapshot> {
        Ok(self.subscription(id)?.stats.snapshot())
    }
}

impl ChangeObserver for SubscriptionEngine {
    fn on_value_written(&self, node_id: &NodeId, value: &DataValue) {
        let index = self.data_index.read();
        let Some(items) = index.get(node_id) else {
            return;
        };

        let mut queued = 0u64;
        for item in items {
            let entry = NotificationEntry::DataChange {
                handle: item.handle,
                node_id: node_id.clone(),
                attribute: AttributeId::Value,
                value: value.clone(),
            };
            if item.subscription.enqueue(entry) {
                queued += 1;
            }
        }
        self.stats
            .notifications_queued
            .fetch_add(queued, Ordering::Relaxed);
    }
}

impl fmt::Debug for SubscriptionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("subscriptions", &self.subscription_count())
            .field("notifications_queued", &self.stats.notifications_queued())
            .finish()
    }
}

// =============================================================================
// Publisher
// =============================================================================

async fn run_publisher(
    subscription: Arc<ServerSubscription>,
    transport: Arc<dyn NotificationTransport>,
    engine: Weak<SubscriptionEngine>,
    stats: Arc<EngineStats>,
) {
    let id = subscription.id;
    let interval = subscription.publishing_interval;
    let mut last_publish: Option<Instant> = None;

    loop {
        subscription.wakeup.notified().await;
        if subscription.is_closed() {
            break;
        }

        if let Some(last) = last_publish {
            if !interval.is_zero() {
                tokio::time::sleep_until(last + interval).await;
            }
        }
        if subscription.is_closed() {
            break;
        }

        let Some(batch) = subscription.take_batch() else {
            continue;
        };
        last_publish = Some(Instant::now());

        let entries = batch.len() as u64;
        let sequence = batch.sequence_number;
        match transport.deliver(id, batch).await {
            Ok(()) => {
                subscription.stats.batches_published.fetch_add(1, Ordering::Relaxed);
                subscription
                    .stats
                    .notifications_published
                    .fetch_add(entries, Ordering::Relaxed);
                stats.batches_published.fetch_add(1, Ordering::Relaxed);
                trace!(subscription_id = %id, sequence, entries, "Batch published");
            }
            Err(e) => {
                subscription.stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                warn!(subscription_id = %id, sequence, entries, error = %e, "Batch dropped");

                if !transport.is_connected() {
                    if let Some(engine) = engine.upgrade() {
                        // Losing the race against an explicit close is fine.
                        let _ = engine.close_subscription(id);
                    }
                    break;
                }
            }
        }
    }

    debug!(subscription_id = %id, "Publisher stopped");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::transport::LocalTransport;
    use tokio::sync::mpsc;
    use uaperf_core::error::UaError;
    use uaperf_core::types::{QualifiedName, Value};

    fn setup() -> (Arc<AddressSpace>, Arc<SubscriptionEngine>, NodeId) {
        let space = Arc::new(AddressSpace::new());
        let var = NodeId::string(2, "perfTestVar");
        space
            .add_variable(
                &NodeId::OBJECTS_FOLDER,
                var.clone(),
                QualifiedName::new(2, "perfTestVar"),
                Value::Int32(0),
            )
            .unwrap();
        let engine = SubscriptionEngine::new(Arc::clone(&space));
        (space, engine, var)
    }

    fn local(engine: &Arc<SubscriptionEngine>, interval: Duration) -> (SubscriptionId, mpsc::UnboundedReceiver<NotificationBatch>) {
        let (transport, inbox) = LocalTransport::with_inbox();
        let id = engine.create_subscription(interval, Arc::new(transport));
        (id, inbox)
    }

    async fn collect(inbox: &mut mpsc::UnboundedReceiver<NotificationBatch>, expected: usize) -> Vec<NotificationEntry> {
        let mut entries = Vec::new();
        while entries.len() < expected {
            let batch = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
                .await
                .expect("timed out waiting for batch")
                .expect("inbox closed");
            assert!(!batch.is_empty());
            entries.extend(batch.entries);
        }
        entries
    }

    fn values(entries: &[NotificationEntry]) -> Vec<i32> {
        entries
            .iter()
            .filter_map(|e| match e {
                NotificationEntry::DataChange { value, .. } => value.value.as_i32(),
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // Data change
    // =========================================================================

    #[tokio::test]
    async fn test_writes_in_order() {
        let (space, engine, var) = setup();
        let (id, mut inbox) = local(&engine, Duration::ZERO);
        engine.subscribe_data_change(id, &var).unwrap();

        for i in 0..5 {
            space.set_value(&var, Value::Int32(i)).unwrap();
        }

        let entries = collect(&mut inbox, 5).await;
        assert_eq!(values(&entries), vec![0, 1, 2, 3, 4]);
        assert_eq!(engine.stats().notifications_queued(), 5);
    }

    #[tokio::test]
    async fn test_entries_carry_source_timestamps() {
        let (space, engine, var) = setup();
        let (id, mut inbox) = local(&engine, Duration::ZERO);
        engine.subscribe_data_change(id, &var).unwrap();

        let written = space.set_value(&var, Value::Int32(9)).unwrap();
        let entries = collect(&mut inbox, 1).await;
        match &entries[0] {
            NotificationEntry::DataChange { value, attribute, .. } => {
                assert_eq!(value, &written);
                assert_eq!(*attribute, AttributeId::Value);
            }
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batches_respect_interval() {
        let (space, engine, var) = setup();
        let (id, mut inbox) = local(&engine, Duration::from_millis(50));
        engine.subscribe_data_change(id, &var).unwrap();

        space.set_value(&var, Value::Int32(1)).unwrap();
        let first = inbox.recv().await.unwrap();
        let first_at = std::time::Instant::now();

        for i in 2..=10 {
            space.set_value(&var, Value::Int32(i)).unwrap();
        }
        let mut rest = Vec::new();
        while rest.len() < 9 {
            let batch = inbox.recv().await.unwrap();
            rest.extend(batch.entries);
        }

        assert_eq!(first.sequence_number, 1);
        assert!(first_at.elapsed() >= Duration::from_millis(40));
        assert_eq!(values(&rest), (2..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_subscribe_errors() {
        let (_space, engine, _var) = setup();
        let (id, _inbox) = local(&engine, Duration::ZERO);

        let err = engine
            .subscribe_data_change(id, &NodeId::string(2, "Missing"))
            .unwrap_err();
        assert!(matches!(err, UaError::AddressSpace(AddressSpaceError::NodeNotFound { .. })));

        let err = engine.subscribe_data_change(id, &NodeId::SERVER).unwrap_err();
        assert!(matches!(err, UaError::Subscription(SubscriptionError::NotSubscribable { .. })));

        let err = engine
            .subscribe_data_change(SubscriptionId(999), &NodeId::SERVER)
            .unwrap_err();
        assert!(matches!(
            err,
            UaError::Subscription(SubscriptionError::SubscriptionNotFound { subscription_id: 999 })
        ));
    }

    #[tokio::test]
    async fn test_handles_are_never_reused() {
        let (_space, engine, var) = setup();
        let (id, _inbox) = local(&engine, Duration::ZERO);

        let first = engine.subscribe_data_change(id, &var).unwrap();
        engine.unsubscribe(id, first).unwrap();
        let second = engine.subscribe_data_change(id, &var).unwrap();
        assert_ne!(first, second);
        assert_eq!(engine.monitored_item_count(id).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_notifications() {
        let (space, engine, var) = setup();
        let (id, mut inbox) = local(&engine, Duration::ZERO);
        let removed = engine.subscribe_data_change(id, &var).unwrap();
        let kept = engine.subscribe_events(id, None, None).unwrap();

        engine.unsubscribe(id, removed).unwrap();
        let err = engine.unsubscribe(id, removed).unwrap_err();
        assert!(matches!(err, UaError::Subscription(SubscriptionError::UnknownHandle { .. })));

        space.set_value(&var, Value::Int32(1)).unwrap();
        engine.trigger_event(&Event::new(NodeId::SERVER, "test", 2, "after").unwrap());

        let entries = collect(&mut inbox, 1).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].handle(), kept);
    }

    // =========================================================================
    // Events
    // =========================================================================

    #[tokio::test]
    async fn test_event_filtering() {
        let (_space, engine, _var) = setup();
        let (id, mut inbox) = local(&engine, Duration::ZERO);
        let all = engine.subscribe_events(id, None, None).unwrap();
        let severe = engine
            .subscribe_events(id, None, Some(EventFilter::all().with_min_severity(500)))
            .unwrap();

        let low = Event::new(NodeId::SERVER, "test", 2, "low").unwrap();
        let high = Event::new(NodeId::SERVER, "test", 800, "high").unwrap();
        assert_eq!(engine.trigger_event(&low), 1);
        assert_eq!(engine.trigger_event(&high), 2);

        let entries = collect(&mut inbox, 3).await;
        let handles: Vec<_> = entries.iter().map(NotificationEntry::handle).collect();
        assert_eq!(handles, vec![all, all, severe]);
    }

    #[tokio::test]
    async fn test_event_notifier_must_match() {
        let (_space, engine, _var) = setup();
        let (id, _inbox) = local(&engine, Duration::ZERO);
        engine
            .subscribe_events(id, Some(NodeId::OBJECTS_FOLDER), None)
            .unwrap();

        let event = Event::new(NodeId::SERVER, "test", 2, "m").unwrap();
        assert_eq!(engine.trigger_event(&event), 0);

        let err = engine
            .subscribe_events(id, Some(NodeId::string(2, "Nope")), None)
            .unwrap_err();
        assert!(matches!(err, UaError::AddressSpace(AddressSpaceError::NodeNotFound { .. })));
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[tokio::test]
    async fn test_close_subscription() {
        let (space, engine, var) = setup();
        let (id, _inbox) = local(&engine, Duration::ZERO);
        let handle = engine.subscribe_data_change(id, &var).unwrap();
        assert_eq!(engine.state(id), Some(SubscriptionState::Active));

        engine.close_subscription(id).unwrap();
        assert_eq!(engine.state(id), Some(SubscriptionState::Closed));
        assert_eq!(engine.subscription_count(), 0);

        let err = engine.close_subscription(id).unwrap_err();
        assert!(matches!(err, UaError::Subscription(SubscriptionError::SubscriptionClosed { .. })));
        let err = engine.unsubscribe(id, handle).unwrap_err();
        assert!(matches!(err, UaError::Subscription(SubscriptionError::SubscriptionClosed { .. })));
        let err = engine.subscribe_data_change(id, &var).unwrap_err();
        assert!(matches!(err, UaError::Subscription(SubscriptionError::SubscriptionClosed { .. })));

        space.set_value(&var, Value::Int32(1)).unwrap();
        assert_eq!(engine.stats().notifications_queued(), 0);
    }

    #[tokio::test]
    async fn test_closed_subscriptions_are_released() {
        let (_space, engine, var) = setup();
        let mut inboxes = Vec::new();
        for _ in 0..200 {
            let (id, inbox) = local(&engine, Duration::ZERO);
            engine.subscribe_data_change(id, &var).unwrap();
            engine.close_subscription(id).unwrap();
            inboxes.push((id, inbox));
        }

        assert!(engine.subscriptions.is_empty());
        assert!(engine.data_index.read().is_empty());
        for (id, _) in &inboxes {
            assert_eq!(engine.state(*id), Some(SubscriptionState::Closed));
            let err = engine.monitored_item_count(*id).unwrap_err();
            assert!(matches!(err, UaError::Subscription(SubscriptionError::SubscriptionClosed { .. })));
        }
        assert_eq!(engine.state(SubscriptionId(10_000)), None);
        assert_eq!(engine.stats().subscriptions_closed(), 200);
    }

    #[tokio::test]
    async fn test_disconnected_transport_closes_subscription() {
        let (space, engine, var) = setup();
        let (id, inbox) = local(&engine, Duration::ZERO);
        engine.subscribe_data_change(id, &var).unwrap();
        drop(inbox);

        space.set_value(&var, Value::Int32(1)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while engine.state(id) != Some(SubscriptionState::Closed) {
            assert!(std::time::Instant::now() < deadline, "subscription was not closed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(engine.stats().delivery_failures(), 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let (_space, engine, _var) = setup();
        let (_a, _ia) = local(&engine, Duration::ZERO);
        let (b, _ib) = local(&engine, Duration::ZERO);
        engine.close_subscription(b).unwrap();

        assert_eq!(engine.close_all(), 1);
        assert_eq!(engine.subscription_count(), 0);
        assert_eq!(engine.stats().subscriptions_created(), 2);
        assert_eq!(engine.stats().subscriptions_closed(), 2);
    }

    #[tokio::test]
    async fn test_subscriptions_are_independent() {
        let (space, engine, var) = setup();
        let (a, mut inbox_a) = local(&engine, Duration::ZERO);
        let (b, mut inbox_b) = local(&engine, Duration::ZERO);
        engine.subscribe_data_change(a, &var).unwrap();
        engine.subscribe_data_change(b, &var).unwrap();

        for i in 0..3 {
            space.set_value(&var, Value::Int32(i)).unwrap();
        }
        assert_eq!(values(&collect(&mut inbox_a, 3).await), vec![0, 1, 2]);
        assert_eq!(values(&collect(&mut inbox_b, 3).await), vec![0, 1, 2]);

        let stats = engine.subscription_stats(a).unwrap();
        assert_eq!(stats.notifications_queued, 3);
    }
}
