// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Fixed demo namespace.
//!
//! ```text
//! Objects
//! └── 2:OpcDemoDevice
//!     ├── 2:Filter            String  "None"
//!     ├── 2:Disperser         String  "Mirror"
//!     ├── 2:perfTestVar       Int32   0
//!     ├── 2:StaticInt32Array  Int32[100]
//!     └── 2:AnalogInt32Array  Int32[100]
//! ```

use uaperf_core::address_space::AddressSpace;
use uaperf_core::error::UaResult;
use uaperf_core::types::{NodeId, QualifiedName, Value};

/// Namespace index of the demo nodes.
pub const NAMESPACE_INDEX: u16 = 2;

/// Length of both demo arrays.
pub const ARRAY_LENGTH: usize = 100;

/// Browse name of the device object.
pub const DEVICE: &str = "OpcDemoDevice";
/// Browse name of the filter setting.
pub const FILTER: &str = "Filter";
/// Browse name of the disperser setting.
pub const DISPERSER: &str = "Disperser";
/// Browse name of the scalar load target.
pub const PERF_TEST_VAR: &str = "perfTestVar";
/// Browse name of the static array load target.
pub const STATIC_ARRAY: &str = "StaticInt32Array";
/// Browse name of the analog array load target.
pub const ANALOG_ARRAY: &str = "AnalogInt32Array";

/// Root-relative browse path of a demo variable, e.g.
/// `Objects/2:OpcDemoDevice/2:perfTestVar`.
pub fn variable_path(name: &str) -> Vec<QualifiedName> {
    vec![
        QualifiedName::new(0, "Objects"),
        QualifiedName::new(NAMESPACE_INDEX, DEVICE),
        QualifiedName::new(NAMESPACE_INDEX, name),
    ]
}

fn node_id(name: &str) -> NodeId {
    NodeId::string(NAMESPACE_INDEX, format!("{}.{}", DEVICE, name))
}

/// Ids of the installed demo nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoNodes {
    /// `OpcDemoDevice` object.
    pub device: NodeId,
    /// `Filter` variable.
    pub filter: NodeId,
    /// `Disperser` variable.
    pub disperser: NodeId,
    /// `perfTestVar` variable.
    pub perf_test_var: NodeId,
    /// `StaticInt32Array` variable.
    pub static_array: NodeId,
    /// `AnalogInt32Array` variable.
    pub analog_array: NodeId,
}

impl DemoNodes {
    /// Adds the demo device and its variables under `Objects`.
    ///
    /// # Errors
    ///
    /// `DuplicateNodeId` if the namespace was already installed.
    pub fn install(space: &AddressSpace) -> UaResult<Self> {
        let device = NodeId::string(NAMESPACE_INDEX, DEVICE);
        space.add_object(
            &NodeId::OBJECTS_FOLDER,
            device.clone(),
            QualifiedName::new(NAMESPACE_INDEX, DEVICE),
        )?;

        let variable = |name: &str, initial: Value| -> UaResult<NodeId> {
            let id = node_id(name);
            space.add_variable(&device, id.clone(), QualifiedName::new(NAMESPACE_INDEX, name), initial)?;
            Ok(id)
        };

        Ok(Self {
            filter: variable(FILTER, Value::from("None"))?,
            disperser: variable(DISPERSER, Value::from("Mirror"))?,
            perf_test_var: variable(PERF_TEST_VAR, Value::Int32(0))?,
            static_array: variable(STATIC_ARRAY, Value::Int32Array(vec![0; ARRAY_LENGTH]))?,
            analog_array: variable(ANALOG_ARRAY, Value::Int32Array(vec![0; ARRAY_LENGTH]))?,
            device,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
