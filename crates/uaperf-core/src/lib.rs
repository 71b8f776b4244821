// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uaperf-core
//!
//! Shared types and the address space for the uaperf subscription benchmark.
//!
//! - **Types**: `NodeId`, `QualifiedName`, `Value`, `DataValue`, `Event`, `EventFilter`
//! - **Error**: `UaError` and its per-category enums
//! - **AddressSpace**: the node tree, per-node value slots and the
//!   `ChangeObserver` seam the subscription engine plugs into
//!
//! ## Example
//!
//! ```
//! use uaperf_core::{AddressSpace, NodeId, QualifiedName};
//!
//! let space = AddressSpace::new();
//! let server = space.get_node(&QualifiedName::path(["Objects", "Server"])).unwrap();
//! assert_eq!(server.node_id, NodeId::SERVER);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod address_space;
pub mod error;
pub mod types;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use address_space::{AddressSpace, ChangeObserver, Node};
pub use error::{
    AddressSpaceError, ConfigurationError, ConnectionError, ErrorCode, ErrorSeverity,
    SubscriptionError, TransportError, UaError, UaResult,
};
pub use types::{
    AttributeId, DataValue, Event, EventFilter, NodeClass, NodeId, NodeIdentifier, QualifiedName,
    Value,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
