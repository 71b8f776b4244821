// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server side of the pipeline.
//!
//! - **Engine**: subscriptions, monitored items, change detection, publishing
//! - **Transport**: delivery of batches to one subscriber
//! - **Endpoint / Session**: TCP listener and per-connection request handling
//! - **Namespace**: the fixed demo device
//! - **LoadGen**: synthetic workloads on a dedicated thread
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  set_value / trigger_event  ┌─────────────────────┐
//! │ LoadGenerator│ ──────────────────────────▶ │ AddressSpace        │
//! └──────────────┘                             └─────────────────────┘
//!                                                        │ ChangeObserver
//!                                                        ▼
//!                                              ┌─────────────────────┐
//!                                              │ SubscriptionEngine  │
//!                                              └─────────────────────┘
//!                                                        │ publisher task
//!                                                        ▼
//!                                  LocalTransport / SessionTransport
//! ```

mod endpoint;
pub mod engine;
pub mod loadgen;
pub mod namespace;
mod session;
pub mod transport;

pub use endpoint::{ServerHandle, UaServer};
pub use engine::{
    EngineStats, MonitoredItem, SubscriptionEngine, SubscriptionState, SubscriptionStats,
    SubscriptionStatsSnapshot,
};
pub use loadgen::{LoadGenerator, LoadGeneratorConfig, LoadGeneratorHandle, LoadReport, TestMode};
pub use namespace::DemoNodes;
pub use transport::{LocalTransport, NotificationTransport, SessionTransport};
