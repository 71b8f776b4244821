// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client side of the pipeline.
//!
//! - **Subscription**: `ClientSubscriptionHandle`, callbacks and the
//!   `SubscriptionService` seam
//! - **Remote**: `UaClient`, the TCP client
//! - **Local**: `LocalSession`, in-process access to an engine
//! - **Throughput**: rate measurement of received notifications
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  ClientSubscriptionHandle                       │
//! │          (dispatcher task, SubscriptionCallback calls)          │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │ SubscriptionService
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//! ┌───────────────────────────┐ ┌───────────────────────────────────┐
//! │ UaClient (TCP, JSON lines)│ │ LocalSession (same process)       │
//! └───────────────────────────┘ └───────────────────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use uaperf_opcua::client::{ThroughputCallback, ThroughputMeter, UaClient};
//!
//! let client = UaClient::connect(&"opc.tcp://localhost:52520/OPCUA/SampleConsoleServer".parse()?).await?;
//! let callback = Arc::new(ThroughputCallback::new(ThroughputMeter::new()));
//! let subscription = client.create_subscription(Duration::from_millis(1), callback).await?;
//! subscription.subscribe_data_change(&perf_test_var).await?;
//! ```

mod local;
mod remote;
pub mod subscription;
pub mod throughput;

pub use local::LocalSession;
pub use remote::UaClient;
pub use subscription::{
    ChannelCallback, ClientSubscriptionHandle, LoggingCallback, SubscriptionCallback, SubscriptionService,
};
pub use throughput::{ThroughputCallback, ThroughputMeter, ThroughputReport, DEFAULT_REPORT_EVERY};
