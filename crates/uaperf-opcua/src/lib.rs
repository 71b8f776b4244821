// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription and notification pipeline for uaperf.
//!
//! This crate serves an [`AddressSpace`](uaperf_core::AddressSpace) over
//! TCP, detects value changes and events, and delivers them to subscribed
//! clients in batches. It also carries the synthetic load generator and
//! the client-side throughput meter used to benchmark the pipeline.
//!
//! # Features
//!
//! - Subscriptions with data change and event monitored items
//! - Event filters on minimum severity and source name
//! - Per-subscription publishing interval with in-order delivery
//! - Newline-delimited JSON session protocol
//! - In-process access through [`client::LocalSession`]
//! - Four synthetic workloads and a throughput meter
//!
//! # Error Handling
//!
//! Errors are the [`UaError`](uaperf_core::UaError) hierarchy from
//! `uaperf-core`; service faults carry the typed error across the wire so
//! the client sees the same variant the server raised.
//!
//! # Example
//!
//! ```rust,ignore
//! use uaperf_opcua::{DemoNodes, ServerConfig, UaServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let space = Arc::new(AddressSpace::new());
//!     DemoNodes::install(&space)?;
//!
//!     let server = UaServer::new(ServerConfig::default(), space)?;
//!     let handle = server.start().await?;
//!     println!("Listening on {}", handle.endpoint());
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.stop();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod notification;
pub mod protocol;
pub mod server;
pub mod types;

pub use notification::{MonitoredItemHandle, NotificationBatch, NotificationEntry, SubscriptionId};

pub use types::{Endpoint, ServerConfig, ServerConfigBuilder};

// Re-export server types
pub use server::{
    DemoNodes, EngineStats, LoadGenerator, LoadGeneratorConfig, LoadGeneratorHandle, LoadReport,
    LocalTransport, MonitoredItem, NotificationTransport, ServerHandle, SessionTransport,
    SubscriptionEngine, SubscriptionState, SubscriptionStats, SubscriptionStatsSnapshot, TestMode,
    UaServer,
};

// Re-export client types
pub use client::{
    ChannelCallback, ClientSubscriptionHandle, LocalSession, LoggingCallback, SubscriptionCallback,
    SubscriptionService, ThroughputCallback, ThroughputMeter, ThroughputReport, UaClient,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
