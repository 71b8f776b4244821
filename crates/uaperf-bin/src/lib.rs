// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uaperf-bin
//!
//! Command line front end for the uaperf benchmark.
//!
//! - CLI argument parsing with clap
//! - layered YAML/TOML configuration
//! - logging initialization and graceful shutdown
//! - the `server`, `client` and `version` commands
//!
//! ## Usage
//!
//! ```bash
//! # Serve scalar writes as fast as possible
//! uaperf server --delay 0
//!
//! # Event workload with 64 byte messages
//! uaperf server --test-no 0 --event-size 64
//!
//! # Measure until 100000 updates have arrived
//! uaperf client --count 100000 --bounded
//!
//! # Use a configuration file
//! uaperf -c perf.yaml client
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use config::PerfConfig;
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use shutdown::{ShutdownCoordinator, ShutdownGuard};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
