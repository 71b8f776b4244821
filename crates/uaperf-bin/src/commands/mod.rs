// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.
//!
//! - `server`: serve the demo namespace under a synthetic workload
//! - `client`: subscribe to the workload and report throughput
//! - `version`: show version information

mod client;
mod server;
mod version;

pub use client::client;
pub use server::server;
pub use version::version;

use crate::cli::{Cli, Commands};
use crate::error::BinResult;

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match cli.command.clone() {
        Commands::Server(args) => server::server(&cli, args).await,
        Commands::Client(args) => client::client(&cli, args).await,
        Commands::Version => version::version(&cli),
    }
}
