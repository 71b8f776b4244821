// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use crate::cli::Cli;
use crate::error::BinResult;

/// Executes the `version` command to display version information.
pub fn version(_cli: &Cli) -> BinResult<()> {
    println!("uaperf - subscription and notification throughput benchmark");
    println!();
    println!("Version Information:");
    println!("  uaperf-bin:   {}", env!("CARGO_PKG_VERSION"));
    println!("  uaperf-core:  {}", uaperf_core::VERSION);
    println!("  uaperf-opcua: {}", uaperf_opcua::VERSION);
    println!();
    println!("Build Information:");
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(())
}
