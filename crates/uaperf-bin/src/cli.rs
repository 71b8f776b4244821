// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `server`: serve the demo namespace and drive a synthetic workload
//! - `client`: connect, subscribe and report notification throughput
//! - `version`: show version information
//!
//! Every perf option is optional on the command line so that values from a
//! configuration file are only overridden when given explicitly.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// uaperf - subscription throughput benchmark
///
/// Runs either side of a data change and event notification pipeline and
/// measures how many notifications per second reach the client.
#[derive(Parser, Debug)]
#[command(
    name = "uaperf",
    author = "Sylvex",
    version = uaperf_core::VERSION,
    about = "Subscription and notification throughput benchmark",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path (YAML or TOML)
    #[arg(short, long, env = "UAPERF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        default_value = "info",
        env = "UAPERF_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json, compact)
    #[arg(long, default_value = "text", env = "UAPERF_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Enable quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands for the uaperf CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the server
    ///
    /// Installs the demo namespace, starts the TCP endpoint and runs the
    /// load generator selected by `--test-no` until interrupted.
    Server(PerfArgs),

    /// Start the client
    ///
    /// Connects to the server, browses the demo namespace, subscribes to
    /// the load targets and server events, and reports throughput.
    Client(PerfArgs),

    /// Show detailed version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments shared by `server` and `client`.
#[derive(Args, Debug, Default, Clone)]
pub struct PerfArgs {
    /// Server host name [default: localhost]
    #[arg(long, env = "UAPERF_HOST")]
    pub host: Option<String>,

    /// Server port [default: 52520]
    #[arg(long, env = "UAPERF_PORT")]
    pub port: Option<u16>,

    /// Number of mutations or updates; only honored with --bounded [default: 1000000]
    #[arg(long, env = "UAPERF_COUNT")]
    pub count: Option<u64>,

    /// Delay between mutations in microseconds [default: 10]
    #[arg(long, env = "UAPERF_DELAY")]
    pub delay: Option<u64>,

    /// Workload: 0 events, 1 scalar, 2 analog array, 3 static array [default: 1]
    #[arg(long, env = "UAPERF_TEST_NO", value_parser = clap::value_parser!(u8).range(0..=3))]
    pub test_no: Option<u8>,

    /// Event message size in bytes [default: 512]
    #[arg(long, env = "UAPERF_EVENT_SIZE")]
    pub event_size: Option<usize>,

    /// Stop after --count mutations (server) or updates (client)
    #[arg(long)]
    pub bounded: bool,

    /// Client publishing interval in milliseconds [default: 1]
    #[arg(long, env = "UAPERF_PUBLISHING_INTERVAL")]
    pub publishing_interval_ms: Option<u64>,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective log level based on flags.
    pub fn effective_log_level(&self) -> &str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let cli = Cli::parse_from(["uaperf", "server"]);
        let Commands::Server(args) = cli.command else {
            panic!("Expected Server command");
        };
        assert!(args.host.is_none());
        assert!(args.port.is_none());
        assert!(args.test_no.is_none());
        assert!(!args.bounded);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_client_args() {
        let cli = Cli::parse_from([
            "uaperf",
            "client",
            "--host",
            "10.0.0.5",
            "--port",
            "4840",
            "--count",
            "5000",
            "--delay",
            "0",
            "--test-no",
            "0",
            "--event-size",
            "64",
            "--bounded",
        ]);
        let Commands::Client(args) = cli.command else {
            panic!("Expected Client command");
        };
        assert_eq!(args.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(args.port, Some(4840));
        assert_eq!(args.count, Some(5000));
        assert_eq!(args.delay, Some(0));
        assert_eq!(args.test_no, Some(0));
        assert_eq!(args.event_size, Some(64));
        assert!(args.bounded);
    }

    #[test]
    fn test_test_no_out_of_range() {
        assert!(Cli::try_parse_from(["uaperf", "server", "--test-no", "4"]).is_err());
    }

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["uaperf"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["uaperf", "client", "-c", "perf.yaml", "--log-format", "json"]);
        assert_eq!(cli.config, Some(PathBuf::from("perf.yaml")));
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_log_level() {
        let cli = Cli::parse_from(["uaperf", "-l", "debug", "version"]);
        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.effective_log_level(), "debug");
    }

    #[test]
    fn test_quiet_mode() {
        let cli = Cli::parse_from(["uaperf", "-q", "version"]);
        assert!(cli.quiet);
        assert_eq!(cli.effective_log_level(), "warn");
    }

    #[test]
    fn test_verbose_mode() {
        let cli = Cli::parse_from(["uaperf", "-v", "version"]);
        assert!(cli.verbose);
        assert_eq!(cli.effective_log_level(), "debug");
    }
}
