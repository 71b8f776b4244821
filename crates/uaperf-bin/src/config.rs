// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Benchmark configuration.
//!
//! Settings are resolved in three layers, later layers winning:
//!
//! 1. built-in defaults
//! 2. an optional YAML or TOML file (`--config`), format chosen by extension
//! 3. command line flags and their `UAPERF_*` environment fallbacks
//!
//! ```yaml
//! endpoint:
//!   host: localhost
//!   port: 52520
//! perf:
//!   count: 1000000
//!   delay_us: 10
//!   test_no: 1
//!   event_size: 512
//!   bounded: false
//! subscription:
//!   publishing_interval_ms: 1
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use uaperf_opcua::server::loadgen::MAX_EVENT_SIZE;
use uaperf_opcua::types::{DEFAULT_HOST, DEFAULT_PORT};
use uaperf_opcua::{Endpoint, LoadGeneratorConfig, TestMode};

use crate::cli::PerfArgs;
use crate::error::{BinError, BinResult};

// =============================================================================
// PerfConfig
// =============================================================================

/// Resolved benchmark settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct PerfConfig {
    /// Where the server listens and the client connects.
    pub endpoint: EndpointSection,
    /// Workload settings.
    pub perf: PerfSection,
    /// Client subscription settings.
    pub subscription: SubscriptionSection,
}

/// `endpoint` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointSection {
    /// Host name.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// `perf` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PerfSection {
    /// Mutations (server) or updates (client); only honored when `bounded`.
    pub count: u64,
    /// Delay between mutations in microseconds.
    pub delay_us: u64,
    /// Workload number, 0..=3.
    pub test_no: u8,
    /// Event message size in bytes.
    pub event_size: usize,
    /// Stop after `count`.
    pub bounded: bool,
}

impl Default for PerfSection {
    fn default() -> Self {
        Self {
            count: 1_000_000,
            delay_us: 10,
            test_no: TestMode::ScalarWrite.test_no(),
            event_size: 512,
            bounded: false,
        }
    }
}

/// `subscription` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubscriptionSection {
    /// Client publishing interval in milliseconds.
    pub publishing_interval_ms: u64,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            publishing_interval_ms: 1,
        }
    }
}

impl PerfConfig {
    /// Resolves defaults, the optional file and the command line.
    pub fn resolve(file: Option<&Path>, args: &PerfArgs) -> BinResult<Self> {
        let mut config = match file {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        debug!(?config, "Configuration resolved");
        Ok(config)
    }

    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> BinResult<Self> {
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path)
            .map_err(|e| BinError::from(e).with_context(format!("failed to read {}", path.display())))?;
        let config = Self::parse(&content, format)
            .map_err(|e| e.with_context(format!("invalid configuration file {}", path.display())))?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parses and validates configuration text.
    pub fn parse(content: &str, format: ConfigFormat) -> BinResult<Self> {
        let config: Self = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| BinError::config(e.to_string()))?,
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| BinError::config(e.to_string()))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields given on the command line.
    pub fn apply_args(&mut self, args: &PerfArgs) {
        if let Some(host) = &args.host {
            self.endpoint.host = host.clone();
        }
        if let Some(port) = args.port {
            self.endpoint.port = port;
        }
        if let Some(count) = args.count {
            self.perf.count = count;
        }
        if let Some(delay) = args.delay {
            self.perf.delay_us = delay;
        }
        if let Some(test_no) = args.test_no {
            self.perf.test_no = test_no;
        }
        if let Some(event_size) = args.event_size {
            self.perf.event_size = event_size;
        }
        if args.bounded {
            self.perf.bounded = true;
        }
        if let Some(interval) = args.publishing_interval_ms {
            self.subscription.publishing_interval_ms = interval;
        }
    }

    /// Validates this configuration.
    pub fn validate(&self) -> BinResult<()> {
        if self.endpoint.host.trim().is_empty() {
            return Err(BinError::config("endpoint.host must not be empty"));
        }
        self.test_mode()?;
        if self.perf.event_size > MAX_EVENT_SIZE {
            return Err(BinError::config(format!(
                "perf.event_size must not exceed {} bytes",
                MAX_EVENT_SIZE
            )));
        }
        if self.perf.bounded && self.perf.count == 0 {
            return Err(BinError::config("perf.count must be positive for a bounded run"));
        }
        Ok(())
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.endpoint.host.clone(), self.endpoint.port)
    }

    /// The configured workload.
    pub fn test_mode(&self) -> BinResult<TestMode> {
        TestMode::try_from(self.perf.test_no).map_err(|e| BinError::config(e.to_string()))
    }

    /// `count` when bounded, otherwise 0 (unbounded).
    pub fn effective_count(&self) -> u64 {
        if self.perf.bounded {
            self.perf.count
        } else {
            0
        }
    }

    /// Client publishing interval.
    pub fn publishing_interval(&self) -> Duration {
        Duration::from_millis(self.subscription.publishing_interval_ms)
    }

    /// Load generator settings.
    pub fn load_generator(&self) -> BinResult<LoadGeneratorConfig> {
        Ok(LoadGeneratorConfig::new(self.test_mode()?)
            .with_delay(Duration::from_micros(self.perf.delay_us))
            .with_count(self.effective_count())
            .with_event_size(self.perf.event_size))
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> BinResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some(other) => Err(BinError::config(format!("unsupported config format: {}", other))),
            None => Err(BinError::config("unsupported config format: (no extension)")),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = PerfConfig::default();
        assert_eq!(config.endpoint.host, "localhost");
        assert_eq!(config.endpoint.port, 52520);
        assert_eq!(config.perf.count, 1_000_000);
        assert_eq!(config.perf.delay_us, 10);
        assert_eq!(config.perf.test_no, 1);
        assert_eq!(config.perf.event_size, 512);
        assert_eq!(config.effective_count(), 0);
        assert_eq!(config.publishing_interval(), Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml() {
        let file = write_config(
            ".yaml",
            "endpoint:\n  port: 4840\nperf:\n  test_no: 0\n  event_size: 64\n",
        );
        let config = PerfConfig::load(file.path()).unwrap();
        assert_eq!(config.endpoint.port, 4840);
        assert_eq!(config.endpoint.host, "localhost");
        assert_eq!(config.test_mode().unwrap(), TestMode::Events);
        assert_eq!(config.perf.event_size, 64);
        assert_eq!(config.perf.delay_us, 10);
    }

    #[test]
    fn test_load_toml() {
        let file = write_config(
            ".toml",
            "[perf]\ncount = 5000\nbounded = true\n\n[subscription]\npublishing_interval_ms = 100\n",
        );
        let config = PerfConfig::load(file.path()).unwrap();
        assert_eq!(config.effective_count(), 5000);
        assert_eq!(config.publishing_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_precedence_cli_over_file_over_defaults() {
        let file = write_config(".yml", "endpoint:\n  host: filehost\n  port: 4840\nperf:\n  delay_us: 50\n");
        let args = PerfArgs {
            port: Some(9000),
            ..Default::default()
        };
        let config = PerfConfig::resolve(Some(file.path()), &args).unwrap();

        assert_eq!(config.endpoint.port, 9000);
        assert_eq!(config.endpoint.host, "filehost");
        assert_eq!(config.perf.delay_us, 50);
        assert_eq!(config.perf.event_size, 512);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_config(".json", "{}");
        let err = PerfConfig::load(file.path()).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_invalid_values() {
        let err = PerfConfig::parse("perf:\n  test_no: 7\n", ConfigFormat::Yaml).unwrap_err();
        assert_eq!(err.exit_code(), 1);

        let err = PerfConfig::parse("[perf]\nbounded = true\ncount = 0\n", ConfigFormat::Toml).unwrap_err();
        assert_eq!(err.exit_code(), 1);

        assert!(PerfConfig::parse("nonsense: 1\n", ConfigFormat::Yaml).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = PerfConfig::load(Path::new("/nonexistent/uaperf.yaml")).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_load_generator_settings() {
        let args = PerfArgs {
            test_no: Some(3),
            delay: Some(0),
            count: Some(42),
            bounded: true,
            ..Default::default()
        };
        let config = PerfConfig::resolve(None, &args).unwrap();
        let generator = config.load_generator().unwrap();
        assert_eq!(generator.mode, TestMode::StaticArrayWrite);
        assert_eq!(generator.delay, Duration::ZERO);
        assert_eq!(generator.count, 42);
    }
}
