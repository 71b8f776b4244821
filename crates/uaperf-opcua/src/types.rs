// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Endpoint addressing and server configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use uaperf_core::error::{ConfigurationError, ConnectionError, UaError, UaResult};

// =============================================================================
// Constants
// =============================================================================

/// URL scheme of every endpoint.
pub const SCHEME: &str = "opc.tcp";

/// Default host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 52520;

/// Resource path of the sample server.
pub const DEFAULT_PATH: &str = "OPCUA/SampleConsoleServer";

// =============================================================================
// Endpoint
// =============================================================================

/// Server endpoint: `opc.tcp://<host>:<port>/<path>`.
///
/// ```
/// use uaperf_opcua::types::Endpoint;
///
/// let endpoint = Endpoint::new("localhost", 52520);
/// assert_eq!(
///     endpoint.to_string(),
///     "opc.tcp://localhost:52520/OPCUA/SampleConsoleServer"
/// );
/// let parsed: Endpoint = endpoint.to_string().parse().unwrap();
/// assert_eq!(parsed, endpoint);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port; 0 asks the OS for an ephemeral port when binding.
    pub port: u16,
    /// Resource path without the leading slash.
    pub path: String,
}

impl Endpoint {
    /// Creates an endpoint with the sample server path.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: DEFAULT_PATH.to_string(),
        }
    }

    /// Returns a copy with a different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    /// `host:port` for socket APIs; IPv6 literals are bracketed.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bracketed_host(), self.port)
    }

    fn bracketed_host(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", SCHEME, self.socket_addr(), self.path)
    }
}

impl FromStr for Endpoint {
    type Err = UaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| UaError::from(ConnectionError::invalid_endpoint(s, reason));

        let rest = s
            .strip_prefix(SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| invalid("Endpoint must start with opc.tcp://"))?;

        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| invalid("Missing port"))?;
        let host = match host.strip_prefix('[') {
            Some(inner) => inner
                .strip_suffix(']')
                .ok_or_else(|| invalid("Unterminated IPv6 address"))?,
            None if host.contains(':') => return Err(invalid("IPv6 address must be bracketed")),
            None => host,
        };
        if host.is_empty() {
            return Err(invalid("Missing host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("Invalid port"))?;

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }
}

// =============================================================================
// ServerConfig
// =============================================================================

fn default_session_queue_capacity() -> usize {
    4096
}

fn default_internal_publishing_interval() -> Duration {
    Duration::from_millis(100)
}

/// Server endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Where to listen.
    pub endpoint: Endpoint,

    /// Outbound frames buffered per session before delivery back-pressures.
    #[serde(default = "default_session_queue_capacity")]
    pub session_queue_capacity: usize,

    /// Publishing interval of the server's own Filter/Disperser subscription.
    #[serde(default = "default_internal_publishing_interval", with = "duration_millis")]
    pub internal_publishing_interval: Duration,
}

impl ServerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Creates a configuration with defaults for everything but the endpoint.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            session_queue_capacity: default_session_queue_capacity(),
            internal_publishing_interval: default_internal_publishing_interval(),
        }
    }

    /// Validates this configuration.
    pub fn validate(&self) -> UaResult<()> {
        if self.endpoint.host.is_empty() {
            return Err(ConfigurationError::invalid_value("endpoint.host", "must not be empty").into());
        }

        if self.session_queue_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "session_queue_capacity",
                "must be greater than 0",
            )
            .into());
        }

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(Endpoint::default())
    }
}

// =============================================================================
// ServerConfigBuilder
// =============================================================================

/// Builder for [`ServerConfig`].
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    session_queue_capacity: Option<usize>,
    internal_publishing_interval: Option<Duration>,
}

impl ServerConfigBuilder {
    /// Sets the listen host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the listen port. 0 binds an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the per-session outbound queue capacity.
    pub fn session_queue_capacity(mut self, capacity: usize) -> Self {
        self.session_queue_capacity = Some(capacity);
        self
    }

    /// Sets the publishing interval of the internal logging subscription.
    pub fn internal_publishing_interval(mut self, interval: Duration) -> Self {
        self.internal_publishing_interval = Some(interval);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> UaResult<ServerConfig> {
        let config = ServerConfig {
            endpoint: Endpoint::new(
                self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                self.port.unwrap_or(DEFAULT_PORT),
            ),
            session_queue_capacity: self
                .session_queue_capacity
                .unwrap_or_else(default_session_queue_capacity),
            internal_publishing_interval: self
                .internal_publishing_interval
                .unwrap_or_else(default_internal_publishing_interval),
        };
        config.validate()?;
        Ok(config)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(
            Endpoint::default().to_string(),
            "opc.tcp://localhost:52520/OPCUA/SampleConsoleServer"
        );
        assert_eq!(Endpoint::new("10.0.0.1", 4840).socket_addr(), "10.0.0.1:4840");
    }

    #[test]
    fn test_endpoint_parse() {
        let e: Endpoint = "opc.tcp://plant:4840/OPCUA/SampleConsoleServer".parse().unwrap();
        assert_eq!(e.host, "plant");
        assert_eq!(e.port, 4840);
        assert_eq!(e.path, DEFAULT_PATH);

        let e: Endpoint = "opc.tcp://plant:4840".parse().unwrap();
        assert_eq!(e.path, "");
    }

    #[test]
    fn test_ipv6_endpoint() {
        let endpoint = Endpoint::new("::1", 4840);
        assert_eq!(endpoint.socket_addr(), "[::1]:4840");
        assert!(endpoint.socket_addr().parse::<std::net::SocketAddr>().is_ok());
        assert_eq!(endpoint.to_string(), "opc.tcp://[::1]:4840/OPCUA/SampleConsoleServer");

        let parsed: Endpoint = endpoint.to_string().parse().unwrap();
        assert_eq!(parsed, endpoint);

        assert!("opc.tcp://[::1:4840/x".parse::<Endpoint>().is_err());
        assert!("opc.tcp://::1:4840/x".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_endpoint_parse_errors() {
        assert!("http://plant:4840/x".parse::<Endpoint>().is_err());
        assert!("opc.tcp://plant/x".parse::<Endpoint>().is_err());
        assert!("opc.tcp://:4840/x".parse::<Endpoint>().is_err());
        assert!("opc.tcp://plant:notaport/x".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let config = ServerConfig::builder().build().unwrap();
        assert_eq!(config.endpoint, Endpoint::default());
        assert_eq!(config.session_queue_capacity, 4096);
        assert_eq!(config.internal_publishing_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_builder_validation() {
        assert!(ServerConfig::builder().session_queue_capacity(0).build().is_err());
        assert!(ServerConfig::builder().host("").build().is_err());
        let config = ServerConfig::builder().host("127.0.0.1").port(0).build().unwrap();
        assert_eq!(config.endpoint.port, 0);
    }
}
