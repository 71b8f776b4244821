// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the uaperf subscription pipeline.
//!
//! Errors are grouped by the domain they originate from, and a single
//! [`UaError`] wraps every category so callers can use one `Result` type.
//!
//! # Error Categories
//!
//! ```text
//! UaError
//! ├── Connection    - Endpoint unreachable, session lost, I/O failures
//! ├── AddressSpace  - Navigation and value write failures
//! ├── Subscription  - Caller misuse of subscriptions and monitored items
//! ├── Transport     - Delivery and framing failures
//! └── Configuration - Invalid settings
//! ```
//!
//! None of these errors is retried automatically. [`UaError::is_retryable`]
//! exists so the contract is explicit at call sites.
//!
//! # Examples
//!
//! ```
//! use uaperf_core::error::{AddressSpaceError, UaError};
//!
//! let error = UaError::from(AddressSpaceError::path_not_found("Objects/NoSuchThing"));
//! assert_eq!(error.category(), "address_space");
//! assert!(!error.is_retryable());
//! ```

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

/// Result type alias for pipeline operations.
pub type UaResult<T> = Result<T, UaError>;

// =============================================================================
// UaError - Main Error Type
// =============================================================================

/// The main error type for uaperf operations.
#[derive(Debug, Error)]
pub enum UaError {
    /// Connection-related errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Address space navigation and write errors.
    #[error("{0}")]
    AddressSpace(#[from] AddressSpaceError),

    /// Subscription and monitored item errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Notification delivery and framing errors.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
}

impl UaError {
    /// Creates a connection error.
    #[inline]
    pub fn connection(error: ConnectionError) -> Self {
        Self::Connection(error)
    }

    /// Creates an address space error.
    #[inline]
    pub fn address_space(error: AddressSpaceError) -> Self {
        Self::AddressSpace(error)
    }

    /// Creates a subscription error.
    #[inline]
    pub fn subscription(error: SubscriptionError) -> Self {
        Self::Subscription(error)
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(error: TransportError) -> Self {
        Self::Transport(error)
    }

    /// Creates a configuration error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    /// Shortcut for a lost or closed session.
    pub fn not_connected() -> Self {
        Self::Connection(ConnectionError::NotConnected)
    }

    /// Always `false`: nothing in the pipeline retries.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Returns `true` if the error ends the client session.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Returns the severity of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connection(_) => ErrorSeverity::Critical,
            Self::AddressSpace(e) => e.severity(),
            Self::Subscription(_) => ErrorSeverity::Warning,
            Self::Transport(TransportError::DeliveryFailed { .. }) => ErrorSeverity::Warning,
            Self::Transport(_) => ErrorSeverity::Error,
            Self::Configuration(_) => ErrorSeverity::Error,
        }
    }

    /// Returns the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::AddressSpace(_) => "address_space",
            Self::Subscription(_) => "subscription",
            Self::Transport(_) => "transport",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Returns a structured error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Connection(e) => ErrorCode::new(1, e.code()),
            Self::AddressSpace(e) => ErrorCode::new(2, e.code()),
            Self::Subscription(e) => ErrorCode::new(3, e.code()),
            Self::Transport(e) => ErrorCode::new(4, e.code()),
            Self::Configuration(e) => ErrorCode::new(5, e.code()),
        }
    }

    /// Returns the tracing level matching this error's severity.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Errors establishing or keeping a client session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The endpoint refused or could not be reached.
    #[error("Connection refused to '{endpoint}'")]
    Refused {
        /// Endpoint URL.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: Option<io::Error>,
    },

    /// The session was closed by the peer.
    #[error("Connection closed: {reason}")]
    Closed {
        /// Why the session ended.
        reason: String,
    },

    /// The endpoint URL could not be parsed.
    #[error("Invalid endpoint URL: '{url}' - {reason}")]
    InvalidEndpoint {
        /// The offending URL.
        url: String,
        /// Why it is invalid.
        reason: String,
    },

    /// An operation was attempted without a session.
    #[error("Not connected to server")]
    NotConnected,

    /// Raw I/O failure on an established session.
    #[error("I/O error: {message}")]
    Io {
        /// Context message.
        message: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl ConnectionError {
    /// Creates a refused error.
    pub fn refused(endpoint: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            source: None,
        }
    }

    /// Creates a refused error with its I/O cause.
    pub fn refused_with(endpoint: impl Into<String>, source: io::Error) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            source: Some(source),
        }
    }

    /// Creates a closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::Refused { .. } => 1,
            Self::Closed { .. } => 2,
            Self::InvalidEndpoint { .. } => 3,
            Self::NotConnected => 4,
            Self::Io { .. } => 5,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        Self::io("session I/O failed", err)
    }
}

// =============================================================================
// AddressSpaceError
// =============================================================================

/// Errors navigating or mutating the address space.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddressSpaceError {
    /// A node with this id already exists.
    #[error("Duplicate node id: {node_id}")]
    DuplicateNodeId {
        /// The duplicated id.
        node_id: String,
    },

    /// The parent of a new node does not exist.
    #[error("Parent node not found: {node_id}")]
    ParentNotFound {
        /// The missing parent id.
        node_id: String,
    },

    /// A browse path segment did not resolve.
    #[error("Path not found: {path}")]
    PathNotFound {
        /// The full requested path.
        path: String,
    },

    /// No node exists with this id.
    #[error("Node not found: {node_id}")]
    NodeNotFound {
        /// The missing id.
        node_id: String,
    },

    /// The node has no value slot.
    #[error("Node '{node_id}' is not a variable")]
    NotAVariable {
        /// The object node id.
        node_id: String,
    },

    /// The written value has a different type than the stored one.
    #[error("Type mismatch for node '{node_id}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Target node id.
        node_id: String,
        /// Stored value type.
        expected: String,
        /// Written value type.
        actual: String,
    },
}

impl AddressSpaceError {
    /// Creates a duplicate node id error.
    pub fn duplicate_node_id(node_id: impl fmt::Display) -> Self {
        Self::DuplicateNodeId {
            node_id: node_id.to_string(),
        }
    }

    /// Creates a parent not found error.
    pub fn parent_not_found(node_id: impl fmt::Display) -> Self {
        Self::ParentNotFound {
            node_id: node_id.to_string(),
        }
    }

    /// Creates a path not found error.
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    /// Creates a node not found error.
    pub fn node_not_found(node_id: impl fmt::Display) -> Self {
        Self::NodeNotFound {
            node_id: node_id.to_string(),
        }
    }

    /// Creates a not a variable error.
    pub fn not_a_variable(node_id: impl fmt::Display) -> Self {
        Self::NotAVariable {
            node_id: node_id.to_string(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(
        node_id: impl fmt::Display,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            node_id: node_id.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Navigation failures are fatal to the requesting operation only;
    /// type errors point at a programming or configuration mistake.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::PathNotFound { .. } | Self::NodeNotFound { .. } => ErrorSeverity::Warning,
            Self::DuplicateNodeId { .. } | Self::ParentNotFound { .. } => ErrorSeverity::Error,
            Self::NotAVariable { .. } | Self::TypeMismatch { .. } => ErrorSeverity::Critical,
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::DuplicateNodeId { .. } => 1,
            Self::ParentNotFound { .. } => 2,
            Self::PathNotFound { .. } => 3,
            Self::NodeNotFound { .. } => 4,
            Self::NotAVariable { .. } => 5,
            Self::TypeMismatch { .. } => 6,
        }
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Errors from misuse of subscriptions and monitored items.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionError {
    /// No subscription exists with this id.
    #[error("Subscription not found: {subscription_id}")]
    SubscriptionNotFound {
        /// Subscription id.
        subscription_id: u32,
    },

    /// The subscription has been closed.
    #[error("Subscription {subscription_id} is closed")]
    SubscriptionClosed {
        /// Subscription id.
        subscription_id: u32,
    },

    /// The monitored item handle is not (or no longer) registered.
    #[error("Unknown monitored item handle {handle} in subscription {subscription_id}")]
    UnknownHandle {
        /// Subscription id.
        subscription_id: u32,
        /// Monitored item handle.
        handle: u32,
    },

    /// The node has no value to monitor.
    #[error("Node '{node_id}' has no value and cannot be subscribed")]
    NotSubscribable {
        /// Node id.
        node_id: String,
    },
}

impl SubscriptionError {
    /// Creates a not found error.
    pub fn not_found(subscription_id: u32) -> Self {
        Self::SubscriptionNotFound { subscription_id }
    }

    /// Creates a closed error.
    pub fn closed(subscription_id: u32) -> Self {
        Self::SubscriptionClosed { subscription_id }
    }

    /// Creates an unknown handle error.
    pub fn unknown_handle(subscription_id: u32, handle: u32) -> Self {
        Self::UnknownHandle {
            subscription_id,
            handle,
        }
    }

    /// Creates a not subscribable error.
    pub fn not_subscribable(node_id: impl fmt::Display) -> Self {
        Self::NotSubscribable {
            node_id: node_id.to_string(),
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::SubscriptionNotFound { .. } => 1,
            Self::SubscriptionClosed { .. } => 2,
            Self::UnknownHandle { .. } => 3,
            Self::NotSubscribable { .. } => 4,
        }
    }
}

// =============================================================================
// TransportError
// =============================================================================

/// Errors delivering notifications or exchanging frames.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportError {
    /// The target session is closed; the batch was dropped.
    #[error("Delivery failed for subscription {subscription_id}: {reason}")]
    DeliveryFailed {
        /// Subscription id.
        subscription_id: u32,
        /// Why delivery failed.
        reason: String,
    },

    /// A frame could not be encoded or decoded.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the malformed frame.
        message: String,
    },

    /// The peer answered with something other than what was asked for.
    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// Expected response kind.
        expected: String,
        /// Received response kind.
        actual: String,
    },
}

impl TransportError {
    /// Creates a delivery failed error.
    pub fn delivery_failed(subscription_id: u32, reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            subscription_id,
            reason: reason.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an unexpected response error.
    pub fn unexpected_response(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::DeliveryFailed { .. } => 1,
            Self::Protocol { .. } => 2,
            Self::UnexpectedResponse { .. } => 3,
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Invalid settings.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigurationError {
    /// A node id string could not be parsed.
    #[error("Invalid node id '{node_id}': {reason}")]
    InvalidNodeId {
        /// The offending text.
        node_id: String,
        /// Why parsing failed.
        reason: String,
    },

    /// An event severity outside 1..=1000.
    #[error("Invalid event severity {severity}: must be between 1 and 1000")]
    InvalidSeverity {
        /// The rejected severity.
        severity: u16,
    },

    /// A test number outside the known modes.
    #[error("Invalid test number {test_no}: expected 0, 1, 2 or 3")]
    InvalidTestMode {
        /// The rejected test number.
        test_no: u8,
    },

    /// Any other invalid value.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Setting name.
        field: String,
        /// Why it is invalid.
        reason: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid node id error.
    pub fn invalid_node_id(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::InvalidNodeId { .. } => 1,
            Self::InvalidSeverity { .. } => 2,
            Self::InvalidTestMode { .. } => 3,
            Self::InvalidValue { .. } => 4,
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - the requesting operation failed.
    Warning,
    /// Error - action required.
    Error,
    /// Critical - the session or process cannot continue.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code, formatted as `UA-XXYY`.
///
/// Categories: 1 connection, 2 address space, 3 subscription, 4 transport,
/// 5 configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category (1-5).
    pub category: u8,
    /// Specific error within the category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02}{:02}", self.category, self.code)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UaError::from(AddressSpaceError::path_not_found("Objects/Nope"));
        assert_eq!(err.to_string(), "Path not found: Objects/Nope");

        let err = UaError::from(SubscriptionError::unknown_handle(3, 7));
        assert_eq!(
            err.to_string(),
            "Unknown monitored item handle 7 in subscription 3"
        );
    }

    #[test]
    fn test_categories_and_codes() {
        let err = UaError::not_connected();
        assert_eq!(err.category(), "connection");
        assert_eq!(err.error_code().to_string(), "UA-0104");
        assert!(err.is_fatal_to_session());

        let err = UaError::from(TransportError::delivery_failed(1, "session closed"));
        assert_eq!(err.category(), "transport");
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        assert!(!err.is_fatal_to_session());
    }

    #[test]
    fn test_nothing_is_retryable() {
        let errors = vec![
            UaError::not_connected(),
            AddressSpaceError::node_not_found("ns=2;s=X").into(),
            SubscriptionError::closed(1).into(),
            TransportError::protocol("bad frame").into(),
        ];
        assert!(errors.iter().all(|e| !e.is_retryable()));
    }

    #[test]
    fn test_address_space_severity() {
        assert_eq!(
            AddressSpaceError::type_mismatch("n", "Int32", "String").severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(
            AddressSpaceError::path_not_found("x").severity(),
            ErrorSeverity::Warning
        );
    }

    #[test]
    fn test_fault_serialization_shape() {
        let json = serde_json::to_string(&SubscriptionError::closed(4)).unwrap();
        assert_eq!(json, r#"{"kind":"subscription_closed","subscription_id":4}"#);
    }
}
