// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the uaperf binary.

use thiserror::Error;
use uaperf_core::UaError;

/// Result type alias for uaperf-bin operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors that can occur in the uaperf binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Initialization error.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Runtime error.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Pipeline error.
    #[error(transparent)]
    Ua(#[from] UaError),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        /// The context description.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates an initialization error.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    /// Creates a runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Creates an I/O error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Adds context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the exit code for this error.
    ///
    /// Pipeline errors map to one code per category.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Initialization(_) => 2,
            Self::Runtime(_) => 3,
            Self::Io(_) => 4,
            Self::Ua(e) => match e {
                UaError::Connection(_) => 5,
                UaError::AddressSpace(_) => 6,
                UaError::Subscription(_) => 7,
                UaError::Transport(_) => 8,
                UaError::Configuration(_) => 1,
            },
            Self::WithContext { source, .. } => source.exit_code(),
        }
    }
}

impl From<std::io::Error> for BinError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<anyhow::Error> for BinError {
    fn from(err: anyhow::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Reports an error with appropriate formatting.
pub fn report_error(error: &BinError) {
    eprintln!("Error: {}", error);

    // Print cause chain
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }
}

/// Reports an error and exits with the appropriate code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uaperf_core::error::{
        AddressSpaceError, ConfigurationError, ConnectionError, SubscriptionError, TransportError,
    };

    #[test]
    fn test_error_creation() {
        let err = BinError::config("test error");
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_error_with_context() {
        let err = BinError::config("inner error").with_context("outer context");
        assert_eq!(err.to_string(), "outer context: Configuration error: inner error");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BinError::config("test").exit_code(), 1);
        assert_eq!(BinError::init("test").exit_code(), 2);
        assert_eq!(BinError::runtime("test").exit_code(), 3);
        assert_eq!(BinError::io("test").exit_code(), 4);
    }

    #[test]
    fn test_pipeline_exit_codes() {
        let code = |e: UaError| BinError::from(e).exit_code();
        assert_eq!(code(ConnectionError::refused("opc.tcp://localhost:1/x").into()), 5);
        assert_eq!(code(AddressSpaceError::path_not_found("Objects/Nope").into()), 6);
        assert_eq!(code(SubscriptionError::closed(1).into()), 7);
        assert_eq!(code(TransportError::protocol("bad frame").into()), 8);
        assert_eq!(
            code(ConfigurationError::invalid_value("port", "must not be 0").into()),
            1
        );
    }

    #[test]
    fn test_anyhow_is_runtime() {
        let err = BinError::from(anyhow::anyhow!("task failed"));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.to_string(), "Runtime error: task failed");
    }

    #[test]
    fn test_context_keeps_exit_code() {
        let err = BinError::from(UaError::not_connected()).with_context("failed to browse");
        assert_eq!(err.exit_code(), 5);
    }
}
