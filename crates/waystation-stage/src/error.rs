//! Error types for the stage server.
//!
//! Request-level failures are [`waystation_core::StageError`] and become
//! HTTP responses. The errors here stop the process from starting or
//! serving.

use thiserror::Error;
use waystation_telemetry::TelemetryError;

/// Server-level errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// The listener could not be bound.
    #[error("Bind error: failed to bind to {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Telemetry bootstrap failed.
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
