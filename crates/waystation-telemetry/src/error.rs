//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur during telemetry operations.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize metrics.
    #[error("Failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// Failed to initialize tracing.
    #[error("Failed to initialize tracing: {0}")]
    TracingInit(String),

    /// Failed to initialize logging.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to parse address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The tracer provider was already installed in this process.
    #[error("Tracing is already initialized for this process")]
    AlreadyInitialized,

    /// The trace exporter could not be reached or did not answer in time.
    ///
    /// Only ever logged; never surfaced to a stage caller.
    #[error("Trace exporter unavailable: {0}")]
    ExportUnavailable(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::MetricsInit("failed".to_string());
        assert_eq!(err.to_string(), "Failed to initialize metrics: failed");

        let err = TelemetryError::ExportUnavailable("connection refused".to_string());
        assert_eq!(
            err.to_string(),
            "Trace exporter unavailable: connection refused"
        );
    }

    #[test]
    fn test_already_initialized_display() {
        assert!(TelemetryError::AlreadyInitialized
            .to_string()
            .contains("already initialized"));
    }
}
