//! Stage error taxonomy.

use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a stage can return to its caller.
///
/// Exporter failures are deliberately absent: they are handled inside the
/// flush barrier and never reach the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The resolved data failed stage validation.
    #[error("{message}")]
    InvalidInput {
        /// Human-readable reason.
        message: String,
    },

    /// The request body is not a valid request.
    #[error("{message}")]
    MalformedBody {
        /// Parser message.
        message: String,
    },

    /// Unclassified fault while running the stage.
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl StageError {
    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a malformed body error.
    pub fn malformed_body(message: impl Into<String>) -> Self {
        Self::MalformedBody {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::MalformedBody { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error category for metrics and logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid",
            Self::MalformedBody { .. } => "malformed",
            Self::Internal { .. } => "internal",
        }
    }

    /// Returns `true` if the caller sent something the stage refused.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed_body(err.to_string())
    }
}

/// Result type for stage operations.
pub type StageResult<T> = Result<T, StageError>;

/// Error body: `{"detail": "<message>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub detail: String,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl From<&StageError> for ErrorResponse {
    fn from(err: &StageError) -> Self {
        Self::new(err.to_string())
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = StageError::invalid_input("Input must be non-empty");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.category(), "invalid");
        assert!(err.is_rejection());

        let err = StageError::malformed_body("expected value");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let err = StageError::internal("boom");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_invalid_input_displays_bare_message() {
        let err = StageError::invalid_input("Text length must be <= 10000");
        assert_eq!(err.to_string(), "Text length must be <= 10000");
    }

    #[test]
    fn test_json_error_is_malformed() {
        let err: StageError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.category(), "malformed");
    }

    #[test]
    fn test_error_response_shape() {
        let resp = ErrorResponse::from(&StageError::invalid_input("bad"));
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            serde_json::json!({"detail": "bad"})
        );
    }
}
