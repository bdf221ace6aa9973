//! Error types for lxops
//!
//! This module provides the error taxonomy used across the crate:
//! - Transport errors from HTTP calls and stream transports
//! - Cancellation, kept distinct from transport failures
//! - Precondition violations (cancelling a non-cancelable operation, mutating
//!   a finished one, signalling completion twice)
//! - HTTP status code mapping and structured JSON bodies for the API

use crate::cancel::RequestId;
use crate::types::OperationId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for lxops operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lxops
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error
        key: Option<String>,
    },

    /// Network error from the HTTP client, passed through unmodified
    #[error(transparent)]
    Network(#[from] reqwest::Error),

    /// A cancelable request was aborted through its cancellation token
    #[error("request canceled")]
    RequestCanceled,

    /// Work was stopped because its operation was cancelled
    #[error("{0}")]
    Cancelled(String),

    /// Cancel was requested but nothing is currently cancelable
    #[error("operation cannot be canceled at this time")]
    NotCancelable,

    /// A request id was registered twice with the same canceler
    #[error("request {0} is already registered")]
    DuplicateRequest(RequestId),

    /// Operation not found
    #[error("operation not found: {0}")]
    NotFound(String),

    /// The operation is not in a state that allows the requested action
    #[error("cannot {action} operation {id} in state {current_state}")]
    InvalidState {
        /// The operation the action was attempted on
        id: OperationId,
        /// The attempted action (e.g., "start", "cancel")
        action: String,
        /// Display form of the current status
        current_state: String,
    },

    /// The operation already reached a final status and can no longer change
    #[error("operation {id} has already finished")]
    OperationFinished {
        /// The finished operation
        id: OperationId,
    },

    /// The completion channel was already signalled
    #[error("completion of operation {id} was already signalled")]
    CompletionAlreadySignalled {
        /// The operation whose completion was signalled twice
        id: OperationId,
    },

    /// The task attached to an operation does not fit its class
    #[error("invalid operation task: {0}")]
    InvalidTask(String),

    /// A stream secret did not match any channel of the operation
    #[error("permission denied: {0}")]
    Forbidden(String),

    /// Downloaded content did not match its expected hash
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Expected hex-encoded SHA-256
        expected: String,
        /// Actual hex-encoded SHA-256
        actual: String,
    },

    /// Stream relay failure
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Shutdown in progress - not accepting new operations
    #[error("shutdown in progress: not accepting new operations")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means the work was cancelled rather than failed
    ///
    /// Cancellation is neither a success nor a retryable failure; operations
    /// finishing with such an error end in `Cancelled`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::RequestCanceled | Error::Cancelled(_))
    }
}

/// Errors terminating one direction of a stream relay
///
/// These never fail an operation by themselves; the affected direction stops
/// and the other direction carries on.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The message transport failed (connection reset, protocol error, ...)
    #[error("transport error: {0}")]
    Transport(String),

    /// The sink accepted fewer bytes than the frame carried
    #[error("short write: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes accepted by the sink
        written: usize,
        /// Bytes in the frame
        expected: usize,
    },

    /// The peer is gone
    #[error("transport closed")]
    Closed,

    /// I/O error on the local source or sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<axum::Error> for StreamError {
    fn from(error: axum::Error) -> Self {
        StreamError::Transport(error.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match error {
            WsError::ConnectionClosed | WsError::AlreadyClosed => StreamError::Closed,
            other => StreamError::Transport(other.to_string()),
        }
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_cancelable",
///     "message": "operation cannot be canceled at this time"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "not_cancelable")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::NotCancelable => 400,
            Error::InvalidState { .. } => 400,
            Error::InvalidTask(_) => 400,

            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,

            Error::OperationFinished { .. } => 409,
            Error::CompletionAlreadySignalled { .. } => 409,
            Error::DuplicateRequest(_) => 409,

            Error::HashMismatch { .. } => 422,

            Error::Network(_) => 502,
            Error::Stream(_) => 502,

            Error::ShuttingDown => 503,

            Error::RequestCanceled | Error::Cancelled(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Network(_) => "network_error",
            Error::RequestCanceled => "request_canceled",
            Error::Cancelled(_) => "cancelled",
            Error::NotCancelable => "not_cancelable",
            Error::DuplicateRequest(_) => "duplicate_request",
            Error::NotFound(_) => "not_found",
            Error::InvalidState { .. } => "invalid_state",
            Error::OperationFinished { .. } => "operation_finished",
            Error::CompletionAlreadySignalled { .. } => "completion_already_signalled",
            Error::InvalidTask(_) => "invalid_task",
            Error::Forbidden(_) => "forbidden",
            Error::HashMismatch { .. } => "hash_mismatch",
            Error::Stream(_) => "stream_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::InvalidState {
                id,
                action,
                current_state,
            } => Some(serde_json::json!({
                "operation_id": id,
                "action": action,
                "current_state": current_state,
            })),
            Error::OperationFinished { id } | Error::CompletionAlreadySignalled { id } => {
                Some(serde_json::json!({ "operation_id": id }))
            }
            Error::HashMismatch { expected, actual } => Some(serde_json::json!({
                "expected": expected,
                "actual": actual,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
