//! Typed errors for inference operations
//!
//! Every failure an operation can end in is one of these variants, so
//! observers can render failures uniformly without string matching.

use thiserror::Error;

/// Coarse classification of an [`InferenceError`]
///
/// This is what UI bindings switch on; the error itself carries the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimited,
    ServiceError,
    MalformedResponse,
    MissingCredential,
    InvalidState,
    InvalidInput,
    Network,
    Cancelled,
}

/// Inference operation errors with typed variants
///
/// - `RateLimited` (429) - backoff ceiling exhausted
/// - `ServiceError` (other non-2xx) - surfaced with the status code, never retried
/// - `MalformedResponse` - 2xx without the expected payload
/// - `MissingCredential` - required key absent; no request was sent
/// - `InvalidState` - an operation was started while another one was pending
/// - `InvalidInput` - caller passed something unusable (e.g. blank prompt)
/// - `Network` - the request never produced an HTTP response
/// - `Cancelled` - the caller stopped waiting before the operation finished
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    /// Rate limit still in force after the last permitted attempt
    #[error("Rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Non-success, non-429 HTTP status
    #[error("Service error: HTTP {status}: {detail}")]
    ServiceError { status: u16, detail: String },

    /// The response parsed as HTTP success but lacked the expected shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A required credential is not configured
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// Attempted to start an operation that is not idle
    #[error("Invalid state: cannot {action} while {state}")]
    InvalidState { state: String, action: String },

    /// Rejected input, detected before any request was issued
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Connection, DNS or body read failure
    #[error("Network error: {0}")]
    Network(String),

    /// The future driving the operation was dropped mid-flight
    #[error("Operation cancelled")]
    Cancelled,
}

impl InferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::RateLimited { .. } => ErrorKind::RateLimited,
            InferenceError::ServiceError { .. } => ErrorKind::ServiceError,
            InferenceError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            InferenceError::MissingCredential(_) => ErrorKind::MissingCredential,
            InferenceError::InvalidState { .. } => ErrorKind::InvalidState,
            InferenceError::InvalidInput(_) => ErrorKind::InvalidInput,
            InferenceError::Network(_) => ErrorKind::Network,
            InferenceError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn invalid_state(state: impl Into<String>, action: impl Into<String>) -> Self {
        InferenceError::InvalidState {
            state: state.into(),
            action: action.into(),
        }
    }

    /// Short message suitable for rendering next to the control that failed
    pub fn user_message(&self) -> String {
        match self {
            InferenceError::RateLimited { .. } => {
                "The service is busy (rate limited). Please try again in a moment.".to_string()
            }
            InferenceError::ServiceError { status, .. } => {
                format!("The service returned an error (HTTP {}).", status)
            }
            InferenceError::MalformedResponse(_) => {
                "The service returned an unexpected response.".to_string()
            }
            InferenceError::MissingCredential(name) => format!("API key missing ({}).", name),
            InferenceError::InvalidState { .. } => {
                "Another request is already in progress.".to_string()
            }
            InferenceError::InvalidInput(reason) => reason.clone(),
            InferenceError::Network(_) => {
                "Could not reach the service. Check your connection.".to_string()
            }
            InferenceError::Cancelled => "The request was cancelled.".to_string(),
        }
    }

    /// Convert network/connection errors into a typed error
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            InferenceError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            InferenceError::Network(format!("Connection failed: {}", e))
        } else {
            InferenceError::Network(e.to_string())
        }
    }
}
