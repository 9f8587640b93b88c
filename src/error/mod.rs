//! Error handling module for the fan-out server

use hyper::StatusCode;
use thiserror::Error;
use tokio::time::error::Elapsed;

use crate::models::BackendAddress;

/// Custom error type for the fan-out server
#[derive(Error, Debug)]
pub enum Error {
    #[error("Pool exhausted for {address}: max connections {max_size} reached")]
    PoolExhausted {
        address: BackendAddress,
        max_size: usize,
    },

    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailure {
        address: BackendAddress,
        reason: String,
    },

    #[error("Backend responded with status {0}")]
    BackendStatus(StatusCode),

    #[error("Malformed backend payload: {0}")]
    MalformedPayload(String),

    #[error("Backend returned an empty payload")]
    EmptyPayload,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Transport(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout error: {0}")]
    Timeout(#[from] Elapsed),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend worker pool is shut down")]
    WorkerPoolClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for the fan-out server
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Status code the inbound caller observes for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Error::PoolExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::BackendStatus(status) => *status,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedPayload(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

/// Terminal failure recorded on an inbound request.
///
/// Unlike [`Error`] this is cheap to clone, so every observer of the
/// completion signal gets its own copy of the same outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    pub status: StatusCode,
    pub cause: String,
}

impl RequestFailure {
    pub fn new(status: StatusCode, cause: impl Into<String>) -> Self {
        Self {
            status,
            cause: cause.into(),
        }
    }
}

impl From<&Error> for RequestFailure {
    fn from(err: &Error) -> Self {
        Self::new(err.status(), err.to_string())
    }
}

impl From<Error> for RequestFailure {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

impl std::fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhausted_maps_to_service_unavailable() {
        let err = Error::PoolExhausted {
            address: BackendAddress::new("localhost", 8989),
            max_size: 4,
        };
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("localhost:8989"));
    }

    #[test]
    fn test_backend_status_is_carried_through() {
        let failure = RequestFailure::from(Error::BackendStatus(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(failure.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_other_errors_are_internal() {
        assert_eq!(
            Error::MalformedPayload("eof".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(Error::EmptyPayload.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(Error::BadRequest("id".into()).status(), StatusCode::BAD_REQUEST);
    }
}
