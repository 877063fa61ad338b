//! Error types for kvecs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Ring / Config Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Allocation Errors ===
    #[error("Insufficient capacity: requested {requested}, available {available}")]
    Capacity { requested: usize, available: usize },

    #[error("Launch failed for {node}: {reason}")]
    LaunchFailed { node: String, reason: String },

    // === Coordination Store Errors ===
    #[error("Coordination store unavailable: {0}")]
    CoordinationUnavailable(String),

    #[error("No node at path: {0}")]
    NoNode(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // === Await Errors ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::CoordinationUnavailable(_) | Error::Capacity { .. }
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NoNode(_) => StatusCode::NOT_FOUND,
            Error::NodeExists(_) | Error::NotEmpty(_) => StatusCode::CONFLICT,
            Error::Configuration(_) | Error::InvalidConfig(_) | Error::InvalidPath(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::Capacity { .. } | Error::CoordinationUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_retryable() {
        assert!(Error::Timeout("await".into()).is_retryable());
        assert!(Error::Capacity {
            requested: 3,
            available: 3
        }
        .is_retryable());
        assert!(!Error::Configuration("dup".into()).is_retryable());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(
            Error::NoNode("/ecs/a".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::CoordinationUnavailable("down".into()).to_http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
