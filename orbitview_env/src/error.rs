//! Error types for the OrbitView environment abstraction.

use thiserror::Error;

/// Errors that can occur talking to the backend.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Transport failure (connect refused, reset, DNS, ...)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Backend answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The stream ended while the caller still expected data
    #[error("Stream closed")]
    StreamClosed,

    /// Request or response body could not be (de)serialized
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// True for failures worth retrying on the next refresh cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkError(_) | Self::StreamClosed | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::SerializationError(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display() {
        let err = EnvError::http(503, "propagator busy");
        assert_eq!(err.to_string(), "HTTP 503: propagator busy");
    }

    #[test]
    fn test_transient_classification() {
        assert!(EnvError::network("reset").is_transient());
        assert!(EnvError::http(502, "bad gateway").is_transient());
        assert!(!EnvError::http(404, "not found").is_transient());
        assert!(!EnvError::SerializationError("bad".into()).is_transient());
    }
}
