//! Error types for the OrbitView engine.
//!
//! None of these are fatal to the engine: every caller logs and degrades
//! (drops the message, skips the orbit, keeps the last visuals).

use orbitview_env::ObjectId;
use thiserror::Error;

/// Failures decoding a stream line or response body.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    MalformedJson(String),

    #[error("Message has no \"type\" field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} message: {reason}")]
    InvalidMessage { kind: &'static str, reason: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid position format")]
    InvalidPositionFormat,
}

/// Keyframe buffer rejections.
#[derive(Debug, Error, PartialEq)]
pub enum KeyframeError {
    #[error("Out-of-order keyframe: {got} is not after newest {newest}")]
    OutOfOrder { newest: f64, got: f64 },

    #[error("Non-finite keyframe timestamp")]
    NonFiniteTimestamp,
}

/// Orbit fetch / normalization failures, surfaced as per-object status.
#[derive(Debug, Error)]
pub enum OrbitError {
    #[error("Orbit for {id} has {got} usable points (need at least 2)")]
    NotEnoughPoints { id: ObjectId, got: usize },

    #[error("Orbit response rejected: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Orbit fetch failed: {0}")]
    Fetch(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
