//! Common types shared between the host and the engine.

use serde::{Deserialize, Serialize};

/// Numeric catalog identifier of a tracked object (NORAD id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Returns the raw catalog number.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ObjectId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters of a single orbit propagation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrbitQuery {
    /// Object to propagate
    pub id: ObjectId,

    /// Propagation horizon in seconds
    pub horizon_secs: u32,

    /// Spacing between returned samples in seconds
    pub step_secs: u32,
}

/// Events produced by an open keyframe stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One text line of the server-sent event stream (trailing newline stripped)
    Line(String),

    /// The transport failed mid-stream
    Failed(String),

    /// The server closed the stream cleanly
    Closed,
}
