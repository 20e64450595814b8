//! OrbitView Core - Real-Time Satellite State Sync & Trajectory Engine
//!
//! This library turns a sparse, irregular feed of satellite positions into
//! smooth per-frame motion and layered trajectory visuals:
//! 1. **Stream Sync**: keyframe stream ingestion, backend clock offset, reconnect backoff
//! 2. **Motion**: bracketed keyframe interpolation in rotating batches
//! 3. **Trajectories**: cached orbit fetches normalized to meters / Earth-fixed,
//!    rendered with distance LOD, spline smoothing, history trails,
//!    uncertainty corridors and TLE staleness cues
//!
//! The engine performs no I/O. A host feeds it stream lines, orbit response
//! bodies and a per-frame camera, and executes the [`EngineCommand`]s it
//! hands back.

pub mod clock_sync;
pub mod config;
pub mod curves;
pub mod engine;
pub mod error;
pub mod frames;
pub mod geometry;
pub mod history_trail;
pub mod interpolation;
pub mod keyframes;
pub mod lod;
pub mod orbit_cache;
pub mod protocol;
pub mod pulse;
pub mod render;
pub mod staleness;
pub mod stream;
pub mod uncertainty;

// Re-export key types for convenience
pub use config::EngineConfig;
pub use engine::{EngineCommand, EngineStats, FrameSnapshot, OrbitStatus, TrackingEngine};
pub use error::{ConfigError, KeyframeError, OrbitError, ProtocolError};
pub use geometry::{Camera, Frustum, Vec3};
pub use lod::LodTier;
pub use orbit_cache::OrbitRequest;
pub use render::{RenderBackend, SceneRecorder};
pub use staleness::StalenessLevel;
pub use stream::{ConnectionState, ConnectionTicket, StreamConnectionManager};
pub use uncertainty::UncertaintyMode;
