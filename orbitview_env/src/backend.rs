//! Backend transport abstraction for the OrbitView host.

use crate::error::EnvError;
use crate::types::{OrbitQuery, StreamEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Buffered stream events before the reader task applies backpressure.
pub const STREAM_CHANNEL_DEPTH: usize = 256;

/// Receiving half of an open keyframe stream.
pub type StreamReceiver = mpsc::Receiver<StreamEvent>;

/// Abstraction over the propagation backend.
///
/// # Implementations
///
/// - **Production**: `HttpBackend` - reqwest against the REST/SSE API
///
/// # Stream Flow
///
/// ```text
/// Host                       Backend
///   |-- open_stream() -------->|
///   |<-- Ok(receiver) ---------|   (connection opened)
///   |<-- Line("data: {...}") --|   (metadata, keyframe batches, keepalives)
///   |<-- Failed / Closed ------|   (host schedules a reconnect)
/// ```
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    /// Opens the keyframe stream.
    ///
    /// # Returns
    /// * `Ok(receiver)` - The stream is open; lines arrive on the receiver
    /// * `Err(EnvError)` - The connection could not be established
    async fn open_stream(&self) -> Result<StreamReceiver, EnvError>;

    /// Requests a propagated trajectory and returns the raw response body.
    async fn fetch_orbit(&self, query: OrbitQuery) -> Result<String, EnvError>;

    /// Asks the backend to reload its element sets and returns the raw response body.
    async fn refresh_tles(&self) -> Result<String, EnvError>;

    /// Human-readable endpoint description for logs.
    fn endpoint(&self) -> String;
}
