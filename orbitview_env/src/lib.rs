//! OrbitView Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the OrbitView
//! tracking engine to run against both a **Production** backend (HTTP over
//! tokio) and a **Simulation** backend (virtual clock, scripted server).
//!
//! # Core Concept: The Reactor Pattern
//!
//! The engine itself never touches I/O. Everything it reacts to is
//! delivered by the host:
//! - Time (`now()`, `wall_clock_secs()`, `sleep()`)
//! - The keyframe stream (`open_stream()` → line events)
//! - Orbit propagation and TLE refresh requests
//!
//! # Example
//!
//! ```ignore
//! use orbitview_env::{HostContext, BackendClient, StreamEvent};
//!
//! async fn client_loop<Ctx: HostContext, B: BackendClient>(ctx: &Ctx, backend: &B) {
//!     let mut events = backend.open_stream().await?;
//!     loop {
//!         tokio::select! {
//!             Some(event) = events.recv() => handle_event(event),
//!             _ = ctx.sleep(Duration::from_millis(16)) => frame(ctx.wall_clock_secs()),
//!         }
//!     }
//! }
//! ```

mod backend;
mod context;
mod error;
mod http_impl;
mod tokio_impl;
mod types;

pub use backend::{BackendClient, StreamReceiver, STREAM_CHANNEL_DEPTH};
pub use context::HostContext;
pub use error::EnvError;
pub use http_impl::HttpBackend;
pub use tokio_impl::TokioContext;
pub use types::{ObjectId, OrbitQuery, StreamEvent};
