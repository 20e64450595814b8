//! Core environment context trait for the OrbitView host.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the tracking engine can run
/// in both production (tokio) and simulation (virtual clock) environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and the system clock
/// - **Simulation**: `SimContext` - a virtual clock advanced by the scenario runner
#[async_trait]
pub trait HostContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for frame pacing and timer deadlines.
    fn now(&self) -> Duration;

    /// Returns the host wall-clock time as Unix seconds.
    ///
    /// This is the `hostNow` the clock synchronizer compares against
    /// backend keyframe timestamps. In simulation it is derived from the
    /// virtual clock plus a configured epoch.
    fn wall_clock_secs(&self) -> f64;

    /// Suspends execution for the given duration.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task (orbit fetches, stream readers).
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
