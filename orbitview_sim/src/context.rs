//! Simulation context implementing HostContext for deterministic testing.

use async_trait::async_trait;
use orbitview_env::HostContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 2024-05-01 00:00:00 UTC
pub const DEFAULT_EPOCH_SECS: f64 = 1_714_521_600.0;

/// Simulation context backed by a virtual clock.
///
/// Virtual time only moves when the runner advances it (or a task sleeps),
/// so every run with the same seed sees the same timeline.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<AtomicU64>,

    /// Wall-clock Unix seconds at virtual time 0
    epoch_secs: f64,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(AtomicU64::new(0)),
            epoch_secs: DEFAULT_EPOCH_SECS,
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Maps virtual time 0 to a different wall-clock instant.
    pub fn with_epoch(mut self, epoch_secs: f64) -> Self {
        self.epoch_secs = epoch_secs;
        self
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        self.virtual_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        self.virtual_time_ns.load(Ordering::SeqCst)
    }

    /// Seconds since simulation start.
    pub fn elapsed_secs(&self) -> f64 {
        self.time_ns() as f64 * 1e-9
    }

    pub fn epoch_secs(&self) -> f64 {
        self.epoch_secs
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            epoch_secs: self.epoch_secs,
        }
    }
}

#[async_trait]
impl HostContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn wall_clock_secs(&self) -> f64 {
        self.epoch_secs + self.elapsed_secs()
    }

    async fn sleep(&self, duration: Duration) {
        // Sleeping is the only way simulated tasks let time pass
        self.advance_time(duration);
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::trace!("spawning sim task {}", name);
        tokio::spawn(future);
    }
}
