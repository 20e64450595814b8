//! Backend clock synchronization.
//!
//! The backend stamps every keyframe batch with its own clock. Animation
//! must run on that clock, so we track `offset = backendTs - hostNow` and
//! animate at `hostNow + offset`.
//!
//! The first sample after each (re)connection is adopted outright; later
//! samples are blended with an exponential moving average so network
//! jitter does not make the animation time jump.

use tracing::{debug, info};

/// Default weight of a new sample.
pub const DEFAULT_SMOOTHING: f64 = 0.05;

/// Offsets beyond this many seconds are logged as a warning-worthy skew.
const LARGE_SKEW_SECS: f64 = 60.0;

/// Smoothed host→backend clock offset.
#[derive(Debug, Clone)]
pub struct ClockSync {
    /// Current offset in seconds (backend - host)
    offset: f64,

    /// False until the first sample after a (re)connection
    synced: bool,

    /// EMA weight of new samples
    smoothing: f64,

    /// Samples folded in since construction
    samples: u64,
}

impl ClockSync {
    pub fn new(smoothing: f64) -> Self {
        Self {
            offset: 0.0,
            synced: false,
            smoothing: smoothing.clamp(f64::EPSILON, 1.0),
            samples: 0,
        }
    }

    /// Folds in one `(backend timestamp, host now)` observation and returns the new offset.
    pub fn observe(&mut self, backend_ts: f64, host_now: f64) -> f64 {
        let measured = backend_ts - host_now;

        if self.synced {
            self.offset = self.offset * (1.0 - self.smoothing) + measured * self.smoothing;
        } else {
            self.offset = measured;
            self.synced = true;
            if measured.abs() > LARGE_SKEW_SECS {
                info!("Backend clock offset {:.1}s (large host/backend skew)", measured);
            } else {
                debug!("Backend clock offset {:.3}s", measured);
            }
        }

        self.samples += 1;
        self.offset
    }

    /// Forgets the synced state; the next sample will be adopted directly.
    pub fn mark_unsynced(&mut self) {
        self.synced = false;
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Animation time for the given host time.
    pub fn backend_now(&self, host_now: f64) -> f64 {
        host_now + self.offset
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}
