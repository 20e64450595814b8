//! Keyframe stream connection lifecycle.
//!
//! The manager is a pure state machine: the host opens and closes the real
//! transport and reports what happened; the manager decides when to
//! reconnect.
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──on_open──▶ Connected
//!                               ▲  │                    │
//!                     poll()    │  │ on_error           │ on_error / on_closed
//!                  (deadline)   │  ▼                    ▼
//!                            Reconnecting ◀─────────────┘
//! ```
//!
//! Reconnect delays grow exponentially (`base × 2^attempts`, capped) and
//! reset to `base` after a successful open. At most one reconnect is ever
//! pending: scheduling a new one replaces the old deadline. Every connect
//! bumps a generation number; events carrying an older generation come
//! from a transport that was already superseded and are ignored.
//!
//! A transport the host opened stays live until it reports an error or a
//! close. Replacing it (manual reconnect, disconnect) hands its ticket back
//! so the host can close it before the next one opens.

use crate::clock_sync::ClockSync;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Connection state as shown in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Exponential backoff with a ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_secs: f64,
    pub max_secs: f64,
}

impl BackoffPolicy {
    pub fn new(base_secs: f64, max_secs: f64) -> Self {
        Self { base_secs, max_secs }
    }

    /// Delay before the reconnect following `attempts` failed ones.
    pub fn delay(&self, attempts: u32) -> f64 {
        let factor = 2f64.powi(attempts.min(62) as i32);
        (self.base_secs * factor).min(self.max_secs)
    }
}

/// Identifies one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionTicket {
    pub generation: u64,
}

/// Stream reconnect state machine.
#[derive(Debug, Clone)]
pub struct StreamConnectionManager {
    state: ConnectionState,
    policy: BackoffPolicy,

    /// Consecutive reconnects scheduled since the last successful open
    attempts: u32,

    /// Generation of the current (or most recent) connection attempt
    generation: u64,

    /// Host time of the single pending reconnect, if any
    reconnect_deadline: Option<f64>,

    /// Attempt whose transport has not reported an error or close yet
    live_transport: Option<ConnectionTicket>,

    status_text: String,
}

impl StreamConnectionManager {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            attempts: 0,
            generation: 0,
            reconnect_deadline: None,
            live_transport: None,
            status_text: "Disconnected".to_string(),
        }
    }

    /// Starts a new connection attempt; any pending reconnect is cancelled
    /// and events from earlier attempts become stale.
    pub fn connect(&mut self) -> ConnectionTicket {
        self.reconnect_deadline = None;
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.status_text = "Connecting...".to_string();
        debug!("Stream connect (generation {})", self.generation);
        let ticket = ConnectionTicket {
            generation: self.generation,
        };
        self.live_transport = Some(ticket);
        ticket
    }

    /// User-initiated reconnect: resets the backoff and connects now.
    ///
    /// Returns the transport to close first, if one is still live.
    pub fn manual_reconnect(&mut self) -> (Option<ConnectionTicket>, ConnectionTicket) {
        let superseded = self.live_transport.take();
        self.attempts = 0;
        (superseded, self.connect())
    }

    pub fn is_current(&self, ticket: ConnectionTicket) -> bool {
        ticket.generation == self.generation
    }

    /// The transport opened. Resets the backoff and the clock sync.
    pub fn on_open(&mut self, ticket: ConnectionTicket, clock: &mut ClockSync) -> bool {
        if !self.is_current(ticket) {
            debug!("Ignoring open from stale generation {}", ticket.generation);
            return false;
        }
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.status_text = "Connected".to_string();
        clock.mark_unsynced();
        info!("Keyframe stream connected");
        true
    }

    /// The transport failed (to open, or mid-stream). Returns the scheduled delay.
    pub fn on_error(&mut self, ticket: ConnectionTicket, now: f64, reason: &str) -> Option<f64> {
        if !self.is_current(ticket) {
            debug!("Ignoring error from stale generation {}: {}", ticket.generation, reason);
            return None;
        }
        warn!("Keyframe stream error: {}", reason);
        self.live_transport = None;
        self.status_text = "Connection Lost".to_string();
        Some(self.schedule_reconnect(now))
    }

    /// The server ended the stream; treated like an error.
    pub fn on_closed(&mut self, ticket: ConnectionTicket, now: f64) -> Option<f64> {
        self.on_error(ticket, now, "stream closed by server")
    }

    fn schedule_reconnect(&mut self, now: f64) -> f64 {
        let delay = self.policy.delay(self.attempts);
        info!(
            "Reconnecting in {:.1}s (attempt {})",
            delay,
            self.attempts + 1
        );
        self.reconnect_deadline = Some(now + delay);
        self.attempts += 1;
        self.state = ConnectionState::Reconnecting;
        self.status_text = format!("Reconnecting in {}s...", delay.round() as u64);
        delay
    }

    /// Fires the pending reconnect if its deadline has passed.
    pub fn poll(&mut self, now: f64) -> Option<ConnectionTicket> {
        match self.reconnect_deadline {
            Some(deadline) if deadline <= now => Some(self.connect()),
            _ => None,
        }
    }

    /// Drops the connection without scheduling a reconnect.
    ///
    /// Returns the transport the host must close, if one is still live.
    pub fn disconnect(&mut self) -> Option<ConnectionTicket> {
        self.reconnect_deadline = None;
        self.generation += 1;
        self.state = ConnectionState::Disconnected;
        self.status_text = "Disconnected".to_string();
        self.live_transport.take()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn pending_deadline(&self) -> Option<f64> {
        self.reconnect_deadline
    }

    pub fn live_transport(&self) -> Option<ConnectionTicket> {
        self.live_transport
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn manager() -> StreamConnectionManager {
        StreamConnectionManager::new(BackoffPolicy::new(1.0, 30.0))
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = BackoffPolicy::new(1.0, 30.0);
        let delays: Vec<f64> = (0..7).map(|a| policy.delay(a)).collect();
        assert_eq!(delays, vec![1.0, 2.0, 4.0, 8.0, 16.0, 30.0, 30.0]);
        assert_eq!(policy.delay(u32::MAX), 30.0);
    }

    #[test]
    fn test_repeated_failures_back_off() {
        let mut mgr = manager();
        let mut now = 0.0;
        let mut ticket = mgr.connect();
        let mut delays = Vec::new();

        for _ in 0..6 {
            let delay = mgr.on_error(ticket, now, "refused").unwrap();
            delays.push(delay);
            assert_eq!(mgr.state(), ConnectionState::Reconnecting);
            assert!(mgr.poll(now + delay - 0.01).is_none());
            now += delay;
            ticket = mgr.poll(now).unwrap();
        }
        assert_eq!(delays, vec![1.0, 2.0, 4.0, 8.0, 16.0, 30.0]);
        assert_eq!(mgr.status_text(), "Connecting...");
    }

    #[test]
    fn test_open_resets_backoff_and_clock() {
        let mut mgr = manager();
        let mut clock = ClockSync::default();
        clock.observe(110.0, 100.0);

        let t = mgr.connect();
        mgr.on_error(t, 0.0, "x");
        let t = mgr.poll(1.0).unwrap();
        mgr.on_error(t, 1.0, "x");
        assert_eq!(mgr.attempts(), 2);

        let t = mgr.poll(3.0).unwrap();
        assert!(mgr.on_open(t, &mut clock));
        assert_eq!(mgr.attempts(), 0);
        assert_eq!(mgr.state(), ConnectionState::Connected);
        assert!(!clock.is_synced());

        assert_relative_eq!(mgr.on_closed(t, 10.0).unwrap(), 1.0);
    }

    #[test]
    fn test_single_pending_reconnect() {
        let mut mgr = manager();
        let t = mgr.connect();
        mgr.on_error(t, 0.0, "a");
        // A duplicate error for the same attempt replaces the deadline
        mgr.on_error(t, 0.5, "b");
        assert_relative_eq!(mgr.pending_deadline().unwrap(), 2.5);

        // A manual reconnect cancels the pending one
        let (superseded, manual) = mgr.manual_reconnect();
        assert!(superseded.is_none());
        assert!(mgr.pending_deadline().is_none());
        assert_eq!(mgr.attempts(), 0);
        assert!(mgr.poll(100.0).is_none());
        assert!(mgr.is_current(manual));
    }

    #[test]
    fn test_stale_events_ignored() {
        let mut mgr = manager();
        let mut clock = ClockSync::default();
        let old = mgr.connect();
        let (superseded, new) = mgr.manual_reconnect();
        assert_eq!(superseded, Some(old));

        assert!(!mgr.on_open(old, &mut clock));
        assert!(mgr.on_error(old, 0.0, "late").is_none());
        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert!(mgr.on_open(new, &mut clock));
    }

    #[test]
    fn test_status_text() {
        let mut mgr = manager();
        assert_eq!(mgr.status_text(), "Disconnected");
        let t = mgr.connect();
        mgr.on_error(t, 0.0, "x");
        let t = mgr.poll(1.0).unwrap();
        mgr.on_error(t, 1.0, "x");
        assert_eq!(mgr.status_text(), "Reconnecting in 2s...");
    }

    #[test]
    fn test_live_transport_handed_back() {
        let mut mgr = manager();
        let mut clock = ClockSync::default();
        let first = mgr.connect();
        assert!(mgr.on_open(first, &mut clock));
        assert_eq!(mgr.live_transport(), Some(first));

        let (superseded, second) = mgr.manual_reconnect();
        assert_eq!(superseded, Some(first));
        assert_eq!(mgr.live_transport(), Some(second));

        // A transport that already failed needs no close
        mgr.on_error(second, 0.0, "reset");
        assert!(mgr.live_transport().is_none());
        let third = mgr.poll(1.0).unwrap();
        assert_eq!(mgr.disconnect(), Some(third));
        assert!(mgr.disconnect().is_none());
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
    }

    proptest! {
        #[test]
        fn prop_backoff_monotonic_and_capped(
            base in 0.01f64..10.0,
            ceiling in 10.0f64..600.0,
            attempts in proptest::collection::vec(any::<u32>(), 1..40),
        ) {
            let policy = BackoffPolicy::new(base, ceiling);
            let mut sorted = attempts;
            sorted.extend([0, 61, 62, 63, u32::MAX]);
            sorted.sort_unstable();

            let mut previous = 0.0;
            for a in sorted {
                let delay = policy.delay(a);
                prop_assert!(delay.is_finite());
                prop_assert!(delay >= previous);
                prop_assert!(delay <= ceiling);
                prop_assert!(delay >= base.min(ceiling));
                previous = delay;
            }
            prop_assert_eq!(policy.delay(u32::MAX), ceiling);
        }
    }
}
