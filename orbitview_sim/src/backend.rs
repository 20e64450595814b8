//! Simulated propagation backend with fault injection.
//!
//! [`SimServer`] produces the exact wire text a real backend would: SSE
//! stream lines and propagate response bodies. Faults (clock skew, refused
//! connections, dropped streams, garbage lines, failing propagations, km or
//! inertial responses, stale element sets) are configured per scenario in a
//! [`FaultPlan`] and rolled from a seeded RNG. The scenario runner plays
//! the transport itself, handing these lines to the engine with the
//! latencies the scenario asks for.

use crate::constellation::Constellation;
use chrono::{DateTime, SecondsFormat};
use orbitview_core::Vec3;
use orbitview_env::{EnvError, OrbitQuery};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

/// Units the backend answers propagate requests in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum OrbitUnits {
    #[default]
    Meters,
    Kilometers,
}

/// Frame the backend answers propagate requests in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum OrbitFrame {
    #[default]
    EarthFixed,
    Inertial,
}

/// Faults and quirks injected by the simulated backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultPlan {
    /// Backend clock minus host clock (seconds)
    pub clock_skew_secs: f64,

    pub orbit_units: OrbitUnits,
    pub orbit_frame: OrbitFrame,

    /// Probability a propagate request answers 503
    pub fetch_failure_rate: f64,

    /// Probability a stream line is truncated garbage
    pub malformed_line_rate: f64,

    /// Probability a satellite entry inside a batch is malformed
    pub bad_satellite_rate: f64,

    /// The live stream is cut this long after each successful open
    pub drop_every_secs: Option<f64>,

    /// Connection attempts refused after each drop
    pub refusals_after_drop: u32,

    /// `tle_age_seconds` reported in stream metadata
    pub dataset_tle_age_secs: f64,

    /// Per-object element set age reported with each orbit
    pub object_tle_age_secs: Option<f64>,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self {
            clock_skew_secs: 0.0,
            orbit_units: OrbitUnits::Meters,
            orbit_frame: OrbitFrame::EarthFixed,
            fetch_failure_rate: 0.0,
            malformed_line_rate: 0.0,
            bad_satellite_rate: 0.0,
            drop_every_secs: None,
            refusals_after_drop: 0,
            dataset_tle_age_secs: 3600.0,
            object_tle_age_secs: None,
        }
    }
}

/// Formats Unix seconds as an RFC 3339 UTC timestamp with milliseconds.
pub fn iso8601(unix_secs: f64) -> String {
    DateTime::from_timestamp_millis((unix_secs * 1000.0).round() as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn sse(payload: serde_json::Value) -> String {
    format!("data: {}", payload)
}

/// Counters of what the server did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub connections_accepted: u64,
    pub connections_refused: u64,
    pub streams_dropped: u64,
    pub batches_sent: u64,
    pub lines_corrupted: u64,
    pub propagations: u64,
    pub propagation_failures: u64,
    pub tle_refreshes: u64,
}

/// Scripted backend producing wire text.
#[derive(Debug, Clone)]
pub struct SimServer {
    constellation: Constellation,
    faults: FaultPlan,
    rng: ChaCha8Rng,

    /// Refusals still owed since the last drop
    refusals_left: u32,

    /// Backend time at which the live stream gets cut
    drop_at: Option<f64>,

    /// Backend time the element sets were last reloaded
    tles_loaded_at: Option<f64>,

    stats: ServerStats,
}

impl SimServer {
    pub fn new(seed: u64, constellation: Constellation, faults: FaultPlan) -> Self {
        Self {
            constellation,
            faults,
            rng: ChaCha8Rng::seed_from_u64(seed ^ 0x5eed_0f_5e4e),
            refusals_left: 0,
            drop_at: None,
            tles_loaded_at: None,
            stats: ServerStats::default(),
        }
    }

    pub fn constellation(&self) -> &Constellation {
        &self.constellation
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    /// Backend clock reading at host time `host_now`.
    pub fn backend_time(&self, host_now: f64) -> f64 {
        host_now + self.faults.clock_skew_secs
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.gen_bool(probability.min(1.0))
    }

    /// Decides whether a connection attempt at `backend_now` succeeds.
    pub fn accept_connection(&mut self, backend_now: f64) -> bool {
        if self.refusals_left > 0 {
            self.refusals_left -= 1;
            self.stats.connections_refused += 1;
            debug!("Refusing stream connection ({} more)", self.refusals_left);
            return false;
        }
        self.stats.connections_accepted += 1;
        self.drop_at = self.faults.drop_every_secs.map(|every| backend_now + every);
        true
    }

    /// True once the live stream should be cut. Arms the refusals that follow.
    pub fn should_drop(&mut self, backend_now: f64) -> bool {
        match self.drop_at {
            Some(at) if backend_now >= at => {
                self.drop_at = None;
                self.refusals_left = self.faults.refusals_after_drop;
                self.stats.streams_dropped += 1;
                true
            }
            _ => false,
        }
    }

    fn tle_age(&self, backend_now: f64) -> f64 {
        match self.tles_loaded_at {
            Some(loaded) => (backend_now - loaded).max(0.0),
            None => self.faults.dataset_tle_age_secs,
        }
    }

    /// Metadata line sent first on every connection.
    pub fn metadata_line(&self, backend_now: f64) -> String {
        sse(json!({
            "type": "metadata",
            "dataset_epoch": iso8601(backend_now),
            "tle_age_seconds": self.tle_age(backend_now),
        }))
    }

    /// One keyframe batch of every object at backend time `t`.
    pub fn keyframe_line(&mut self, t: f64) -> String {
        self.stats.batches_sent += 1;

        let ids: Vec<_> = self.constellation.ids().collect();
        let mut sat = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(p) = self.constellation.position(id, t) else {
                continue;
            };
            if self.roll(self.faults.bad_satellite_rate) {
                sat.push(json!({ "id": id.as_u32(), "p": [p.x, p.y] }));
            } else {
                sat.push(json!({ "id": id.as_u32(), "p": [p.x, p.y, p.z] }));
            }
        }

        let line = sse(json!({ "type": "keyframe_batch", "t": iso8601(t), "sat": sat }));
        if self.roll(self.faults.malformed_line_rate) {
            self.stats.lines_corrupted += 1;
            let cut = line.len() / 2;
            return line.chars().take(cut).collect();
        }
        line
    }

    pub fn keepalive_line(&self) -> String {
        ":keepalive".to_string()
    }

    fn encode_point(&self, p: Vec3) -> [f64; 3] {
        match self.faults.orbit_units {
            OrbitUnits::Meters => [p.x, p.y, p.z],
            OrbitUnits::Kilometers => [p.x / 1000.0, p.y / 1000.0, p.z / 1000.0],
        }
    }

    /// Answers a propagate request issued at `backend_now`.
    pub fn propagate(&mut self, query: OrbitQuery, backend_now: f64) -> Result<String, EnvError> {
        self.stats.propagations += 1;
        if self.roll(self.faults.fetch_failure_rate) {
            self.stats.propagation_failures += 1;
            return Err(EnvError::http(503, "propagator busy"));
        }
        if self.constellation.orbit(query.id).is_none() {
            return Err(EnvError::http(404, format!("unknown object {}", query.id)));
        }

        let step = f64::from(query.step_secs.max(1));
        let count = (query.horizon_secs / query.step_secs.max(1)) as usize + 1;
        let mut positions = Vec::with_capacity(count);
        for i in 0..count {
            let t = backend_now + i as f64 * step;
            let p = match self.faults.orbit_frame {
                OrbitFrame::EarthFixed => self.constellation.position(query.id, t),
                OrbitFrame::Inertial => self.constellation.inertial_position(query.id, t),
            };
            if let Some(p) = p {
                positions.push(json!({ "p": self.encode_point(p), "t": iso8601(t) }));
            }
        }

        let mut body = json!({ "count": positions.len(), "positions": positions });
        if let Some(age) = self.faults.object_tle_age_secs {
            body["tle_epoch"] = json!(iso8601(backend_now - age));
        }
        Ok(body.to_string())
    }

    /// Reloads element sets; subsequent metadata reports them as fresh.
    pub fn refresh_tles(&mut self, backend_now: f64) -> String {
        self.stats.tle_refreshes += 1;
        self.tles_loaded_at = Some(backend_now);
        self.faults.object_tle_age_secs = None;
        json!({ "status": "ok", "count": self.constellation.len() }).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constellation::FIRST_OBJECT_ID;
    use crate::context::DEFAULT_EPOCH_SECS;
    use orbitview_core::protocol::{parse_propagate_response, parse_stream_line, StreamMessage};
    use orbitview_env::ObjectId;

    fn server(faults: FaultPlan) -> SimServer {
        SimServer::new(3, Constellation::generate(3, 5, DEFAULT_EPOCH_SECS), faults)
    }

    fn query() -> OrbitQuery {
        OrbitQuery {
            id: ObjectId(FIRST_OBJECT_ID),
            horizon_secs: 60,
            step_secs: 5,
        }
    }

    #[test]
    fn test_iso8601_millis() {
        assert_eq!(iso8601(DEFAULT_EPOCH_SECS + 5.25), "2024-05-01T00:00:05.250Z");
    }

    #[test]
    fn test_keyframe_line_parses() {
        let mut srv = server(FaultPlan::default());
        let line = srv.keyframe_line(DEFAULT_EPOCH_SECS + 10.0);
        let Some(StreamMessage::KeyframeBatch(batch)) = parse_stream_line(&line).unwrap() else {
            panic!("expected batch");
        };
        assert_eq!(batch.satellites.len(), 5);
        assert_eq!(batch.timestamp, DEFAULT_EPOCH_SECS + 10.0);

        let id = ObjectId(FIRST_OBJECT_ID + 1);
        let truth = srv.constellation().position(id, DEFAULT_EPOCH_SECS + 10.0).unwrap();
        let (_, sent) = batch.satellites.iter().find(|(i, _)| *i == id).unwrap();
        assert!((sent - truth).norm() < 1e-6);
    }

    #[test]
    fn test_metadata_reports_refresh() {
        let mut srv = server(FaultPlan {
            dataset_tle_age_secs: 90_000.0,
            ..FaultPlan::default()
        });
        let Some(StreamMessage::Metadata(meta)) = parse_stream_line(&srv.metadata_line(DEFAULT_EPOCH_SECS)).unwrap() else {
            panic!("expected metadata");
        };
        assert_eq!(meta.tle_age_seconds, 90_000.0);

        srv.refresh_tles(DEFAULT_EPOCH_SECS);
        let Some(StreamMessage::Metadata(meta)) =
            parse_stream_line(&srv.metadata_line(DEFAULT_EPOCH_SECS + 30.0)).unwrap()
        else {
            panic!("expected metadata");
        };
        assert_eq!(meta.tle_age_seconds, 30.0);
    }

    #[test]
    fn test_kilometer_inertial_response() {
        let mut srv = server(FaultPlan {
            orbit_units: OrbitUnits::Kilometers,
            orbit_frame: OrbitFrame::Inertial,
            object_tle_age_secs: Some(86_400.0),
            ..FaultPlan::default()
        });
        let body = srv.propagate(query(), DEFAULT_EPOCH_SECS).unwrap();
        let response = parse_propagate_response(&body).unwrap();

        assert_eq!(response.points.len(), 13);
        let first = &response.points[0];
        assert!(first.position.norm() < 10_000.0);
        assert_eq!(first.timestamp, Some(DEFAULT_EPOCH_SECS));
        assert_eq!(response.tle_epoch, Some(DEFAULT_EPOCH_SECS - 86_400.0));

        let truth = srv.constellation().inertial_position(query().id, DEFAULT_EPOCH_SECS).unwrap();
        assert!((first.position * 1000.0 - truth).norm() < 1.0);
    }

    #[test]
    fn test_refusals_follow_drop() {
        let mut srv = server(FaultPlan {
            drop_every_secs: Some(10.0),
            refusals_after_drop: 2,
            ..FaultPlan::default()
        });
        assert!(srv.accept_connection(0.0));
        assert!(!srv.should_drop(9.9));
        assert!(srv.should_drop(10.0));
        assert!(!srv.should_drop(11.0));

        assert!(!srv.accept_connection(11.0));
        assert!(!srv.accept_connection(12.0));
        assert!(srv.accept_connection(14.0));
        assert_eq!(srv.stats().connections_refused, 2);
        assert_eq!(srv.stats().streams_dropped, 1);
    }

    #[test]
    fn test_fetch_failures_are_http_503() {
        let mut srv = server(FaultPlan {
            fetch_failure_rate: 1.0,
            ..FaultPlan::default()
        });
        let err = srv.propagate(query(), DEFAULT_EPOCH_SECS).unwrap_err();
        assert_eq!(err.to_string(), "HTTP 503: propagator busy");
        assert!(err.is_transient());
    }

    #[test]
    fn test_corrupted_lines_fail_to_parse() {
        let mut srv = server(FaultPlan {
            malformed_line_rate: 1.0,
            ..FaultPlan::default()
        });
        let line = srv.keyframe_line(DEFAULT_EPOCH_SECS);
        assert!(parse_stream_line(&line).is_err());
    }
}
