//! Full-orbit cache, request relevance tracking and response normalization.
//!
//! Orbit fetches complete asynchronously and may land after the object was
//! deselected, re-selected or refreshed. Every request carries the
//! per-object generation current when it was issued; a completion whose
//! generation is no longer current is ignored ("apply iff still relevant").
//!
//! Backends disagree on units and frames, so a response is normalized
//! before display:
//! - **Units**: a first point shorter than 100 km cannot be a real orbit
//!   in meters, so the whole series is scaled from kilometers.
//! - **Frame**: if the first point sits far from where the object is drawn
//!   right now, an inertial (TEME) → Earth-fixed rotation is tried and kept
//!   only if it brings the point closer.

use crate::error::OrbitError;
use crate::frames::teme_to_ecef;
use crate::geometry::Vec3;
use crate::protocol::RawOrbitPoint;
use orbitview_env::{ObjectId, OrbitQuery};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Cached raw trajectory of one object.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitCacheEntry {
    pub points: Vec<RawOrbitPoint>,

    /// Host time the response was stored
    pub fetched_at: f64,
}

/// Handle identifying one in-flight orbit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OrbitRequest {
    pub id: ObjectId,
    pub generation: u64,
    pub horizon_secs: u32,
    pub step_secs: u32,
}

impl OrbitRequest {
    /// Backend query for this request.
    pub fn query(&self) -> OrbitQuery {
        OrbitQuery {
            id: self.id,
            horizon_secs: self.horizon_secs,
            step_secs: self.step_secs,
        }
    }
}

/// TTL cache of raw trajectories plus per-object request generations.
#[derive(Debug, Clone)]
pub struct OrbitCache {
    entries: HashMap<ObjectId, OrbitCacheEntry>,
    generations: HashMap<ObjectId, u64>,
    ttl: f64,
}

impl OrbitCache {
    pub fn new(ttl_secs: f64) -> Self {
        Self {
            entries: HashMap::new(),
            generations: HashMap::new(),
            ttl: ttl_secs,
        }
    }

    /// Entry for `id` if younger than the TTL.
    pub fn get_fresh(&self, id: ObjectId, now: f64) -> Option<&OrbitCacheEntry> {
        self.entries
            .get(&id)
            .filter(|entry| now - entry.fetched_at < self.ttl)
    }

    /// Starts a new request for `id`, superseding any in flight.
    pub fn begin_request(&mut self, id: ObjectId) -> u64 {
        self.bump(id)
    }

    pub fn is_current(&self, id: ObjectId, generation: u64) -> bool {
        self.generations.get(&id).copied().unwrap_or(0) == generation
    }

    /// Stores a response if its request is still current.
    pub fn complete(
        &mut self,
        id: ObjectId,
        generation: u64,
        points: Vec<RawOrbitPoint>,
        now: f64,
    ) -> bool {
        if !self.is_current(id, generation) {
            debug!("Discarding superseded orbit response for {} (gen {})", id, generation);
            return false;
        }
        self.entries.insert(
            id,
            OrbitCacheEntry {
                points,
                fetched_at: now,
            },
        );
        true
    }

    /// Drops the entry and orphans any request in flight.
    pub fn invalidate(&mut self, id: ObjectId) {
        self.entries.remove(&id);
        self.bump(id);
    }

    /// Removes expired entries whose object `keep` does not protect.
    pub fn sweep(&mut self, now: f64, keep: impl Fn(ObjectId) -> bool) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|id, entry| keep(*id) || now - entry.fetched_at < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all entries; generations advance so late responses are ignored.
    pub fn clear(&mut self) {
        self.entries.clear();
        for generation in self.generations.values_mut() {
            *generation += 1;
        }
    }

    fn bump(&mut self, id: ObjectId) -> u64 {
        let generation = self.generations.entry(id).or_insert(0);
        *generation += 1;
        *generation
    }
}

// ============================================================================
// REFRESH TIMERS
// ============================================================================

/// Per-object auto-refresh deadlines.
///
/// Interval semantics: a due timer is re-armed immediately, so a failed
/// fetch is retried one interval later. Displaying a fresh orbit re-arms
/// it from that moment.
#[derive(Debug, Clone)]
pub struct RefreshSchedule {
    deadlines: HashMap<ObjectId, f64>,
    interval: f64,
}

impl RefreshSchedule {
    pub fn new(interval_secs: f64) -> Self {
        Self {
            deadlines: HashMap::new(),
            interval: interval_secs,
        }
    }

    /// (Re)arms the timer for `id`, replacing any existing deadline.
    pub fn arm(&mut self, id: ObjectId, now: f64) {
        self.deadlines.insert(id, now + self.interval);
    }

    pub fn cancel(&mut self, id: ObjectId) {
        self.deadlines.remove(&id);
    }

    pub fn is_armed(&self, id: ObjectId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Objects whose timers fired, in id order; each is re-armed.
    pub fn due(&mut self, now: f64) -> Vec<ObjectId> {
        let mut fired: Vec<ObjectId> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        fired.sort();
        for id in &fired {
            self.deadlines.insert(*id, now + self.interval);
        }
        fired
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Inputs to [`normalize_orbit`] beyond the raw points.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeParams {
    /// First-point magnitude below which the series is taken as km
    pub km_threshold: f64,

    /// First-point mismatch (m) that triggers inertial frame detection
    pub frame_mismatch_threshold: f64,

    /// Spacing used to extrapolate timestamps for points without one
    pub step_secs: f64,

    /// Backend time used for the first untimestamped point
    pub backend_now: f64,
}

/// Trajectory ready for display: meters, Earth-fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedOrbit {
    pub points: Vec<Vec3>,
    pub scaled_from_km: bool,
    pub rotated_from_inertial: bool,

    /// Points dropped as non-finite or zero
    pub dropped: usize,
}

fn point_time(point: &RawOrbitPoint, index: usize, params: &NormalizeParams) -> f64 {
    point
        .timestamp
        .unwrap_or(params.backend_now + index as f64 * params.step_secs)
}

/// Converts a raw response to meters / Earth-fixed.
///
/// `current` is the object's currently rendered position; without one
/// frame detection is skipped and the series is used as-is.
pub fn normalize_orbit(
    id: ObjectId,
    raw: &[RawOrbitPoint],
    current: Option<&Vec3>,
    params: &NormalizeParams,
) -> Result<NormalizedOrbit, OrbitError> {
    let Some(first) = raw.first() else {
        return Err(OrbitError::NotEnoughPoints { id, got: 0 });
    };

    let scaled_from_km = first.position.norm() < params.km_threshold;
    let scale = if scaled_from_km { 1000.0 } else { 1.0 };

    let mut rotated_from_inertial = false;
    if let Some(current) = current {
        let first_m = first.position * scale;
        let raw_distance = (current - first_m).norm();
        if raw_distance > params.frame_mismatch_threshold {
            let converted = teme_to_ecef(&first_m, point_time(first, 0, params));
            let converted_distance = (current - converted).norm();
            rotated_from_inertial = converted_distance < raw_distance;
            debug!(
                "Orbit {} first point off by {:.0} km; inertial rotation gives {:.0} km ({})",
                id,
                raw_distance / 1000.0,
                converted_distance / 1000.0,
                if rotated_from_inertial { "rotating" } else { "keeping" }
            );
        }
    }

    let mut points = Vec::with_capacity(raw.len());
    let mut dropped = 0;
    for (i, point) in raw.iter().enumerate() {
        let mut p = point.position * scale;
        if rotated_from_inertial {
            p = teme_to_ecef(&p, point_time(point, i, params));
        }
        if p.iter().all(|c| c.is_finite()) && p != Vec3::zeros() {
            points.push(p);
        } else {
            dropped += 1;
        }
    }

    if points.len() < 2 {
        return Err(OrbitError::NotEnoughPoints {
            id,
            got: points.len(),
        });
    }

    Ok(NormalizedOrbit {
        points,
        scaled_from_km,
        rotated_from_inertial,
        dropped,
    })
}

/// Number of leading points shown for a `seconds`-long trail at `step_secs` spacing (at least 2).
pub fn trail_point_count(seconds: f64, step_secs: f64, available: usize) -> usize {
    let wanted = (seconds / step_secs.max(f64::EPSILON)).ceil() as usize;
    wanted.max(2).min(available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::ecef_to_teme;
    use approx::assert_relative_eq;

    const NOW: f64 = 1_700_000_000.0;

    fn params() -> NormalizeParams {
        NormalizeParams {
            km_threshold: 100_000.0,
            frame_mismatch_threshold: 100_000.0,
            step_secs: 5.0,
            backend_now: NOW,
        }
    }

    fn raw(points: &[Vec3]) -> Vec<RawOrbitPoint> {
        points
            .iter()
            .map(|p| RawOrbitPoint {
                position: *p,
                timestamp: None,
            })
            .collect()
    }

    #[test]
    fn test_cache_ttl() {
        let mut cache = OrbitCache::new(300.0);
        let gen = cache.begin_request(ObjectId(1));
        assert!(cache.complete(ObjectId(1), gen, raw(&[Vec3::x(), Vec3::y()]), 0.0));
        assert!(cache.get_fresh(ObjectId(1), 299.0).is_some());
        assert!(cache.get_fresh(ObjectId(1), 300.0).is_none());
    }

    #[test]
    fn test_superseded_response_ignored() {
        let mut cache = OrbitCache::new(300.0);
        let first = cache.begin_request(ObjectId(1));
        let second = cache.begin_request(ObjectId(1));
        assert!(!cache.complete(ObjectId(1), first, raw(&[Vec3::x()]), 0.0));
        assert!(cache.is_empty());
        assert!(cache.complete(ObjectId(1), second, raw(&[Vec3::x()]), 0.0));
    }

    #[test]
    fn test_invalidate_orphans_in_flight() {
        let mut cache = OrbitCache::new(300.0);
        let gen = cache.begin_request(ObjectId(1));
        cache.invalidate(ObjectId(1));
        assert!(!cache.is_current(ObjectId(1), gen));
        assert!(!cache.complete(ObjectId(1), gen, raw(&[Vec3::x()]), 0.0));
    }

    #[test]
    fn test_sweep_keeps_protected_and_fresh() {
        let mut cache = OrbitCache::new(300.0);
        for id in 1..=3 {
            let gen = cache.begin_request(ObjectId(id));
            cache.complete(ObjectId(id), gen, raw(&[Vec3::x()]), 0.0);
        }
        let gen = cache.begin_request(ObjectId(4));
        cache.complete(ObjectId(4), gen, raw(&[Vec3::x()]), 900.0);

        let removed = cache.sweep(1000.0, |id| id == ObjectId(2));
        assert_eq!(removed, 2);
        assert!(cache.get_fresh(ObjectId(4), 1000.0).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_refresh_schedule_interval_semantics() {
        let mut sched = RefreshSchedule::new(60.0);
        sched.arm(ObjectId(2), 0.0);
        sched.arm(ObjectId(1), 10.0);

        assert!(sched.due(59.0).is_empty());
        assert_eq!(sched.due(60.0), vec![ObjectId(2)]);
        assert_eq!(sched.due(75.0), vec![ObjectId(1)]);
        // Re-armed from the firing time
        assert_eq!(sched.due(120.0), vec![ObjectId(2)]);

        sched.cancel(ObjectId(1));
        assert!(!sched.is_armed(ObjectId(1)));
    }

    #[test]
    fn test_kilometer_orbit_scaled() {
        let current = Vec3::new(6_771_000.0, 0.0, 0.0);
        let pts = raw(&[
            Vec3::new(6771.0, 0.0, 0.0),
            Vec3::new(6770.0, 38.0, 0.0),
            Vec3::new(6769.0, 76.0, 0.0),
        ]);
        let orbit = normalize_orbit(ObjectId(42), &pts, Some(&current), &params()).unwrap();
        assert!(orbit.scaled_from_km);
        assert!(!orbit.rotated_from_inertial);
        assert_relative_eq!(orbit.points[0].x, 6_771_000.0);
        assert_relative_eq!(orbit.points[2].y, 76_000.0);
    }

    #[test]
    fn test_inertial_orbit_rotated() {
        let ecef = [
            Vec3::new(6_771_000.0, 0.0, 0.0),
            Vec3::new(6_760_000.0, 380_000.0, 0.0),
            Vec3::new(6_740_000.0, 760_000.0, 0.0),
        ];
        let pts: Vec<RawOrbitPoint> = ecef
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let t = NOW + i as f64 * 5.0;
                RawOrbitPoint {
                    position: ecef_to_teme(p, t),
                    timestamp: Some(t),
                }
            })
            .collect();

        let orbit = normalize_orbit(ObjectId(7), &pts, Some(&ecef[0]), &params()).unwrap();
        assert!(orbit.rotated_from_inertial);
        for (got, want) in orbit.points.iter().zip(ecef.iter()) {
            assert_relative_eq!(*got, *want, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_rotation_rejected_when_it_does_not_help() {
        // Far from the live position, and rotating would not bring it closer
        let current = Vec3::new(0.0, 0.0, 6_771_000.0);
        let pts = raw(&[Vec3::new(0.0, 0.0, -6_771_000.0), Vec3::new(0.0, 10.0, -6_771_000.0)]);
        let orbit = normalize_orbit(ObjectId(1), &pts, Some(&current), &params()).unwrap();
        assert!(!orbit.rotated_from_inertial);
        assert_eq!(orbit.points[0], pts[0].position);
    }

    #[test]
    fn test_zero_points_dropped_and_too_few_rejected() {
        let pts = raw(&[
            Vec3::new(7_000_000.0, 0.0, 0.0),
            Vec3::zeros(),
            Vec3::new(6_999_000.0, 100_000.0, 0.0),
        ]);
        let orbit = normalize_orbit(ObjectId(1), &pts, None, &params()).unwrap();
        assert_eq!(orbit.points.len(), 2);
        assert_eq!(orbit.dropped, 1);

        let pts = raw(&[Vec3::new(7_000_000.0, 0.0, 0.0), Vec3::zeros()]);
        assert!(matches!(
            normalize_orbit(ObjectId(1), &pts, None, &params()),
            Err(OrbitError::NotEnoughPoints { got: 1, .. })
        ));
    }

    #[test]
    fn test_trail_point_count() {
        assert_eq!(trail_point_count(5400.0, 5.0, 1081), 1080);
        assert_eq!(trail_point_count(300.0, 5.0, 1081), 60);
        assert_eq!(trail_point_count(0.0, 5.0, 1081), 2);
        assert_eq!(trail_point_count(300.0, 5.0, 10), 10);
    }
}
