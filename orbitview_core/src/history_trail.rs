//! Fixed-capacity ring buffer of recently observed positions.
//!
//! Each selected object leaves a fading trail of where it actually was
//! (from keyframes, not predictions). On selection the trail is prefilled
//! from the keyframe buffer so it does not start empty.

use crate::geometry::Vec3;
use crate::keyframes::KeyframeBuffer;
use orbitview_env::ObjectId;

/// Circular buffer, oldest → newest on read.
#[derive(Debug, Clone)]
pub struct HistoryTrail {
    buffer: Vec<Vec3>,
    head: usize,
    count: usize,
}

impl HistoryTrail {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![Vec3::zeros(); capacity],
            head: 0,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Appends a point, overwriting the oldest when full.
    pub fn push(&mut self, point: Vec3) {
        let cap = self.buffer.len();
        if cap == 0 {
            return;
        }
        self.buffer[self.head] = point;
        self.head = (self.head + 1) % cap;
        self.count = (self.count + 1).min(cap);
    }

    /// Points oldest → newest.
    pub fn points(&self) -> Vec<Vec3> {
        let cap = self.buffer.len();
        let start = (self.head + cap - self.count) % cap.max(1);
        (0..self.count)
            .map(|i| self.buffer[(start + i) % cap])
            .collect()
    }

    /// Forgets the oldest points beyond `max`; returns how many were dropped.
    pub fn retain_newest(&mut self, max: usize) -> usize {
        let dropped = self.count.saturating_sub(max);
        self.count -= dropped;
        dropped
    }

    /// Fills from buffered keyframes no older than `window_secs` before `now`.
    pub fn prefill(&mut self, keyframes: &KeyframeBuffer, id: ObjectId, now: f64, window_secs: f64) -> usize {
        let mut recent: Vec<Vec3> = Vec::new();
        for keyframe in keyframes.iter().rev() {
            if now - keyframe.timestamp > window_secs {
                break;
            }
            if let Some(p) = keyframe.position(id) {
                recent.push(*p);
            }
        }

        let added = recent.len();
        for p in recent.into_iter().rev() {
            self.push(p);
        }
        added
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }
}

/// Points a trail of `minutes` holds at one sample per keyframe step.
pub fn points_for_window(minutes: f64, keyframe_step_secs: f64) -> usize {
    (minutes * 60.0 / keyframe_step_secs.max(f64::EPSILON)).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyframes::Keyframe;

    fn p(x: f64) -> Vec3 {
        Vec3::new(x, 0.0, 0.0)
    }

    #[test]
    fn test_wraps_and_reads_in_order() {
        let mut trail = HistoryTrail::with_capacity(3);
        for x in 0..5 {
            trail.push(p(x as f64));
        }
        assert_eq!(trail.len(), 3);
        assert_eq!(trail.points(), vec![p(2.0), p(3.0), p(4.0)]);
    }

    #[test]
    fn test_retain_newest() {
        let mut trail = HistoryTrail::with_capacity(10);
        for x in 0..6 {
            trail.push(p(x as f64));
        }
        assert_eq!(trail.retain_newest(4), 2);
        assert_eq!(trail.points(), vec![p(2.0), p(3.0), p(4.0), p(5.0)]);
        trail.push(p(6.0));
        assert_eq!(trail.points().last(), Some(&p(6.0)));
        assert_eq!(trail.len(), 5);
    }

    #[test]
    fn test_prefill_respects_window() {
        let mut buf = KeyframeBuffer::new(20);
        for i in 0..10 {
            let t = i as f64 * 5.0;
            buf.push(Keyframe::new(t, [(ObjectId(1), p(t))])).unwrap();
        }

        let mut trail = HistoryTrail::with_capacity(100);
        // now = 45, window 20 s → keyframes at 25..=45
        assert_eq!(trail.prefill(&buf, ObjectId(1), 45.0, 20.0), 5);
        assert_eq!(trail.points(), vec![p(25.0), p(30.0), p(35.0), p(40.0), p(45.0)]);
    }

    #[test]
    fn test_zero_capacity_is_inert() {
        let mut trail = HistoryTrail::with_capacity(0);
        trail.push(p(1.0));
        assert!(trail.is_empty());
        assert!(trail.points().is_empty());
    }

    #[test]
    fn test_points_for_window() {
        assert_eq!(points_for_window(10.0, 5.0), 120);
        assert_eq!(points_for_window(0.1, 5.0), 2);
    }
}
