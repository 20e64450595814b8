//! Keyframe buffer with cached bracket lookup.
//!
//! Keyframes arrive every few seconds with strictly increasing backend
//! timestamps. Per frame we need the pair `(prev, next)` whose span
//! contains the animation time. Because animation time moves forward
//! smoothly, the last bracket is almost always still valid, so it is cached
//! and only recomputed when time leaves it or a new keyframe arrives.
//! Times outside the buffered range map to the newest pair; that answer is
//! cached for the whole out-of-range side until the buffer changes.
//!
//! ```text
//!   oldest                                   newest
//!   [kf0] [kf1] [kf2] [kf3] ... [kfN-1] [kfN]
//!                 ^     ^
//!                prev  next      t ∈ [prev.t, next.t]
//! ```

use crate::error::KeyframeError;
use crate::geometry::{lerp, PositionSource, Vec3};
use orbitview_env::ObjectId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Positions of many objects at one backend instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyframe {
    /// Backend time, Unix seconds
    pub timestamp: f64,

    positions: HashMap<ObjectId, Vec3>,
}

impl Keyframe {
    pub fn new(timestamp: f64, satellites: impl IntoIterator<Item = (ObjectId, Vec3)>) -> Self {
        Self {
            timestamp,
            positions: satellites.into_iter().collect(),
        }
    }

    pub fn position(&self, id: ObjectId) -> Option<&Vec3> {
        self.positions.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.positions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Two consecutive keyframes bracketing an animation time.
#[derive(Debug, Clone)]
pub struct Bracket {
    pub prev: Arc<Keyframe>,
    pub next: Arc<Keyframe>,
}

impl Bracket {
    /// Fraction of the span elapsed at `time`, clamped to `[0, 1]`.
    ///
    /// A zero-length span yields 0.
    pub fn ratio(&self, time: f64) -> f64 {
        let span = self.next.timestamp - self.prev.timestamp;
        if span > 0.0 {
            ((time - self.prev.timestamp) / span).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Interpolated position of `id`, if present in both keyframes.
    pub fn interpolate(&self, id: ObjectId, time: f64) -> Option<Vec3> {
        let a = self.prev.position(id)?;
        let b = self.next.position(id)?;
        Some(lerp(a, b, self.ratio(time)))
    }

}

/// Times for which a cached bracket is still the right answer.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Validity {
    /// Inside `[prev, next]`
    Span { from: f64, to: f64 },

    /// Past the newest keyframe
    After(f64),

    /// Before the oldest keyframe
    Before(f64),
}

impl Validity {
    fn covers(self, time: f64) -> bool {
        match self {
            Validity::Span { from, to } => time >= from && time <= to,
            Validity::After(newest) => time > newest,
            Validity::Before(oldest) => time < oldest,
        }
    }
}

/// Bounded, strictly time-ordered keyframe history.
#[derive(Debug, Clone)]
pub struct KeyframeBuffer {
    frames: VecDeque<Arc<Keyframe>>,
    capacity: usize,

    /// Last bracket handed out; dropped whenever the buffer changes
    cached: Option<(Bracket, Validity)>,

    /// Full scans performed (cache misses)
    rescans: u64,
}

impl KeyframeBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            frames: VecDeque::with_capacity(capacity + 1),
            capacity,
            cached: None,
            rescans: 0,
        }
    }

    /// Appends a keyframe, evicting the oldest when full.
    ///
    /// Keyframes not strictly newer than the current newest are rejected,
    /// which also rejects duplicates from a replaying server.
    pub fn push(&mut self, keyframe: Keyframe) -> Result<Option<Arc<Keyframe>>, KeyframeError> {
        if !keyframe.timestamp.is_finite() {
            return Err(KeyframeError::NonFiniteTimestamp);
        }
        if let Some(newest) = self.frames.back() {
            if keyframe.timestamp <= newest.timestamp {
                return Err(KeyframeError::OutOfOrder {
                    newest: newest.timestamp,
                    got: keyframe.timestamp,
                });
            }
        }

        self.frames.push_back(Arc::new(keyframe));
        self.cached = None;

        if self.frames.len() > self.capacity {
            return Ok(self.frames.pop_front());
        }
        Ok(None)
    }

    /// Bracket for `time`, served from the cache when it still covers `time`.
    ///
    /// Falls back to the two newest keyframes when `time` lies outside the
    /// buffered range. `None` with fewer than two keyframes.
    pub fn bracket(&mut self, time: f64) -> Option<Bracket> {
        if let Some((cached, validity)) = &self.cached {
            if validity.covers(time) {
                return Some(cached.clone());
            }
        }

        self.rescans += 1;
        let found = self.find_bracket(time)?;
        let oldest = self.frames.front()?.timestamp;
        let newest = self.frames.back()?.timestamp;
        let validity = if time > newest {
            Validity::After(newest)
        } else if time < oldest {
            Validity::Before(oldest)
        } else {
            Validity::Span {
                from: found.prev.timestamp,
                to: found.next.timestamp,
            }
        };
        self.cached = Some((found.clone(), validity));
        Some(found)
    }

    /// Uncached bracket search.
    pub fn find_bracket(&self, time: f64) -> Option<Bracket> {
        let n = self.frames.len();
        if n < 2 {
            return None;
        }

        for i in 0..n - 1 {
            let (a, b) = (&self.frames[i], &self.frames[i + 1]);
            if time >= a.timestamp && time <= b.timestamp {
                return Some(Bracket {
                    prev: Arc::clone(a),
                    next: Arc::clone(b),
                });
            }
        }

        Some(Bracket {
            prev: Arc::clone(&self.frames[n - 2]),
            next: Arc::clone(&self.frames[n - 1]),
        })
    }

    /// Interpolated position of `id` at `time` without touching the cache.
    pub fn position_at(&self, id: ObjectId, time: f64) -> Option<Vec3> {
        self.find_bracket(time)?.interpolate(id, time)
    }

    pub fn newest(&self) -> Option<&Arc<Keyframe>> {
        self.frames.back()
    }

    /// Oldest → newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<Keyframe>> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn rescans(&self) -> u64 {
        self.rescans
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.cached = None;
    }
}

/// Latest observed (not interpolated) position.
impl PositionSource for KeyframeBuffer {
    fn position(&self, id: ObjectId) -> Option<Vec3> {
        self.newest()?.position(id).copied()
    }
}
