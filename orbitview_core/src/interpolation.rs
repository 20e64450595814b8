//! Per-frame position interpolation in rotating batches.
//!
//! With thousands of objects, interpolating all of them every frame is
//! wasted work: keyframes are seconds apart and the motion between two
//! consecutive frames is sub-pixel for most of them. Each frame therefore
//! advances a window of `batch_size` objects through a stable ordering,
//! wrapping to the start when the end is reached.
//!
//! Objects outside the camera frustum are written at most once every
//! `offscreen_update_interval` frames, counted per object from its last
//! write, so they never freeze entirely whatever the window cycle length.

use crate::config::PerformanceConfig;
use crate::geometry::{Frustum, PositionTable, Vec3};
use crate::keyframes::KeyframeBuffer;
use orbitview_env::ObjectId;
use serde::Serialize;
use std::collections::HashSet;

/// Counters for one interpolation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Objects in this frame's window
    pub attempted: usize,

    /// Positions written
    pub updated: usize,

    /// Skipped as off-screen
    pub culled: usize,

    /// Absent from one of the bracketing keyframes
    pub missing: usize,
}

/// Result of one pass: counters plus the positions written.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub stats: BatchStats,
    pub updates: Vec<(ObjectId, Vec3)>,
}

/// Round-robin interpolation driver.
#[derive(Debug, Clone)]
pub struct InterpolationScheduler {
    batch_size: usize,
    culling: bool,
    offscreen_interval: u64,

    /// Start of the next window into `objects`
    cursor: usize,

    /// Stable iteration order (first-seen)
    objects: Vec<ObjectId>,
    known: HashSet<ObjectId>,

    /// Frame of the last write, parallel to `objects`
    last_written: Vec<Option<u64>>,
}

impl InterpolationScheduler {
    pub fn new(config: &PerformanceConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            culling: config.frustum_culling,
            offscreen_interval: config.offscreen_update_interval.max(1),
            cursor: 0,
            objects: Vec::new(),
            known: HashSet::new(),
            last_written: Vec::new(),
        }
    }

    /// Adds objects not seen before; returns how many were new.
    pub fn register_objects(&mut self, ids: impl IntoIterator<Item = ObjectId>) -> usize {
        let before = self.objects.len();
        for id in ids {
            if self.known.insert(id) {
                self.objects.push(id);
                self.last_written.push(None);
            }
        }
        self.objects.len() - before
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Interpolates the next window of objects at `time`.
    ///
    /// Does nothing until the buffer holds two keyframes.
    pub fn advance(
        &mut self,
        buffer: &mut KeyframeBuffer,
        time: f64,
        frame: u64,
        frustum: &dyn Frustum,
        positions: &mut PositionTable,
    ) -> BatchResult {
        let mut result = BatchResult::default();
        let total = self.objects.len();
        if total == 0 {
            return result;
        }
        let Some(bracket) = buffer.bracket(time) else {
            return result;
        };

        if self.cursor >= total {
            self.cursor = 0;
        }
        let start = self.cursor;
        let end = (start + self.batch_size).min(total);

        for index in start..end {
            let id = self.objects[index];
            result.stats.attempted += 1;

            let Some(position) = bracket.interpolate(id, time) else {
                result.stats.missing += 1;
                continue;
            };

            let offscreen_due = match self.last_written[index] {
                Some(last) => frame.saturating_sub(last) >= self.offscreen_interval,
                None => true,
            };
            if self.culling && !offscreen_due && !frustum.contains(&position) {
                result.stats.culled += 1;
                continue;
            }

            self.last_written[index] = Some(frame);
            positions.set(id, position);
            result.updates.push((id, position));
            result.stats.updated += 1;
        }

        self.cursor = if end >= total { 0 } else { end };
        result
    }

    /// Forgets every object (full reset).
    pub fn clear(&mut self) {
        self.objects.clear();
        self.known.clear();
        self.last_written.clear();
        self.cursor = 0;
    }
}
