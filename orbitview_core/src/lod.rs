//! Distance-based level of detail for full-orbit polylines.
//!
//! An orbit is drawn as K gradient segments (bright, wide head fading to a
//! thin tail). K depends on how far the camera is from the object:
//!
//! ```text
//!   camera distance:   0 ──── near_dist ──────── mid_dist ────────▶
//!   tier:                 Near (18)        Mid (12)        Far (6)
//! ```
//!
//! Segment point arrays for all three tiers are computed once per orbit
//! load, so a tier switch only swaps polylines. Switching uses hysteresis
//! so a camera hovering on a boundary does not thrash. Rebuilds create the new polylines before
//! removing the old ones, so the orbit never disappears for a frame.

use crate::config::{LodConfig, OrbitStyleConfig};
use crate::geometry::Vec3;
use crate::render::{Material, PolylineHandle, PolylineSpec, RenderBackend, Rgba};
use crate::staleness::StalenessStyle;
use orbitview_env::ObjectId;
use serde::{Deserialize, Serialize};

/// A run of consecutive orbit points drawn as one polyline.
pub type Segment = Vec<Vec3>;

/// Distance tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LodTier {
    Near,
    Mid,
    Far,
}

/// Splits `points` into at most `k` overlapping segments.
///
/// The effective count is `min(k, max(2, n / 3))`, so short orbits are not
/// cut into slivers. Neighboring segments share their boundary point.
pub fn precompute_segments(points: &[Vec3], k: usize) -> Vec<Segment> {
    let n = points.len();
    if n < 2 || k == 0 {
        return Vec::new();
    }

    let actual_k = k.min((n / 3).max(2));
    let seg_size = n.div_ceil(actual_k);
    let mut segments = Vec::with_capacity(actual_k);

    for s in 0..actual_k {
        let start = s * seg_size;
        if start >= n - 1 {
            break;
        }
        let end = ((s + 1) * seg_size).min(n - 1);
        let segment = points[start..=end].to_vec();
        if segment.len() >= 2 {
            segments.push(segment);
        }
    }
    segments
}

/// Precomputed segment arrays for every tier.
#[derive(Debug, Clone, PartialEq)]
pub struct LodArrays {
    pub near: Vec<Segment>,
    pub mid: Vec<Segment>,
    pub far: Vec<Segment>,
}

impl LodArrays {
    /// With LOD disabled every tier uses `gradient_segments`.
    pub fn build(points: &[Vec3], lod: &LodConfig, gradient_segments: usize) -> Self {
        if lod.enabled {
            Self {
                near: precompute_segments(points, lod.segments_near),
                mid: precompute_segments(points, lod.segments_mid),
                far: precompute_segments(points, lod.segments_far),
            }
        } else {
            let shared = precompute_segments(points, gradient_segments);
            Self {
                near: shared.clone(),
                mid: shared.clone(),
                far: shared,
            }
        }
    }

    pub fn tier(&self, tier: LodTier) -> &[Segment] {
        match tier {
            LodTier::Near => &self.near,
            LodTier::Mid => &self.mid,
            LodTier::Far => &self.far,
        }
    }
}

/// Tier for a freshly loaded orbit (no hysteresis).
pub fn initial_tier(distance: Option<f64>, lod: &LodConfig) -> LodTier {
    match distance {
        Some(d) if lod.enabled && d < lod.near_dist => LodTier::Near,
        Some(d) if lod.enabled && d >= lod.mid_dist => LodTier::Far,
        _ => LodTier::Mid,
    }
}

/// Tier after observing `distance`, with hysteresis around both boundaries.
///
/// `mid` promotes below `0.9 × near_dist` and demotes at `1.1 × mid_dist`;
/// `near` and `far` return to `mid` only past the wider `1.2 × mid_dist` and
/// `0.9 × mid_dist` bands.
pub fn next_tier(current: LodTier, distance: f64, lod: &LodConfig) -> LodTier {
    match current {
        LodTier::Near if distance >= lod.mid_dist * 1.2 => LodTier::Mid,
        LodTier::Near => LodTier::Near,
        LodTier::Mid if distance < lod.near_dist * 0.9 => LodTier::Near,
        LodTier::Mid if distance >= lod.mid_dist * 1.1 => LodTier::Far,
        LodTier::Mid => LodTier::Mid,
        LodTier::Far if distance < lod.mid_dist * 0.9 => LodTier::Mid,
        LodTier::Far => LodTier::Far,
    }
}

/// Per-segment gradient values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentStyle {
    pub alpha: f64,
    pub width: f64,
    pub glow: f64,
}

/// Linear head→tail gradient; a single segment gets head values.
pub fn segment_style(index: usize, count: usize, style: &OrbitStyleConfig) -> SegmentStyle {
    let t = if count > 1 {
        index as f64 / (count - 1) as f64
    } else {
        0.0
    };
    SegmentStyle {
        alpha: style.head_alpha - t * (style.head_alpha - style.tail_alpha),
        width: style.head_width - t * (style.head_width - style.tail_width),
        glow: style.head_glow - t * (style.head_glow - style.tail_glow),
    }
}

/// Head width multiplier for a camera at `distance`, in `[min_scale, 1]`.
pub fn depth_scale(distance: f64, style: &OrbitStyleConfig) -> f64 {
    if distance <= style.depth_near_dist {
        return 1.0;
    }
    if distance >= style.depth_far_dist {
        return style.depth_min_scale;
    }
    let f = (distance - style.depth_near_dist) / (style.depth_far_dist - style.depth_near_dist);
    1.0 - f * (1.0 - style.depth_min_scale)
}

// ============================================================================
// RENDER STATE
// ============================================================================

/// Everything drawn for one object's full orbit.
#[derive(Debug, Clone)]
pub struct OrbitRenderState {
    pub color: Rgba,

    /// Trail-limited segment arrays for every tier
    pub arrays: LodArrays,

    /// Normalized points of the whole response (trail changes re-slice these)
    pub full_points: Vec<Vec3>,

    pub tier: LodTier,

    /// Live polylines, head first
    pub segments: Vec<PolylineHandle>,
    pub styles: Vec<SegmentStyle>,

    /// Display copy of the head segment; index 0 tracks the live position
    pub head_points: Vec<Vec3>,

    /// Build generation of `segments`
    pub generation: u64,

    pub visible: bool,
    pub staleness: StalenessStyle,
}

impl OrbitRenderState {
    pub fn new(color: Rgba, arrays: LodArrays, full_points: Vec<Vec3>, tier: LodTier) -> Self {
        Self {
            color,
            arrays,
            full_points,
            tier,
            segments: Vec::new(),
            styles: Vec::new(),
            head_points: Vec::new(),
            generation: 0,
            visible: true,
            staleness: StalenessStyle::default(),
        }
    }

    fn material(&self, style: &SegmentStyle) -> Material {
        Material {
            color: self.color.with_alpha(style.alpha * self.staleness.alpha_multiplier),
            dash_length: self.staleness.dash_length,
            glow: Some(style.glow),
        }
    }

    /// Moves the head's first point to the live position.
    pub fn update_head(&mut self, scene: &mut dyn RenderBackend, live: &Vec3) {
        if let (Some(first), Some(handle)) = (self.head_points.first_mut(), self.segments.first()) {
            *first = *live;
            scene.update_positions(*handle, &self.head_points);
        }
    }

    /// Applies a depth scale to the head width.
    pub fn set_head_scale(&self, scene: &mut dyn RenderBackend, scale: f64) {
        if let (Some(handle), Some(style)) = (self.segments.first(), self.styles.first()) {
            scene.set_width(*handle, style.width * scale);
        }
    }

    /// Shows or hides all segments; no-op when unchanged.
    pub fn set_visible(&mut self, scene: &mut dyn RenderBackend, visible: bool) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        for handle in &self.segments {
            scene.set_visible(*handle, visible);
        }
    }

    /// Re-styles existing segments for a new staleness level.
    pub fn apply_staleness(&mut self, scene: &mut dyn RenderBackend, staleness: StalenessStyle) {
        self.staleness = staleness;
        for (handle, style) in self.segments.iter().zip(&self.styles) {
            scene.set_material(*handle, self.material(style));
        }
    }

    /// Removes every polyline.
    pub fn remove(&mut self, scene: &mut dyn RenderBackend) {
        for handle in self.segments.drain(..) {
            scene.remove_polyline(handle);
        }
        self.styles.clear();
        self.head_points.clear();
    }
}

/// Inputs to a segment rebuild beyond the render state.
#[derive(Debug, Clone, Copy)]
pub struct RebuildParams<'a> {
    pub tier: LodTier,

    /// Resampled head replacing the straight head segment
    pub curved_head: Option<&'a [Vec3]>,

    /// Live object position pinned to the head's first point
    pub live_head: Option<&'a Vec3>,

    /// Head width multiplier
    pub depth_scale: f64,
}

/// Creates segment polylines with globally unique generations.
#[derive(Debug, Clone, Default)]
pub struct SegmentBuilder {
    generation: u64,
}

impl SegmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the object's segments with those of `params.tier`.
    ///
    /// New polylines are added before the old ones are removed. Returns the
    /// number of segments now drawn.
    pub fn rebuild(
        &mut self,
        scene: &mut dyn RenderBackend,
        id: ObjectId,
        render: &mut OrbitRenderState,
        params: RebuildParams<'_>,
        style: &OrbitStyleConfig,
    ) -> usize {
        let old_segments = std::mem::take(&mut render.segments);
        render.tier = params.tier;

        let arrays = render.arrays.tier(params.tier).to_vec();
        if arrays.is_empty() {
            for handle in old_segments {
                scene.remove_polyline(handle);
            }
            render.styles.clear();
            render.head_points.clear();
            return 0;
        }

        self.generation += 1;
        let generation = self.generation;
        let count = arrays.len();
        let mut segments = Vec::with_capacity(count);
        let mut styles = Vec::with_capacity(count);

        for (s, points) in arrays.into_iter().enumerate() {
            let seg_style = segment_style(s, count, style);
            let (positions, width) = if s == 0 {
                let mut head = match params.curved_head {
                    Some(curve) if curve.len() >= 2 => curve.to_vec(),
                    _ => points,
                };
                if let Some(live) = params.live_head {
                    head[0] = *live;
                }
                render.head_points = head.clone();
                let scale = if style.depth_scaling { params.depth_scale } else { 1.0 };
                (head, seg_style.width * scale)
            } else {
                (points, seg_style.width)
            };

            let handle = scene.add_polyline(PolylineSpec {
                key: format!("orbit-seg-{}-{}-{}", id, generation, s),
                positions,
                width,
                material: render.material(&seg_style),
                visible: render.visible,
            });
            segments.push(handle);
            styles.push(seg_style);
        }

        for handle in old_segments {
            scene.remove_polyline(handle);
        }

        render.segments = segments;
        render.styles = styles;
        render.generation = generation;
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{SceneOp, SceneRecorder};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn line(n: usize) -> Vec<Vec3> {
        (0..n).map(|i| Vec3::new(7_000_000.0, i as f64 * 1000.0, 0.0)).collect()
    }

    #[test]
    fn test_precompute_segments_overlap_and_cover() {
        let pts = line(1080);
        let segs = precompute_segments(&pts, 18);
        assert_eq!(segs.len(), 18);
        assert_eq!(segs[0][0], pts[0]);
        assert_eq!(*segs.last().unwrap().last().unwrap(), pts[1079]);
        for w in segs.windows(2) {
            assert_eq!(w[0].last(), w[1].first());
        }
    }

    #[test]
    fn test_precompute_short_orbits() {
        // n = 7 → actual_k = min(12, max(2, 2)) = 2, seg_size = 4
        let segs = precompute_segments(&line(7), 12);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].len(), 5);
        assert_eq!(segs[1].len(), 3);

        assert!(precompute_segments(&line(1), 12).is_empty());
        assert_eq!(precompute_segments(&line(2), 12).len(), 1);
    }

    #[test]
    fn test_initial_tier() {
        let lod = LodConfig::default();
        assert_eq!(initial_tier(Some(500_000.0), &lod), LodTier::Near);
        assert_eq!(initial_tier(Some(3_000_000.0), &lod), LodTier::Mid);
        assert_eq!(initial_tier(Some(5_000_000.0), &lod), LodTier::Far);
        assert_eq!(initial_tier(None, &lod), LodTier::Mid);
    }

    #[test]
    fn test_hysteresis_holds_on_boundary() {
        let lod = LodConfig::default();
        for d in [4_760_000.0, 5_000_000.0, 5_240_000.0] {
            assert_eq!(next_tier(LodTier::Mid, d, &lod), LodTier::Mid);
            assert_eq!(next_tier(LodTier::Far, d, &lod), LodTier::Far);
        }
        assert_eq!(next_tier(LodTier::Mid, 5_600_000.0, &lod), LodTier::Far);
        assert_eq!(next_tier(LodTier::Far, 4_400_000.0, &lod), LodTier::Mid);
        assert_eq!(next_tier(LodTier::Mid, 850_000.0, &lod), LodTier::Near);
        // Near holds until well past the mid boundary
        assert_eq!(next_tier(LodTier::Near, 5_900_000.0, &lod), LodTier::Near);
        assert_eq!(next_tier(LodTier::Near, 6_000_000.0, &lod), LodTier::Mid);
        // Far steps back through mid rather than jumping to near
        assert_eq!(next_tier(LodTier::Far, 100_000.0, &lod), LodTier::Mid);
    }

    #[test]
    fn test_segment_style_gradient() {
        let style = OrbitStyleConfig::default();
        let head = segment_style(0, 12, &style);
        let tail = segment_style(11, 12, &style);
        assert_relative_eq!(head.width, 4.0);
        assert_relative_eq!(tail.width, 0.8);
        assert_relative_eq!(tail.alpha, 0.12);
        assert_relative_eq!(segment_style(0, 1, &style).alpha, 0.9);
    }

    #[test]
    fn test_depth_scale_formula() {
        let style = OrbitStyleConfig::default();
        assert_relative_eq!(depth_scale(100_000.0, &style), 1.0);
        assert_relative_eq!(depth_scale(20_000_000.0, &style), 0.4);
        // Halfway: 1 - 0.5 * 0.6
        assert_relative_eq!(depth_scale(7_750_000.0, &style), 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_rebuild_adds_before_removing() {
        let style = OrbitStyleConfig::default();
        let lod = LodConfig::default();
        let pts = line(1080);
        let mut scene = SceneRecorder::new();
        let mut builder = SegmentBuilder::new();
        let mut render = OrbitRenderState::new(Rgba::GREEN, LodArrays::build(&pts, &lod, 12), pts, LodTier::Mid);

        let params = RebuildParams {
            tier: LodTier::Mid,
            curved_head: None,
            live_head: None,
            depth_scale: 1.0,
        };
        assert_eq!(builder.rebuild(&mut scene, ObjectId(42), &mut render, params, &style), 12);
        scene.clear_log();

        let params = RebuildParams {
            tier: LodTier::Far,
            ..params
        };
        assert_eq!(builder.rebuild(&mut scene, ObjectId(42), &mut render, params, &style), 6);

        let log = scene.log();
        let last_add = log.iter().rposition(|op| matches!(op, SceneOp::Added(_))).unwrap();
        let first_remove = log.iter().position(|op| matches!(op, SceneOp::Removed(_))).unwrap();
        assert!(last_add < first_remove);
        assert_eq!(scene.count_prefix("orbit-seg-42-2-"), 6);
        assert_eq!(scene.len(), 6);
        assert_eq!(render.generation, 2);
    }

    #[test]
    fn test_head_tracks_live_position() {
        let style = OrbitStyleConfig::default();
        let pts = line(100);
        let mut scene = SceneRecorder::new();
        let mut builder = SegmentBuilder::new();
        let mut render = OrbitRenderState::new(
            Rgba::GREEN,
            LodArrays::build(&pts, &LodConfig::default(), 12),
            pts,
            LodTier::Near,
        );
        let live = Vec3::new(1.0, 2.0, 3.0);
        builder.rebuild(
            &mut scene,
            ObjectId(1),
            &mut render,
            RebuildParams {
                tier: LodTier::Near,
                curved_head: None,
                live_head: Some(&live),
                depth_scale: 0.5,
            },
            &style,
        );

        let head = scene.get(render.segments[0]).unwrap();
        assert_eq!(head.positions[0], live);
        assert_relative_eq!(head.width, 2.0);

        let moved = Vec3::new(4.0, 5.0, 6.0);
        render.update_head(&mut scene, &moved);
        assert_eq!(scene.get(render.segments[0]).unwrap().positions[0], moved);
    }

    proptest! {
        #[test]
        fn prop_monotone_sweep_never_reverses(
            start in 0.0f64..2_000_000.0,
            steps in proptest::collection::vec(0.0f64..400_000.0, 1..200),
        ) {
            let lod = LodConfig::default();
            let rank = |t: LodTier| match t { LodTier::Near => 0, LodTier::Mid => 1, LodTier::Far => 2 };
            let mut d = start;
            let mut tier = initial_tier(Some(d), &lod);
            for step in steps {
                d += step;
                let next = next_tier(tier, d, &lod);
                prop_assert!(rank(next) >= rank(tier));
                tier = next;
            }
        }

        #[test]
        fn prop_jitter_inside_band_is_stable(
            jitter in proptest::collection::vec(-0.08f64..0.08, 1..200),
            start_far in any::<bool>(),
        ) {
            let lod = LodConfig::default();
            let start = if start_far { LodTier::Far } else { LodTier::Mid };
            let mut tier = start;
            for j in jitter {
                tier = next_tier(tier, lod.mid_dist * (1.0 + j), &lod);
            }
            prop_assert_eq!(tier, start);
        }
    }
}
