//! Future-trajectory uncertainty.
//!
//! The second half of a fetched orbit is prediction further from the TLE
//! epoch, so it is drawn with growing doubt:
//! - **Simple**: the future half split into dashed segments fading out
//! - **Corridor**: two boundary lines offset sideways from the path, the
//!   gap widening with along-track distance and TLE age
//!
//! Both scale with `ageScale = max(1, ageDays × multiplier)`.

use crate::config::UncertaintyConfig;
use crate::geometry::Vec3;
use crate::render::{Material, PolylineHandle, PolylineSpec, RenderBackend, Rgba};
use orbitview_env::ObjectId;
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Tangents shorter than this (m²) are treated as degenerate.
const MIN_TANGENT_SQUARED: f64 = 1.0;

/// Minimum future points before anything is drawn.
const MIN_FUTURE_POINTS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UncertaintyMode {
    #[default]
    Simple,
    Corridor,
}

/// Growth factor from TLE age.
pub fn age_scale(age_secs: f64, multiplier: f64) -> f64 {
    ((age_secs / SECONDS_PER_DAY) * multiplier).max(1.0)
}

/// Points beyond the midpoint of the fetched horizon.
pub fn future_half(points: &[Vec3]) -> &[Vec3] {
    &points[points.len() / 2..]
}

/// One fading dashed piece of the simple mode.
#[derive(Debug, Clone, PartialEq)]
pub struct DashedSegment {
    pub points: Vec<Vec3>,
    pub alpha: f64,
    pub width: f64,
    pub dash_length: f64,
}

/// Splits `future` into `segment_count` dashed pieces with decaying alpha.
pub fn simple_segments(future: &[Vec3], scale: f64, config: &UncertaintyConfig) -> Vec<DashedSegment> {
    if future.len() < MIN_FUTURE_POINTS || config.segment_count == 0 {
        return Vec::new();
    }

    let count = config.segment_count;
    let seg_size = future.len().div_ceil(count);
    let mut out = Vec::with_capacity(count);

    for s in 0..count {
        let start = s * seg_size;
        if start >= future.len() - 1 {
            break;
        }
        let end = ((s + 1) * seg_size).min(future.len() - 1);
        let t = if count > 1 { s as f64 / (count - 1) as f64 } else { 0.0 };
        out.push(DashedSegment {
            points: future[start..=end].to_vec(),
            alpha: config.future_start_alpha - t * (config.future_start_alpha - config.future_end_alpha),
            width: 1.5 * scale,
            dash_length: config.dash_length * scale,
        });
    }
    out
}

/// Corridor boundary lines.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Corridor {
    pub left: Vec<Vec3>,
    pub right: Vec<Vec3>,

    /// Half-width at each emitted boundary point
    pub half_widths: Vec<f64>,
}

/// Offsets the path sideways (perpendicular to both the tangent and the
/// radial direction) by a half-width growing with along-track distance.
///
/// Points with a degenerate tangent or perpendicular are skipped.
pub fn corridor(future: &[Vec3], scale: f64, config: &UncertaintyConfig) -> Corridor {
    let mut out = Corridor::default();
    if future.len() < MIN_FUTURE_POINTS {
        return out;
    }

    let mut along = 0.0;
    for i in 0..future.len() {
        let current = future[i];
        let next = future[(i + 1).min(future.len() - 1)];
        let tangent = next - current;

        if tangent.norm_squared() >= MIN_TANGENT_SQUARED {
            let radial = current.try_normalize(f64::EPSILON);
            let perpendicular = radial.and_then(|up| tangent.cross(&up).try_normalize(f64::EPSILON));
            if let Some(perp) = perpendicular {
                let half = ((config.corridor_width_base + along * config.corridor_growth_rate) * scale)
                    .min(config.max_corridor_width);
                out.left.push(current + perp * half);
                out.right.push(current - perp * half);
                out.half_widths.push(half);
            }
        }

        along += tangent.norm();
    }
    out
}

/// Polylines currently drawn for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct UncertaintyRender {
    pub mode: UncertaintyMode,
    pub handles: Vec<PolylineHandle>,
}

impl UncertaintyRender {
    pub fn remove(self, scene: &mut dyn RenderBackend) {
        for handle in self.handles {
            scene.remove_polyline(handle);
        }
    }
}

/// Draws uncertainty for `future`; `None` when there is too little to draw.
pub fn build(
    scene: &mut dyn RenderBackend,
    id: ObjectId,
    future: &[Vec3],
    color: Rgba,
    scale: f64,
    config: &UncertaintyConfig,
) -> Option<UncertaintyRender> {
    let mut handles = Vec::new();

    match config.mode {
        UncertaintyMode::Simple => {
            for (i, seg) in simple_segments(future, scale, config).into_iter().enumerate() {
                handles.push(scene.add_polyline(PolylineSpec {
                    key: format!("uncertainty-{}-{}", id, i),
                    positions: seg.points,
                    width: seg.width,
                    material: Material::dashed(color.with_alpha(seg.alpha), seg.dash_length),
                    visible: true,
                }));
            }
        }
        UncertaintyMode::Corridor => {
            let lines = corridor(future, scale, config);
            let material = Material::dashed(
                color.with_alpha(config.future_start_alpha * 0.5),
                config.dash_length * scale,
            );
            for (side, points) in [("left", lines.left), ("right", lines.right)] {
                if points.len() < 2 {
                    continue;
                }
                handles.push(scene.add_polyline(PolylineSpec {
                    key: format!("uncertainty-{}-{}", id, side),
                    positions: points,
                    width: 1.0,
                    material,
                    visible: true,
                }));
            }
        }
    }

    if handles.is_empty() {
        None
    } else {
        Some(UncertaintyRender {
            mode: config.mode,
            handles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::SceneRecorder;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn circle(n: usize, step_rad: f64) -> Vec<Vec3> {
        (0..n)
            .map(|i| {
                let a = i as f64 * step_rad;
                Vec3::new(6_771_000.0 * a.cos(), 6_771_000.0 * a.sin(), 0.0)
            })
            .collect()
    }

    #[test]
    fn test_age_scale() {
        assert_relative_eq!(age_scale(0.0, 1.5), 1.0);
        assert_relative_eq!(age_scale(86_400.0, 1.5), 1.5);
        assert_relative_eq!(age_scale(4.0 * 86_400.0, 1.5), 6.0);
    }

    #[test]
    fn test_future_half() {
        let pts = circle(9, 0.01);
        assert_eq!(future_half(&pts).len(), 5);
        assert_eq!(future_half(&pts)[0], pts[4]);
    }

    #[test]
    fn test_simple_segments_fade() {
        let cfg = UncertaintyConfig::default();
        let segs = simple_segments(&circle(540, 0.001), 2.0, &cfg);
        assert_eq!(segs.len(), 4);
        assert_relative_eq!(segs[0].alpha, 0.5);
        assert_relative_eq!(segs[3].alpha, 0.05);
        assert_relative_eq!(segs[0].width, 3.0);
        assert_relative_eq!(segs[0].dash_length, 32.0);
        for w in segs.windows(2) {
            assert_eq!(w[0].points.last(), w[1].points.first());
        }
    }

    #[test]
    fn test_too_few_points_draw_nothing() {
        let cfg = UncertaintyConfig::default();
        assert!(simple_segments(&circle(3, 0.01), 1.0, &cfg).is_empty());
        assert!(corridor(&circle(3, 0.01), 1.0, &cfg).left.is_empty());

        let mut scene = SceneRecorder::new();
        assert!(build(&mut scene, ObjectId(1), &circle(3, 0.01), Rgba::GREEN, 1.0, &cfg).is_none());
        assert!(scene.is_empty());
    }

    #[test]
    fn test_corridor_is_perpendicular_and_grows() {
        let cfg = UncertaintyConfig::default();
        let path = circle(50, 0.005);
        let c = corridor(&path, 1.0, &cfg);

        // Last point has a zero tangent and is skipped
        assert_eq!(c.left.len(), 49);
        assert_relative_eq!(c.half_widths[0], 500.0);
        // In-plane circle: the sideways offset is along ±z
        assert_relative_eq!((c.left[0] - path[0]).z.abs(), 500.0, epsilon = 1e-6);
        assert!(c.half_widths[48] > c.half_widths[0]);
    }

    #[test]
    fn test_corridor_capped() {
        let cfg = UncertaintyConfig::default();
        let c = corridor(&circle(500, 0.01), 20.0, &cfg);
        assert!(c.half_widths.iter().all(|w| *w <= cfg.max_corridor_width));
        assert_relative_eq!(*c.half_widths.last().unwrap(), cfg.max_corridor_width);
    }

    #[test]
    fn test_degenerate_tangents_skipped() {
        let cfg = UncertaintyConfig::default();
        let p = Vec3::new(7_000_000.0, 0.0, 0.0);
        // Repeated points, then purely radial motion
        let path = vec![p, p, p, p * 1.001, p * 1.002];
        let c = corridor(&path, 1.0, &cfg);
        assert!(c.left.is_empty());
    }

    #[test]
    fn test_build_corridor_mode() {
        let cfg = UncertaintyConfig {
            mode: UncertaintyMode::Corridor,
            ..UncertaintyConfig::default()
        };
        let mut scene = SceneRecorder::new();
        let render = build(&mut scene, ObjectId(9), &circle(100, 0.005), Rgba::GREEN, 2.0, &cfg).unwrap();
        assert_eq!(render.handles.len(), 2);
        assert_eq!(scene.count_prefix("uncertainty-9-"), 2);
        for (_, line) in scene.with_prefix("uncertainty-9-") {
            assert_eq!(line.material.dash_length, Some(cfg.dash_length * 2.0));
            assert_relative_eq!(line.material.color.a, cfg.future_start_alpha * 0.5);
        }
        render.remove(&mut scene);
        assert!(scene.is_empty());
    }

    proptest! {
        #[test]
        fn prop_half_width_monotone(
            n in 4usize..200,
            step in 0.0005f64..0.02,
            days in 0.0f64..20.0,
        ) {
            let cfg = UncertaintyConfig::default();
            let scale = age_scale(days * 86_400.0, cfg.tle_epoch_age_multiplier);
            let c = corridor(&circle(n, step), scale, &cfg);
            for w in c.half_widths.windows(2) {
                prop_assert!(w[1] >= w[0]);
            }
            prop_assert!(c.half_widths.iter().all(|w| *w <= cfg.max_corridor_width));
        }
    }
}
