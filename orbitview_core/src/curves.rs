//! Catmull-Rom smoothing of the orbit head at close range.
//!
//! Propagated orbits are sampled every few seconds; up close the straight
//! chords between samples become visible. The head segment is resampled
//! through a cardinal spline (passes through every control point) when the
//! camera is near. An on/off hysteresis band keeps the decision stable, and
//! a cached curve is rebuilt at most every `update_every_n_frames`.

use crate::config::CurveConfig;
use crate::geometry::Vec3;

/// One point of the cardinal spline between `p1` (t = 0) and `p2` (t = 1).
///
/// `tension` 0 is the classic Catmull-Rom spline, 1 collapses the tangents.
pub fn catmull_rom_point(p0: &Vec3, p1: &Vec3, p2: &Vec3, p3: &Vec3, t: f64, tension: f64) -> Vec3 {
    let s = (1.0 - tension) / 2.0;
    let t2 = t * t;
    let t3 = t2 * t;

    let h1 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h2 = t3 - 2.0 * t2 + t;
    let h3 = -2.0 * t3 + 3.0 * t2;
    let h4 = t3 - t2;

    p1 * h1 + (p2 - p0) * (h2 * s) + p2 * h3 + (p3 - p1) * (h4 * s)
}

/// Resamples `control` through the spline with at most `max_output` points.
///
/// Ends are extended by duplicating the first/last control point. Each
/// span contributes the same number of samples and every control point
/// appears exactly once. Two or fewer control points are returned as-is.
pub fn resample_catmull_rom(control: &[Vec3], max_output: usize, tension: f64) -> Vec<Vec3> {
    let n = control.len();
    if n <= 2 {
        return control.to_vec();
    }

    let spans = n - 1;
    let per_span = (max_output.saturating_sub(1) / spans).max(2);
    let mut out = Vec::with_capacity((spans * per_span + 1).min(max_output));

    for i in 0..spans {
        let p0 = &control[i.saturating_sub(1)];
        let p1 = &control[i];
        let p2 = &control[i + 1];
        let p3 = &control[(i + 2).min(n - 1)];

        let last_span = i == spans - 1;
        let steps = if last_span { per_span } else { per_span - 1 };

        for j in 0..=steps {
            if out.len() >= max_output {
                return out;
            }
            let t = j as f64 / per_span as f64;
            out.push(catmull_rom_point(p0, p1, p2, p3, t, tension));
        }
    }

    out
}

/// A resampled head kept between rebuilds.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveCache {
    pub points: Vec<Vec3>,

    /// Frame counter when built
    pub frame_built: u64,
}

/// What to do with an object's curve this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveDecision {
    /// Leave the current (curved or straight) head alone
    Keep,

    /// (Re)build the curve and the head segment
    Rebuild,

    /// Drop the curve and restore the straight head
    Drop,
}

/// Whether a head should be curved at `distance`, given whether it is now.
///
/// Already-curved heads stay curved out to `enable_dist * (1 + h)`; straight
/// heads curve only inside `enable_dist * (1 - h)`.
pub fn wants_curve(currently_curved: bool, distance: f64, config: &CurveConfig) -> bool {
    let factor = if currently_curved {
        1.0 + config.hysteresis
    } else {
        1.0 - config.hysteresis
    };
    distance < config.enable_dist * factor
}

/// Decides the curve action for one object.
pub fn decide(cached: Option<&CurveCache>, distance: f64, frame: u64, config: &CurveConfig) -> CurveDecision {
    if !config.enabled {
        return if cached.is_some() {
            CurveDecision::Drop
        } else {
            CurveDecision::Keep
        };
    }

    let should_curve = wants_curve(cached.is_some(), distance, config);
    match cached {
        Some(_) if !should_curve => CurveDecision::Drop,
        Some(cache) if frame.saturating_sub(cache.frame_built) > config.update_every_n_frames => {
            CurveDecision::Rebuild
        }
        Some(_) => CurveDecision::Keep,
        None if should_curve => CurveDecision::Rebuild,
        None => CurveDecision::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn arc(n: usize) -> Vec<Vec3> {
        (0..n)
            .map(|i| {
                let a = i as f64 * 0.05;
                Vec3::new(7_000_000.0 * a.cos(), 7_000_000.0 * a.sin(), 0.0)
            })
            .collect()
    }

    #[test]
    fn test_spline_hits_endpoints_of_span() {
        let pts = arc(4);
        let a = catmull_rom_point(&pts[0], &pts[1], &pts[2], &pts[3], 0.0, 0.5);
        let b = catmull_rom_point(&pts[0], &pts[1], &pts[2], &pts[3], 1.0, 0.5);
        assert_relative_eq!(a, pts[1], epsilon = 1e-6);
        assert_relative_eq!(b, pts[2], epsilon = 1e-6);
    }

    #[test]
    fn test_short_input_passthrough() {
        let pts = arc(2);
        assert_eq!(resample_catmull_rom(&pts, 384, 0.5), pts);
    }

    #[test]
    fn test_resample_counts_and_endpoints() {
        let pts = arc(10);
        let out = resample_catmull_rom(&pts, 384, 0.5);
        // (384 - 1) / 9 = 42 samples per span, plus the final point
        assert_eq!(out.len(), 9 * 42 + 1);
        assert_relative_eq!(out[0], pts[0], epsilon = 1e-6);
        assert_relative_eq!(*out.last().unwrap(), pts[9], epsilon = 1e-6);
    }

    #[test]
    fn test_resample_capped() {
        let pts = arc(300);
        let out = resample_catmull_rom(&pts, 384, 0.5);
        assert_eq!(out.len(), 384);
    }

    #[test]
    fn test_hysteresis_band() {
        let cfg = CurveConfig::default(); // 2000 km, ±10%
        assert!(!wants_curve(false, 1_900_000.0, &cfg));
        assert!(wants_curve(false, 1_700_000.0, &cfg));
        assert!(wants_curve(true, 2_100_000.0, &cfg));
        assert!(!wants_curve(true, 2_300_000.0, &cfg));
    }

    #[test]
    fn test_decide_rebuild_cadence() {
        let cfg = CurveConfig::default();
        let cache = CurveCache {
            points: arc(3),
            frame_built: 100,
        };

        assert_eq!(decide(None, 1_000_000.0, 0, &cfg), CurveDecision::Rebuild);
        assert_eq!(decide(None, 5_000_000.0, 0, &cfg), CurveDecision::Keep);
        assert_eq!(decide(Some(&cache), 1_000_000.0, 150, &cfg), CurveDecision::Keep);
        assert_eq!(decide(Some(&cache), 1_000_000.0, 161, &cfg), CurveDecision::Rebuild);
        assert_eq!(decide(Some(&cache), 3_000_000.0, 120, &cfg), CurveDecision::Drop);
    }

    proptest! {
        #[test]
        fn prop_resample_passes_through_control_points(
            n in 3usize..12,
            tension in 0.0f64..1.0,
        ) {
            let pts = arc(n);
            let out = resample_catmull_rom(&pts, 384, tension);
            prop_assert!(out.len() <= 384);
            for p in &pts {
                let closest = out.iter().map(|q| (q - p).norm()).fold(f64::INFINITY, f64::min);
                prop_assert!(closest < 1e-3);
            }
        }
    }
}
