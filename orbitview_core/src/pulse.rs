//! Pulsing head marker for selected objects.
//!
//! A soft glow dot follows each selected object (attached by id, so it
//! moves with the object's rendered position) and its size and alpha
//! oscillate; alpha runs a quarter period ahead of size.

use crate::config::PulseConfig;
use crate::geometry::Vec3;
use orbitview_env::ObjectId;
use serde::Serialize;
use std::f64::consts::{FRAC_PI_2, TAU};

/// Pulse values at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PulseSample {
    /// Model silhouette size in pixels
    pub silhouette_size: f64,

    /// Glow dot size in pixels
    pub glow_size: f64,

    pub glow_alpha: f64,
}

/// Evaluates the pulse at host time `t` (seconds).
pub fn sample(t: f64, config: &PulseConfig) -> PulseSample {
    let phase = t * config.speed * TAU;

    let silhouette_size = if config.enabled {
        let mid = (config.min_size + config.max_size) / 2.0;
        let amp = (config.max_size - config.min_size) / 2.0;
        mid + amp * phase.sin()
    } else {
        2.0
    };

    PulseSample {
        silhouette_size,
        glow_size: config.glow_dot_size + config.glow_dot_pulse_amp * phase.sin(),
        glow_alpha: config.glow_dot_base_alpha + config.glow_dot_pulse_alpha * (phase + FRAC_PI_2).sin(),
    }
}

/// Glow marker drawn for one selected object this frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeadMarker {
    /// The marker is attached to this object
    pub follows: ObjectId,

    pub position: Vec3,
    pub pulse: PulseSample,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pulse_phases() {
        let cfg = PulseConfig::default();

        let at_zero = sample(0.0, &cfg);
        assert_relative_eq!(at_zero.silhouette_size, 2.5);
        assert_relative_eq!(at_zero.glow_size, 24.0);
        // Alpha leads by a quarter period: at its peak when size is at mid
        assert_relative_eq!(at_zero.glow_alpha, 0.25, epsilon = 1e-12);

        let quarter = 1.0 / (4.0 * cfg.speed);
        let peak = sample(quarter, &cfg);
        assert_relative_eq!(peak.silhouette_size, 3.5, epsilon = 1e-9);
        assert_relative_eq!(peak.glow_size, 32.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pulse_bounds() {
        let cfg = PulseConfig::default();
        for i in 0..500 {
            let s = sample(i as f64 * 0.013, &cfg);
            assert!(s.silhouette_size >= 1.5 - 1e-9 && s.silhouette_size <= 3.5 + 1e-9);
            assert!(s.glow_alpha >= 0.05 - 1e-9 && s.glow_alpha <= 0.25 + 1e-9);
        }
    }

    #[test]
    fn test_disabled_pulse_is_constant() {
        let cfg = PulseConfig {
            enabled: false,
            ..PulseConfig::default()
        };
        assert_eq!(sample(0.3, &cfg).silhouette_size, 2.0);
    }
}
