//! Engine configuration.
//!
//! Every tunable threshold lives here, grouped the way the engine consumes
//! them. All sections carry `#[serde(default)]` so a TOML file only needs to
//! name what it overrides:
//!
//! ```toml
//! [stream]
//! backend_url = "https://orbits.example.net"
//! auth_token = "secret"
//!
//! [visual.lod]
//! near_dist = 2_000_000.0
//! ```

use crate::error::ConfigError;
use crate::render::Rgba;
use crate::uncertainty::UncertaintyMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub stream: StreamConfig,
    pub orbit: OrbitConfig,
    pub performance: PerformanceConfig,
    pub visual: VisualConfig,
}

// ============================================================================
// STREAM
// ============================================================================

/// Keyframe stream, buffer and reconnect settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Backend base URL (stream, propagate and refresh routes hang off it)
    pub backend_url: String,

    /// Optional bearer token
    pub auth_token: Option<String>,

    /// Backend keyframe cadence in seconds (default: 5)
    pub keyframe_step_secs: f64,

    /// Backend stream horizon in seconds (default: 600)
    pub horizon_secs: f64,

    /// Keyframe buffer capacity (default: 150)
    pub max_keyframes: usize,

    /// First reconnect delay in seconds (default: 1)
    pub reconnect_base_delay_secs: f64,

    /// Reconnect delay ceiling in seconds (default: 30)
    pub reconnect_max_delay_secs: f64,

    /// Weight of each new clock-offset sample (default: 0.05)
    pub clock_smoothing: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".to_string(),
            auth_token: None,
            keyframe_step_secs: 5.0,
            horizon_secs: 600.0,
            max_keyframes: 150,
            reconnect_base_delay_secs: 1.0,
            reconnect_max_delay_secs: 30.0,
            clock_smoothing: 0.05,
        }
    }
}

// ============================================================================
// ORBIT FETCH
// ============================================================================

/// Full-orbit fetch and cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitConfig {
    /// Show full orbits for selected objects at all
    pub enabled: bool,

    /// Propagation horizon in seconds (default: 5400, ~one LEO period)
    pub horizon_secs: u32,

    /// Propagation step in seconds (default: 5)
    pub step_secs: u32,

    /// Cache entry lifetime in seconds (default: 300)
    pub cache_ttl_secs: f64,

    /// Auto-refresh interval for selected objects in seconds (default: 60)
    pub refresh_interval_secs: f64,

    /// First-point magnitude below which a response is taken to be in km
    pub km_magnitude_threshold: f64,

    /// First-point distance from the live position that triggers frame detection
    pub frame_mismatch_threshold_m: f64,
}

impl Default for OrbitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            horizon_secs: 5400,
            step_secs: 5,
            cache_ttl_secs: 300.0,
            refresh_interval_secs: 60.0,
            km_magnitude_threshold: 100_000.0,
            frame_mismatch_threshold_m: 100_000.0,
        }
    }
}

// ============================================================================
// PERFORMANCE / CADENCES
// ============================================================================

/// Per-frame work limits and coarse cadences (in frames).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Skip position writes for off-screen objects on most frames
    pub frustum_culling: bool,

    /// Objects interpolated per frame (default: 500)
    pub batch_size: usize,

    /// Off-screen objects still update every N frames (default: 10)
    pub offscreen_update_interval: u64,

    /// Live head point of each orbit refreshes every N frames (default: 10)
    pub orbit_head_update_interval: u64,

    /// Orbit cache sweep every N frames (default: 3600)
    pub sweep_interval_frames: u64,

    /// Global staleness indicator refresh every N frames (default: 60)
    pub staleness_ui_interval_frames: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            frustum_culling: true,
            batch_size: 500,
            offscreen_update_interval: 10,
            orbit_head_update_interval: 10,
            sweep_interval_frames: 3600,
            staleness_ui_interval_frames: 60,
        }
    }
}

// ============================================================================
// VISUALS
// ============================================================================

/// All visual thresholds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub orbit: OrbitStyleConfig,
    pub lod: LodConfig,
    pub visibility: VisibilityConfig,
    pub trail: TrailConfig,
    pub pulse: PulseConfig,
    pub curves: CurveConfig,
    pub history_trail: HistoryTrailConfig,
    pub uncertainty: UncertaintyConfig,
    pub staleness: StalenessConfig,
}

/// Gradient styling of full-orbit segments (head = index 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitStyleConfig {
    pub color: Rgba,
    pub gradient_segments: usize,
    pub head_width: f64,
    pub tail_width: f64,
    pub head_glow: f64,
    pub tail_glow: f64,
    pub head_alpha: f64,
    pub tail_alpha: f64,

    /// Scale the head width down with camera distance
    pub depth_scaling: bool,
    pub depth_near_dist: f64,
    pub depth_far_dist: f64,
    pub depth_min_scale: f64,

    /// Visibility / depth / LOD pass cadence in frames (default: 15)
    pub depth_update_interval: u64,
}

impl Default for OrbitStyleConfig {
    fn default() -> Self {
        Self {
            color: Rgba::GREEN,
            gradient_segments: 12,
            head_width: 4.0,
            tail_width: 0.8,
            head_glow: 0.5,
            tail_glow: 0.06,
            head_alpha: 0.9,
            tail_alpha: 0.12,
            depth_scaling: true,
            depth_near_dist: 500_000.0,
            depth_far_dist: 15_000_000.0,
            depth_min_scale: 0.4,
            depth_update_interval: 15,
        }
    }
}

/// Distance tiers for orbit segment counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    pub enabled: bool,

    /// Near tier below this camera distance in meters (default: 1000 km)
    pub near_dist: f64,

    /// Far tier at or beyond this camera distance in meters (default: 5000 km)
    pub mid_dist: f64,

    pub segments_near: usize,
    pub segments_mid: usize,
    pub segments_far: usize,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            near_dist: 1_000_000.0,
            mid_dist: 5_000_000.0,
            segments_near: 18,
            segments_mid: 12,
            segments_far: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Orbits of objects farther than this from the camera are hidden (default: 20000 km)
    pub orbit_cutoff_dist: f64,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            orbit_cutoff_dist: 20_000_000.0,
        }
    }
}

/// Displayed length of the forward trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailConfig {
    pub default_seconds: f64,
    pub min_seconds: f64,
    pub max_seconds: f64,
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            default_seconds: 5400.0,
            min_seconds: 300.0,
            max_seconds: 10_800.0,
        }
    }
}

/// Head marker pulse and glow dot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub enabled: bool,
    pub min_size: f64,
    pub max_size: f64,

    /// Pulse frequency in Hz
    pub speed: f64,

    pub glow_dot: bool,
    pub glow_dot_size: f64,
    pub glow_dot_pulse_amp: f64,
    pub glow_dot_base_alpha: f64,
    pub glow_dot_pulse_alpha: f64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 1.5,
            max_size: 3.5,
            speed: 1.8,
            glow_dot: true,
            glow_dot_size: 24.0,
            glow_dot_pulse_amp: 8.0,
            glow_dot_base_alpha: 0.15,
            glow_dot_pulse_alpha: 0.10,
        }
    }
}

/// Catmull-Rom smoothing of the head segment at close range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveConfig {
    pub enabled: bool,

    /// Curving turns on below this camera distance (default: 2000 km)
    pub enable_dist: f64,

    pub max_resampled_points: usize,

    /// Minimum age in frames before a cached curve is rebuilt (default: 60)
    pub update_every_n_frames: u64,

    pub tension: f64,

    /// Width of the on/off band as a fraction of `enable_dist` (default: 0.1)
    pub hysteresis: f64,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_dist: 2_000_000.0,
            max_resampled_points: 384,
            update_every_n_frames: 60,
            tension: 0.5,
            hysteresis: 0.1,
        }
    }
}

/// Ring buffer of recently observed positions behind each selected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryTrailConfig {
    pub enabled: bool,
    pub default_minutes: f64,
    pub max_points: usize,
    pub width: f64,
    pub alpha: f64,
}

impl Default for HistoryTrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_minutes: 10.0,
            max_points: 600,
            width: 2.0,
            alpha: 0.6,
        }
    }
}

/// Future-trajectory uncertainty rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyConfig {
    pub enabled: bool,
    pub mode: UncertaintyMode,
    pub dash_length: f64,
    pub future_start_alpha: f64,
    pub future_end_alpha: f64,

    /// Corridor half-width at the start of the future half, meters
    pub corridor_width_base: f64,

    /// Half-width growth per meter of along-track distance
    pub corridor_growth_rate: f64,

    /// Multiplier applied to TLE age in days for the age scale
    pub tle_epoch_age_multiplier: f64,

    pub max_corridor_width: f64,
    pub segment_count: usize,
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: UncertaintyMode::Simple,
            dash_length: 16.0,
            future_start_alpha: 0.5,
            future_end_alpha: 0.05,
            corridor_width_base: 500.0,
            corridor_growth_rate: 0.001,
            tle_epoch_age_multiplier: 1.5,
            max_corridor_width: 50_000.0,
            segment_count: 4,
        }
    }
}

/// TLE age thresholds and the visual cues they drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    pub warn_hours: f64,
    pub degraded_hours: f64,
    pub warn_alpha: f64,
    pub degraded_alpha: f64,
    pub warn_dash_length: f64,
    pub degraded_dash_length: f64,
    pub show_badge: bool,
    pub show_global_indicator: bool,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            warn_hours: 24.0,
            degraded_hours: 72.0,
            warn_alpha: 0.6,
            degraded_alpha: 0.3,
            warn_dash_length: 24.0,
            degraded_dash_length: 12.0,
            show_badge: true,
            show_global_indicator: true,
        }
    }
}

// ============================================================================
// LOADING & VALIDATION
// ============================================================================

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.stream;
        if s.max_keyframes < 2 {
            return Err(ConfigError::invalid("stream.max_keyframes", "must be at least 2"));
        }
        if !(s.keyframe_step_secs > 0.0) {
            return Err(ConfigError::invalid("stream.keyframe_step_secs", "must be positive"));
        }
        if !(s.reconnect_base_delay_secs > 0.0) || s.reconnect_max_delay_secs < s.reconnect_base_delay_secs {
            return Err(ConfigError::invalid(
                "stream.reconnect_max_delay_secs",
                "need 0 < base delay <= max delay",
            ));
        }
        if !(s.clock_smoothing > 0.0 && s.clock_smoothing <= 1.0) {
            return Err(ConfigError::invalid("stream.clock_smoothing", "must be in (0, 1]"));
        }

        let o = &self.orbit;
        if o.step_secs == 0 || o.horizon_secs < o.step_secs {
            return Err(ConfigError::invalid("orbit.step_secs", "need 0 < step <= horizon"));
        }

        let p = &self.performance;
        if p.batch_size == 0 {
            return Err(ConfigError::invalid("performance.batch_size", "must be at least 1"));
        }
        if p.offscreen_update_interval == 0
            || p.orbit_head_update_interval == 0
            || p.sweep_interval_frames == 0
            || p.staleness_ui_interval_frames == 0
            || self.visual.orbit.depth_update_interval == 0
        {
            return Err(ConfigError::invalid("performance", "frame intervals must be at least 1"));
        }

        let v = &self.visual;
        if v.orbit.gradient_segments == 0 {
            return Err(ConfigError::invalid("visual.orbit.gradient_segments", "must be at least 1"));
        }
        if v.orbit.depth_far_dist <= v.orbit.depth_near_dist {
            return Err(ConfigError::invalid("visual.orbit.depth_far_dist", "must exceed depth_near_dist"));
        }
        if v.lod.mid_dist <= v.lod.near_dist {
            return Err(ConfigError::invalid("visual.lod.mid_dist", "must exceed near_dist"));
        }
        if v.trail.min_seconds > v.trail.max_seconds {
            return Err(ConfigError::invalid("visual.trail", "min_seconds exceeds max_seconds"));
        }
        if v.history_trail.max_points == 0 {
            return Err(ConfigError::invalid("visual.history_trail.max_points", "must be at least 1"));
        }
        if v.curves.max_resampled_points < 2 {
            return Err(ConfigError::invalid("visual.curves.max_resampled_points", "must be at least 2"));
        }
        if v.staleness.degraded_hours < v.staleness.warn_hours {
            return Err(ConfigError::invalid("visual.staleness.degraded_hours", "must be >= warn_hours"));
        }
        Ok(())
    }
}
