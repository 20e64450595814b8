//! JSON exporter for offline inspection of a run.
//!
//! Frames are sampled from the runner at a fixed interval and written as a
//! single pretty-printed document.

use orbitview_core::Vec3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single sampled frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Host seconds since simulation start
    pub time_sec: f64,

    /// Engine animation time (backend clock, Unix seconds)
    pub backend_time: f64,

    /// Connection status line
    pub connection: String,

    pub keyframes: usize,

    /// Positions written this frame
    pub updated: usize,

    /// Objects skipped by frustum culling this frame
    pub culled: usize,

    /// Live polylines in the scene
    pub polylines: usize,

    /// Selected objects and where the engine draws them
    pub selected: Vec<ObjectPosition>,

    /// Rendered orbits of selected objects
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub orbits: Vec<OrbitSummary>,

    /// `OK`, `STALE` or `DEGRADED`
    pub staleness: String,

    /// Log-worthy events since the previous sample
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// Position of an object, engine vs. truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectPosition {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,

    /// Distance to the ground-truth position at the true backend time (m)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_m: Option<f64>,
}

impl ObjectPosition {
    pub fn new(id: u32, pos: Vec3, error_m: Option<f64>) -> Self {
        Self {
            id,
            x: pos.x,
            y: pos.y,
            z: pos.z,
            error_m,
        }
    }
}

/// Render summary of one orbit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbitSummary {
    pub id: u32,
    pub tier: String,
    pub segments: usize,
    pub curved: bool,
    pub visible: bool,
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// RMS interpolation error over the run (m)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rms_error_m: Option<f64>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
            rms_error_m: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>, rms_error_m: Option<f64>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
        self.rms_error_m = rms_error_m;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
