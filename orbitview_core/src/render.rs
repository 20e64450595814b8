//! Narrow rendering interface consumed by the engine.
//!
//! The engine never owns GPU objects. It creates, mutates and removes
//! polylines through [`RenderBackend`] handles; the host maps those onto
//! its scene graph. [`SceneRecorder`] is an in-memory backend used by the
//! headless client, the simulator and tests.

use crate::geometry::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Straight RGBA color, components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Rgba {
    pub const GREEN: Rgba = Rgba::new(0.0, 1.0, 0.0, 1.0);
    pub const CYAN: Rgba = Rgba::new(0.0, 1.0, 1.0, 1.0);
    pub const ORANGE: Rgba = Rgba::new(1.0, 0.65, 0.0, 1.0);

    pub const fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    pub fn with_alpha(self, a: f64) -> Self {
        Self { a, ..self }
    }
}

/// Polyline surface appearance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Material {
    pub color: Rgba,

    /// Dash length in pixels; `None` draws a solid line
    pub dash_length: Option<f64>,

    /// Glow power; `None` draws without glow
    pub glow: Option<f64>,
}

impl Material {
    pub fn solid(color: Rgba) -> Self {
        Self {
            color,
            dash_length: None,
            glow: None,
        }
    }

    pub fn glowing(color: Rgba, glow: f64) -> Self {
        Self {
            color,
            dash_length: None,
            glow: Some(glow),
        }
    }

    pub fn dashed(color: Rgba, dash_length: f64) -> Self {
        Self {
            color,
            dash_length: Some(dash_length),
            glow: None,
        }
    }
}

/// Everything needed to create a polyline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolylineSpec {
    /// Stable descriptive key, e.g. `orbit-seg-42-7-0`
    pub key: String,
    pub positions: Vec<Vec3>,
    pub width: f64,
    pub material: Material,
    pub visible: bool,
}

/// Opaque handle to a polyline owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PolylineHandle(pub u64);

/// Scene mutations the engine needs.
pub trait RenderBackend {
    fn add_polyline(&mut self, spec: PolylineSpec) -> PolylineHandle;
    fn remove_polyline(&mut self, handle: PolylineHandle);
    fn update_positions(&mut self, handle: PolylineHandle, positions: &[Vec3]);
    fn set_width(&mut self, handle: PolylineHandle, width: f64);
    fn set_material(&mut self, handle: PolylineHandle, material: Material);
    fn set_visible(&mut self, handle: PolylineHandle, visible: bool);
}

/// One recorded scene mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SceneOp {
    Added(PolylineHandle),
    Removed(PolylineHandle),
}

/// In-memory [`RenderBackend`] that keeps every live polyline and an
/// add/remove log.
#[derive(Debug, Clone, Default)]
pub struct SceneRecorder {
    polylines: BTreeMap<PolylineHandle, PolylineSpec>,
    next_handle: u64,
    log: Vec<SceneOp>,

    /// Mutations addressed to handles that no longer exist
    stale_writes: u64,
}

impl SceneRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: PolylineHandle) -> Option<&PolylineSpec> {
        self.polylines.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.polylines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polylines.is_empty()
    }

    /// Live polylines whose key starts with `prefix`.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (PolylineHandle, &'a PolylineSpec)> + 'a {
        self.polylines
            .iter()
            .filter(move |(_, spec)| spec.key.starts_with(prefix))
            .map(|(h, spec)| (*h, spec))
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.with_prefix(prefix).count()
    }

    pub fn log(&self) -> &[SceneOp] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    pub fn stale_writes(&self) -> u64 {
        self.stale_writes
    }

    fn with_spec(&mut self, handle: PolylineHandle, f: impl FnOnce(&mut PolylineSpec)) {
        match self.polylines.get_mut(&handle) {
            Some(spec) => f(spec),
            None => self.stale_writes += 1,
        }
    }
}

impl RenderBackend for SceneRecorder {
    fn add_polyline(&mut self, spec: PolylineSpec) -> PolylineHandle {
        self.next_handle += 1;
        let handle = PolylineHandle(self.next_handle);
        self.polylines.insert(handle, spec);
        self.log.push(SceneOp::Added(handle));
        handle
    }

    fn remove_polyline(&mut self, handle: PolylineHandle) {
        if self.polylines.remove(&handle).is_some() {
            self.log.push(SceneOp::Removed(handle));
        } else {
            self.stale_writes += 1;
        }
    }

    fn update_positions(&mut self, handle: PolylineHandle, positions: &[Vec3]) {
        self.with_spec(handle, |spec| {
            spec.positions.clear();
            spec.positions.extend_from_slice(positions);
        });
    }

    fn set_width(&mut self, handle: PolylineHandle, width: f64) {
        self.with_spec(handle, |spec| spec.width = width);
    }

    fn set_material(&mut self, handle: PolylineHandle, material: Material) {
        self.with_spec(handle, |spec| spec.material = material);
    }

    fn set_visible(&mut self, handle: PolylineHandle, visible: bool) {
        self.with_spec(handle, |spec| spec.visible = visible);
    }
}
