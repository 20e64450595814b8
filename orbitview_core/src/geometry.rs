//! Shared geometry: vectors, the camera and view-frustum culling.

use nalgebra::Vector3;
use orbitview_env::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Earth-fixed position in meters.
pub type Vec3 = Vector3<f64>;

/// Builds a vector from a wire triple, rejecting wrong arity and non-finite values.
pub fn vec3_from_slice(values: &[f64]) -> Option<Vec3> {
    match values {
        [x, y, z] if x.is_finite() && y.is_finite() && z.is_finite() => Some(Vec3::new(*x, *y, *z)),
        _ => None,
    }
}

/// Linear blend that is exact at both ends (`t = 0` gives `a`, `t = 1` gives `b`).
pub fn lerp(a: &Vec3, b: &Vec3, t: f64) -> Vec3 {
    a * (1.0 - t) + b * t
}

/// Containment test used for off-screen throttling.
pub trait Frustum {
    fn contains(&self, point: &Vec3) -> bool;
}

/// A frustum that sees everything (culling disabled, headless hosts).
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl Frustum for Unbounded {
    fn contains(&self, _point: &Vec3) -> bool {
        true
    }
}

/// Perspective camera supplied by the host each frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Eye position (Earth-fixed meters)
    pub position: Vec3,

    /// Viewing direction (need not be normalized)
    pub direction: Vec3,

    /// Approximate up vector
    pub up: Vec3,

    /// Vertical field of view in radians
    pub fov_y: f64,

    /// Width / height
    pub aspect: f64,

    pub near: f64,
    pub far: f64,
}

impl Camera {
    /// Camera at `position` looking at the Earth's center.
    pub fn looking_at_earth(position: Vec3) -> Self {
        let direction = -position;
        let up = if direction.cross(&Vec3::z()).norm_squared() > 1e-12 {
            Vec3::z()
        } else {
            Vec3::y()
        };
        Self {
            position,
            direction,
            up,
            fov_y: 60f64.to_radians(),
            aspect: 16.0 / 9.0,
            near: 1.0,
            far: 1.0e9,
        }
    }

    /// Distance from the eye to `point`.
    pub fn distance_to(&self, point: &Vec3) -> f64 {
        (point - self.position).norm()
    }
}

impl Frustum for Camera {
    fn contains(&self, point: &Vec3) -> bool {
        let forward = match self.direction.try_normalize(1e-12) {
            Some(f) => f,
            None => return true,
        };
        let right = match forward.cross(&self.up).try_normalize(1e-12) {
            Some(r) => r,
            None => return true,
        };
        let true_up = right.cross(&forward);

        let d = point - self.position;
        let z = d.dot(&forward);
        if z < self.near || z > self.far {
            return false;
        }

        let tan_half = (self.fov_y * 0.5).tan();
        d.dot(&true_up).abs() <= z * tan_half && d.dot(&right).abs() <= z * tan_half * self.aspect
    }
}

/// Anything that can say where an object is right now.
pub trait PositionSource {
    fn position(&self, id: ObjectId) -> Option<Vec3>;
}

/// Last written position of every object, as the renderer sees it.
///
/// This is the "current rendered position" orbit frame detection and the
/// history trail read from.
#[derive(Debug, Clone, Default)]
pub struct PositionTable {
    positions: HashMap<ObjectId, Vec3>,
}

impl PositionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ObjectId) -> Option<&Vec3> {
        self.positions.get(&id)
    }

    pub fn set(&mut self, id: ObjectId, position: Vec3) {
        self.positions.insert(id, position);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }
}

impl PositionSource for PositionTable {
    fn position(&self, id: ObjectId) -> Option<Vec3> {
        self.get(id).copied()
    }
}
