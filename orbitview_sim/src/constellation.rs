//! Ground-truth constellation (the "Oracle").
//!
//! Every object flies a circular two-body orbit defined in the inertial
//! frame. Earth-fixed positions are derived with the same sidereal rotation
//! the engine uses to undo inertial responses, so truth in either frame is
//! exact at any instant.

use nalgebra::{Rotation3, Vector3};
use orbitview_core::frames::teme_to_ecef;
use orbitview_core::Vec3;
use orbitview_env::ObjectId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::f64::consts::{PI, TAU};

/// Earth gravitational parameter (m³/s²).
pub const MU_EARTH: f64 = 3.986_004_418e14;

/// Mean equatorial radius (m).
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Sidereal rotation rate (rad/s).
pub const EARTH_ROTATION_RATE: f64 = 7.292_115_9e-5;

/// First catalog number handed out.
pub const FIRST_OBJECT_ID: u32 = 40_000;

/// Circular orbit of one object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircularOrbit {
    /// Orbit radius (m)
    pub radius: f64,

    pub inclination: f64,

    /// Right ascension of the ascending node
    pub raan: f64,

    /// Argument of latitude at the constellation epoch
    pub phase: f64,

    /// rad/s
    pub mean_motion: f64,
}

impl CircularOrbit {
    pub fn new(radius: f64, inclination: f64, raan: f64, phase: f64) -> Self {
        Self {
            radius,
            inclination,
            raan,
            phase,
            mean_motion: (MU_EARTH / radius.powi(3)).sqrt(),
        }
    }

    /// Inertial speed (m/s).
    pub fn speed(&self) -> f64 {
        self.radius * self.mean_motion
    }

    /// Inertial position `dt` seconds after the epoch.
    pub fn position(&self, dt: f64) -> Vec3 {
        let u = self.phase + self.mean_motion * dt;
        let in_plane = Vector3::new(self.radius * u.cos(), self.radius * u.sin(), 0.0);
        let tilt = Rotation3::from_axis_angle(&Vector3::x_axis(), self.inclination);
        let node = Rotation3::from_axis_angle(&Vector3::z_axis(), self.raan);
        node * (tilt * in_plane)
    }
}

/// Seeded set of orbiting objects.
#[derive(Debug, Clone)]
pub struct Constellation {
    orbits: BTreeMap<ObjectId, CircularOrbit>,

    /// Unix seconds at which every `phase` is measured
    epoch: f64,
}

impl Constellation {
    /// Generates `count` LEO objects between 400 and 1200 km altitude.
    pub fn generate(seed: u64, count: usize, epoch: f64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let orbits = (0..count)
            .map(|i| {
                let orbit = CircularOrbit::new(
                    EARTH_RADIUS + rng.gen_range(400_000.0..1_200_000.0),
                    rng.gen_range(0.0..PI),
                    rng.gen_range(0.0..TAU),
                    rng.gen_range(0.0..TAU),
                );
                (ObjectId(FIRST_OBJECT_ID + i as u32), orbit)
            })
            .collect();

        Self { orbits, epoch }
    }

    /// Empty constellation; objects are added with [`Constellation::insert`].
    pub fn empty(epoch: f64) -> Self {
        Self {
            orbits: BTreeMap::new(),
            epoch,
        }
    }

    pub fn insert(&mut self, id: ObjectId, orbit: CircularOrbit) {
        self.orbits.insert(id, orbit);
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.orbits.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.orbits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orbits.is_empty()
    }

    pub fn orbit(&self, id: ObjectId) -> Option<&CircularOrbit> {
        self.orbits.get(&id)
    }

    /// Inertial (TEME-like) position at Unix time `t`.
    pub fn inertial_position(&self, id: ObjectId, t: f64) -> Option<Vec3> {
        Some(self.orbits.get(&id)?.position(t - self.epoch))
    }

    /// Earth-fixed position at Unix time `t`.
    pub fn position(&self, id: ObjectId, t: f64) -> Option<Vec3> {
        let inertial = self.inertial_position(id, t)?;
        Some(teme_to_ecef(&inertial, t))
    }

    /// Upper bound on any object's Earth-fixed speed (m/s).
    pub fn max_ground_speed(&self) -> f64 {
        self.orbits
            .values()
            .map(|o| o.speed() + EARTH_ROTATION_RATE * o.radius)
            .fold(0.0, f64::max)
    }
}
