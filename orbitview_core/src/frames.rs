//! Inertial → Earth-fixed frame conversion.
//!
//! Some backends return propagated positions in the TEME inertial frame.
//! Rotating about the Earth's spin axis by Greenwich Mean Sidereal Time
//! gives Earth-fixed coordinates (polar motion and nutation are ignored,
//! which is well below visual resolution).

use crate::geometry::Vec3;
use nalgebra::{Rotation3, Vector3};

/// Unix seconds of the J2000 epoch (2000-01-01T12:00:00Z).
pub const J2000_UNIX_SECS: f64 = 946_728_000.0;

const SECONDS_PER_DAY: f64 = 86_400.0;
const DAYS_PER_CENTURY: f64 = 36_525.0;

// IAU 1982 GMST polynomial, degrees
const GMST_BASE_DEG: f64 = 280.460_618_37;
const GMST_ROTATION_PER_DAY: f64 = 360.985_647_366_29;
const GMST_CORRECTION: f64 = 0.000_387_933;
const GMST_CUBIC_DIVISOR: f64 = 38_710_000.0;

/// Greenwich Mean Sidereal Time in radians, normalized to `[0, 2π)`.
pub fn greenwich_mean_sidereal_time(unix_secs: f64) -> f64 {
    let d = (unix_secs - J2000_UNIX_SECS) / SECONDS_PER_DAY;
    let t = d / DAYS_PER_CENTURY;

    let gmst_deg = GMST_BASE_DEG + GMST_ROTATION_PER_DAY * d + GMST_CORRECTION * t * t
        - t * t * t / GMST_CUBIC_DIVISOR;

    gmst_deg.rem_euclid(360.0).to_radians()
}

/// Rotation taking TEME vectors at `unix_secs` to Earth-fixed.
pub fn teme_to_ecef_rotation(unix_secs: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::z_axis(), -greenwich_mean_sidereal_time(unix_secs))
}

/// Rotates one TEME position to Earth-fixed.
pub fn teme_to_ecef(position: &Vec3, unix_secs: f64) -> Vec3 {
    teme_to_ecef_rotation(unix_secs) * position
}

/// Inverse of [`teme_to_ecef`], used by the simulator to fabricate inertial responses.
pub fn ecef_to_teme(position: &Vec3, unix_secs: f64) -> Vec3 {
    teme_to_ecef_rotation(unix_secs).inverse() * position
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gmst_at_j2000() {
        assert_relative_eq!(
            greenwich_mean_sidereal_time(J2000_UNIX_SECS),
            GMST_BASE_DEG.to_radians(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_gmst_advances_one_sidereal_day() {
        // One sidereal day later the angle wraps back to (almost) the same value
        let sidereal_day = 86_164.0905;
        let a = greenwich_mean_sidereal_time(1_700_000_000.0);
        let b = greenwich_mean_sidereal_time(1_700_000_000.0 + sidereal_day);
        assert_relative_eq!(a, b, epsilon = 1e-4);
    }

    #[test]
    fn test_rotation_preserves_radius_and_z() {
        let p = Vec3::new(6_771_000.0, 12_000.0, 350_000.0);
        let e = teme_to_ecef(&p, 1_700_000_123.0);
        assert_relative_eq!(e.norm(), p.norm(), epsilon = 1e-6);
        assert_relative_eq!(e.z, p.z, epsilon = 1e-9);
    }

    #[test]
    fn test_round_trip_through_inertial() {
        let p = Vec3::new(-4_000_000.0, 5_200_000.0, 1_100_000.0);
        let t = 1_712_345_678.5;
        let back = teme_to_ecef(&ecef_to_teme(&p, t), t);
        assert_relative_eq!(back, p, epsilon = 1e-6);
    }

    #[test]
    fn test_rotation_direction() {
        // At GMST = θ, the inertial x axis appears at longitude -θ
        let t = 1_700_000_000.0;
        let theta = greenwich_mean_sidereal_time(t);
        let e = teme_to_ecef(&Vec3::new(1.0, 0.0, 0.0), t);
        assert_relative_eq!(e.x, theta.cos(), epsilon = 1e-12);
        assert_relative_eq!(e.y, -theta.sin(), epsilon = 1e-12);
    }
}
