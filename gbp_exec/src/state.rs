//! # Body State
//!
//! The reduced body state used throughout planning. It captures where the body is, how it is
//! moving, and which way it faces, which is enough to score a state against the terrain without
//! modelling the legs.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use util::maths::{get_ang_dist, wrap_to_pi};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A point in the planning configuration space.
///
/// All quantities are expressed in the terrain (world) frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Position of the body centre, in meters.
    pub position_m: Vector3<f64>,

    /// Linear velocity of the body centre, in meters/second.
    #[serde(default = "zero_vector")]
    pub velocity_ms: Vector3<f64>,

    /// Heading of the body about the world Z axis, in radians. Kept in [-pi, pi).
    #[serde(default)]
    pub yaw_rad: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl State {
    /// Create a new state, wrapping the yaw into [-pi, pi).
    pub fn new(position_m: Vector3<f64>, velocity_ms: Vector3<f64>, yaw_rad: f64) -> Self {
        Self {
            position_m,
            velocity_ms,
            yaw_rad: wrap_to_pi(yaw_rad),
        }
    }

    /// Create a stationary state at the given position and heading.
    pub fn at_rest(x_m: f64, y_m: f64, z_m: f64, yaw_rad: f64) -> Self {
        Self::new(Vector3::new(x_m, y_m, z_m), Vector3::zeros(), yaw_rad)
    }

    /// The planar (XY) position of the body.
    pub fn position2(&self) -> Vector2<f64> {
        self.position_m.xy()
    }

    /// The magnitude of the body velocity.
    pub fn speed_ms(&self) -> f64 {
        self.velocity_ms.norm()
    }

    /// Linearly interpolate between `self` (at `t = 0`) and `other` (at `t = 1`).
    ///
    /// Position and velocity are interpolated linearly, yaw along the shortest arc.
    pub fn interpolate(&self, other: &State, t: f64) -> State {
        State::new(
            self.position_m + (other.position_m - self.position_m) * t,
            self.velocity_ms + (other.velocity_ms - self.velocity_ms) * t,
            self.yaw_rad + get_ang_dist(self.yaw_rad, other.yaw_rad) * t,
        )
    }
}

fn zero_vector() -> Vector3<f64> {
    Vector3::zeros()
}

impl Default for State {
    fn default() -> Self {
        Self::at_rest(0.0, 0.0, 0.0, 0.0)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_interpolate() {
        let a = State::at_rest(0.0, 0.0, 0.3, PI - 0.1);
        let b = State::new(Vector3::new(2.0, -2.0, 0.5), Vector3::new(1.0, 0.0, 0.0), -PI + 0.1);

        let mid = a.interpolate(&b, 0.5);
        assert!((mid.position_m - Vector3::new(1.0, -1.0, 0.4)).norm() < 1e-12);
        assert!((mid.velocity_ms - Vector3::new(0.5, 0.0, 0.0)).norm() < 1e-12);

        // Crosses the +-pi boundary rather than sweeping through zero
        assert!((mid.yaw_rad.abs() - PI).abs() < 1e-9);

        let start = a.interpolate(&b, 0.0);
        assert!((start.position_m - a.position_m).norm() < 1e-12);
        assert!(get_ang_dist(start.yaw_rad, a.yaw_rad).abs() < 1e-12);
        assert!((a.interpolate(&b, 1.0).position_m - b.position_m).norm() < 1e-12);
    }

    #[test]
    fn test_deserialize_defaults() {
        let s: State = util::params::from_str("position_m = [1.0, 2.0, 0.3]").unwrap();
        assert_eq!(s, State::at_rest(1.0, 2.0, 0.3, 0.0));
    }
}
