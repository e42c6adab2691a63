//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::{Float, FloatConst};

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// The return value `r` satisfies `0.0 <= r < rhs.abs()` in most cases, though floating point
/// round-off can produce `r == rhs.abs()` when `lhs` is much smaller than `rhs.abs()` in magnitude
/// and `lhs < 0.0`.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs.abs()
    } else {
        r
    }
}

/// Wrap an angle into the range [-pi, pi).
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: Float + FloatConst,
{
    rem_euclid(angle + T::PI(), T::PI() + T::PI()) - T::PI()
}

/// Get the signed shortest angular distance from `a` to `b`, in the range [-pi, pi).
///
/// Adding the result to `a` gives an angle equivalent to `b`.
pub fn get_ang_dist<T>(a: T, b: T) -> T
where
    T: Float + FloatConst,
{
    wrap_to_pi(b - a)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI, TAU};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_get_ang_dist() {
        assert!(close(get_ang_dist(1f64, 2f64), 1f64));
        assert!(close(get_ang_dist(2f64, 1f64), -1f64));
        assert!(close(get_ang_dist(0f64, TAU), 0f64));
        assert!(close(get_ang_dist(1f64, TAU), -1f64));
        assert!(close(get_ang_dist(PI - 0.1, -PI + 0.1), 0.2));
        assert!(close(get_ang_dist(-FRAC_PI_2, FRAC_PI_2).abs(), PI));
    }

    #[test]
    fn test_wrap_to_pi() {
        assert!(close(wrap_to_pi(3.0 * PI / 2.0), -FRAC_PI_2));
        assert!(close(wrap_to_pi(-3.0 * PI / 2.0), FRAC_PI_2));
        assert!(close(wrap_to_pi(0.5), 0.5));
    }
}
