mod epsilon;
mod matrix;

pub use epsilon::*;
pub use matrix::*;

use std::f64::consts::{PI, TAU};

pub const DEGREES_TO_RADIANS: f64 = PI / 180.0;
pub const RADIANS_TO_DEGREES: f64 = 180.0 / PI;

pub fn equals_epsilon(
    left: f64,
    right: f64,
    relative_epsilon: Option<f64>,
    absolute_epsilon: Option<f64>,
) -> bool {
    let relative_epsilon = relative_epsilon.unwrap_or(0.0);
    let absolute_epsilon = absolute_epsilon.unwrap_or(relative_epsilon);
    let diff = (left - right).abs();
    return diff <= absolute_epsilon
        || diff <= relative_epsilon * left.abs().max(right.abs());
}

pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Signed cube root.
pub fn cbrt(x: f64) -> f64 {
    let y = x.abs().powf(1.0 / 3.0);
    return if x < 0.0 { -y } else { y };
}

pub fn zero_to_two_pi(angle: f64) -> f64 {
    if angle >= 0.0 && angle <= TAU {
        return angle;
    }
    let rem = angle % TAU;
    if rem.abs() < EPSILON14 && angle.abs() > EPSILON14 {
        return TAU;
    }
    return if rem < 0.0 { rem + TAU } else { rem };
}

pub fn negative_pi_to_pi(angle: f64) -> f64 {
    if angle >= -PI && angle <= PI {
        return angle;
    }
    return zero_to_two_pi(angle + PI) - PI;
}

/// Distance to the horizon from `altitude` meters above a sphere of the
/// given radius. Zero when either quantity is non-positive.
pub fn horizon_distance_for_globe_radius(radius: f64, altitude: f64) -> f64 {
    if radius > 0.0 && altitude > 0.0 {
        (altitude * (2.0 * radius + altitude)).sqrt()
    } else {
        0.0
    }
}

/// The near distance that keeps one depth-buffer unit of resolution no
/// coarser than `far_resolution` meters at the far plane.
pub fn perspective_near_distance_for_far_distance(
    far_distance: f64,
    far_resolution: f64,
    depth_bits: u32,
) -> f64 {
    let max_depth_value = ((1_u64 << depth_bits) - 1) as f64;
    return far_distance
        / (max_depth_value / (1.0 - far_resolution / far_distance) - max_depth_value + 1.0);
}

/// The largest near distance whose frustum corners stay within
/// `distance_to_surface` of the eye. Derived from the corner distance of the
/// near rectangle: d^2 = (n^2/4)(a^2 + 5), solved for n.
pub fn perspective_near_distance(
    viewport_width: f64,
    viewport_height: f64,
    distance_to_surface: f64,
) -> f64 {
    let aspect = if viewport_height < viewport_width {
        viewport_height / viewport_width
    } else {
        viewport_width / viewport_height
    };
    return 2.0 * distance_to_surface / (aspect * aspect + 5.0).sqrt();
}

/// The rectangle carved out of the frustum at the given distance along the
/// -Z axis, as (min_x, min_y, width, height). The frustum width at distance
/// d is d, giving a fixed horizontal field of view.
pub fn perspective_frustum_rectangle(
    viewport_width: f64,
    viewport_height: f64,
    distance: f64,
) -> (f64, f64, f64, f64) {
    let aspect = viewport_height / viewport_width;
    return (
        -distance / 2.0,
        -aspect * distance / 2.0,
        distance,
        aspect * distance,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_epsilon_absolute_and_relative() {
        assert!(equals_epsilon(1.0, 1.0 + 1e-15, Some(EPSILON14), None));
        assert!(!equals_epsilon(1.0, 1.01, Some(EPSILON14), None));
        assert!(equals_epsilon(1e20, 1e20 + 1e7, Some(EPSILON12), None));
    }

    #[test]
    fn cbrt_handles_negative_input() {
        assert!(equals_epsilon(cbrt(-27.0), -3.0, None, Some(EPSILON12)));
        assert!(equals_epsilon(cbrt(27.0), 3.0, None, Some(EPSILON12)));
    }

    #[test]
    fn horizon_distance_at_sea_level_is_zero() {
        assert_eq!(horizon_distance_for_globe_radius(6378137.0, 0.0), 0.0);
        assert!(horizon_distance_for_globe_radius(6378137.0, 10000.0) > 0.0);
    }

    #[test]
    fn near_distance_shrinks_with_depth_bits() {
        let far = 1.0e7;
        let n16 = perspective_near_distance_for_far_distance(far, 10.0, 16);
        let n24 = perspective_near_distance_for_far_distance(far, 10.0, 24);
        assert!(n24 < n16);
        assert!(n24 > 0.0);
    }
}
