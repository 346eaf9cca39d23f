use bevy::math::{DMat4, DVec3, DVec4};

/// A ray with an origin and a direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Line {
    pub origin: DVec3,
    pub direction: DVec3,
}

impl Line {
    pub fn new(origin: DVec3, direction: DVec3) -> Self {
        Self { origin, direction }
    }

    pub fn from_segment(point_a: DVec3, point_b: DVec3) -> Self {
        Self {
            origin: point_a,
            direction: point_b - point_a,
        }
    }

    pub fn point_at(&self, t: f64) -> DVec3 {
        return self.origin + self.direction * t;
    }
}

/// A plane in Hessian normal form: `normal . p + distance == 0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub distance: f64,
}

impl Plane {
    pub fn new(x: f64, y: f64, z: f64, distance: f64) -> Self {
        Self {
            normal: DVec3::new(x, y, z),
            distance,
        }
    }

    pub fn from_normal(normal: DVec3, distance: f64) -> Self {
        Self { normal, distance }
    }

    /// Signed distance scaled by the normal's length.
    pub fn dot(&self, point: &DVec3) -> f64 {
        return self.normal.dot(*point) + self.distance;
    }

    /// The same plane with a unit-length normal.
    pub fn normalize(&self) -> Plane {
        let magnitude = self.normal.length();
        if magnitude == 0.0 {
            return *self;
        }
        return Plane {
            normal: self.normal / magnitude,
            distance: self.distance / magnitude,
        };
    }

    /// Transforms the plane coefficients as a column vector. To transform a
    /// plane by a matrix M applied to points, pass the inverse transpose of M.
    pub fn transform_by_matrix(&self, matrix: &DMat4) -> Plane {
        let p = *matrix
            * DVec4::new(self.normal.x, self.normal.y, self.normal.z, self.distance);
        return Plane {
            normal: p.truncate(),
            distance: p.w,
        };
    }

    /// -1 when both points are behind the plane, +1 when both are in front,
    /// 0 when they straddle it or touch it.
    pub fn on_same_side(&self, point_a: &DVec3, point_b: &DVec3) -> i32 {
        let da = self.dot(point_a);
        let db = self.dot(point_b);
        if da < 0.0 && db < 0.0 {
            return -1;
        }
        if da > 0.0 && db > 0.0 {
            return 1;
        }
        return 0;
    }

    /// Clips the segment to the plane. Returns the portion on or in front of
    /// the plane, or `None` when the segment does not cross it.
    pub fn clip(&self, point_a: &DVec3, point_b: &DVec3) -> Option<(DVec3, DVec3)> {
        if point_a == point_b {
            return None;
        }

        let line = Line::from_segment(*point_a, *point_b);
        let l_dot_v = self.normal.dot(line.direction);

        // Segment parallel to the plane: in the plane or not at all.
        if l_dot_v == 0.0 {
            let l_dot_s = self.dot(&line.origin);
            if l_dot_s == 0.0 {
                return Some((*point_a, *point_b));
            }
            return None;
        }

        let t = -self.dot(&line.origin) / l_dot_v;
        if !(0.0..=1.0).contains(&t) {
            return None;
        }

        let intersection = line.point_at(t);
        if l_dot_v > 0.0 {
            return Some((intersection, *point_b));
        }
        return Some((*point_a, intersection));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_is_signed_distance_for_unit_normal() {
        let plane = Plane::new(0.0, 0.0, 1.0, -5.0); // z == 5
        assert_eq!(plane.dot(&DVec3::new(0.0, 0.0, 8.0)), 3.0);
        assert_eq!(plane.dot(&DVec3::new(0.0, 0.0, 2.0)), -3.0);
    }

    #[test]
    fn clip_splits_a_crossing_segment() {
        let plane = Plane::new(0.0, 0.0, 1.0, 0.0); // z == 0
        let a = DVec3::new(0.0, 0.0, -1.0);
        let b = DVec3::new(0.0, 0.0, 3.0);
        let (start, end) = plane.clip(&a, &b).unwrap();
        assert_eq!(start, DVec3::ZERO);
        assert_eq!(end, b);

        let above_a = DVec3::new(0.0, 0.0, 1.0);
        let above_b = DVec3::new(0.0, 0.0, 2.0);
        assert!(plane.clip(&above_a, &above_b).is_none());
    }

    #[test]
    fn on_same_side_detects_straddling() {
        let plane = Plane::new(1.0, 0.0, 0.0, 0.0);
        let left = DVec3::new(-1.0, 0.0, 0.0);
        let right = DVec3::new(1.0, 0.0, 0.0);
        assert_eq!(plane.on_same_side(&left, &right), 0);
        assert_eq!(plane.on_same_side(&left, &(left * 2.0)), -1);
        assert_eq!(plane.on_same_side(&right, &(right * 2.0)), 1);
    }
}
