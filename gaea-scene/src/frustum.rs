use bevy::math::{DMat4, DVec3, DVec4};

use crate::Plane;

/// A viewing volume bounded by six planes whose normals point inward.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub left: Plane,
    pub right: Plane,
    pub bottom: Plane,
    pub top: Plane,
    pub near: Plane,
    pub far: Plane,
}

impl Frustum {
    pub fn new(left: Plane, right: Plane, bottom: Plane, top: Plane, near: Plane, far: Plane) -> Self {
        Self {
            left,
            right,
            bottom,
            top,
            near,
            far,
        }
    }

    pub fn planes(&self) -> [&Plane; 6] {
        return [
            &self.left,
            &self.right,
            &self.bottom,
            &self.top,
            &self.near,
            &self.far,
        ];
    }

    /// Extracts the six clip planes from a projection matrix by adding and
    /// subtracting its rows, each normalized by the plane normal's length.
    pub fn from_projection_matrix(matrix: &DMat4) -> Frustum {
        let row = |i: usize| -> DVec4 {
            return DVec4::new(
                matrix.x_axis[i],
                matrix.y_axis[i],
                matrix.z_axis[i],
                matrix.w_axis[i],
            );
        };
        let plane_from = |v: DVec4| -> Plane {
            return Plane::from_normal(v.truncate(), v.w).normalize();
        };

        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
        return Frustum {
            left: plane_from(r3 + r0),
            right: plane_from(r3 - r0),
            bottom: plane_from(r3 + r1),
            top: plane_from(r3 - r1),
            near: plane_from(r3 + r2),
            far: plane_from(r3 - r2),
        };
    }

    pub fn transform_by_matrix(&self, matrix: &DMat4) -> Frustum {
        return Frustum {
            left: self.left.transform_by_matrix(matrix),
            right: self.right.transform_by_matrix(matrix),
            bottom: self.bottom.transform_by_matrix(matrix),
            top: self.top.transform_by_matrix(matrix),
            near: self.near.transform_by_matrix(matrix),
            far: self.far.transform_by_matrix(matrix),
        };
    }

    pub fn normalize(&self) -> Frustum {
        return Frustum {
            left: self.left.normalize(),
            right: self.right.normalize(),
            bottom: self.bottom.normalize(),
            top: self.top.normalize(),
            near: self.near.normalize(),
            far: self.far.normalize(),
        };
    }

    pub fn contains_point(&self, point: &DVec3) -> bool {
        for plane in self.planes() {
            if plane.dot(point) <= 0.0 {
                return false;
            }
        }
        return true;
    }

    /// True when any part of the segment lies inside the frustum.
    pub fn intersects_segment(&self, point_a: &DVec3, point_b: &DVec3) -> bool {
        if self.contains_point(point_a) || self.contains_point(point_b) {
            return true;
        }
        if point_a == point_b {
            return false;
        }

        for plane in self.planes() {
            // Both points behind one plane puts the segment outside.
            if plane.on_same_side(point_a, point_b) < 0 {
                return false;
            }
            if plane.clip(point_a, point_b).is_some() {
                return true;
            }
        }
        return false;
    }
}
