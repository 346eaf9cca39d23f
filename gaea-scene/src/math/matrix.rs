use bevy::math::{DMat3, DMat4, DVec3, DVec4};

use crate::{GeomError, Globe, Position};

use super::{perspective_frustum_rectangle, DEGREES_TO_RADIANS};

/// Viewport rectangle in screen coordinates, origin at the lower left.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

const LU_TINY: f64 = 1.0e-20;
const SINGULAR_DETERMINANT: f64 = 1.0e-8;

pub trait Matrix4Ext {
    /// Applies the affine transform to a point (w assumed 1, not divided).
    fn multiply_by_point(&self, point: &DVec3) -> DVec3;
    /// Applies the transform to a direction (translation ignored).
    fn multiply_by_vector(&self, vector: &DVec3) -> DVec3;
    /// General inverse by LU decomposition with scaled partial pivoting.
    /// Returns `None` when the determinant magnitude is below 1e-8.
    fn try_invert_general(&self) -> Option<DMat4>;
    /// Closed-form inverse assuming the upper 3x3 is a pure rotation.
    fn inverse_transformation(&self) -> DMat4;
    /// The eye point of a modelview matrix, in model coordinates.
    fn extract_eye_point(&self) -> DVec3;
    /// The forward-looking direction of a modelview matrix.
    fn extract_forward_vector(&self) -> DVec3;
    fn upper_3x3(&self) -> DMat3;
    /// Scales the element that maps eye Z to clip Z, pulling projected depth
    /// toward (negative offset) or away from (positive offset) the eye.
    fn offset_projection_depth(&mut self, depth_offset: f64);
    /// Unprojects a screen point through this matrix, which must be the
    /// inverse of a modelview-projection matrix. The screen point's z is a
    /// depth in [0, 1]. `None` when the depth is outside the clip volume or
    /// the transformed w is zero.
    fn unproject(&self, screen_point: &DVec3, viewport: &Viewport) -> Option<DVec3>;
}

impl Matrix4Ext for DMat4 {
    fn multiply_by_point(&self, point: &DVec3) -> DVec3 {
        return self.transform_point3(*point);
    }

    fn multiply_by_vector(&self, vector: &DVec3) -> DVec3 {
        return self.transform_vector3(*vector);
    }

    fn try_invert_general(&self) -> Option<DMat4> {
        let mut a = to_rows(self);
        let mut index = [0usize; 4];
        let mut d = ludcmp(&mut a, &mut index);
        if d == 0.0 {
            return None;
        }
        for (i, row) in a.iter().enumerate() {
            d *= row[i];
        }
        if d.abs() < SINGULAR_DETERMINANT {
            return None;
        }

        let mut inverse = [[0.0f64; 4]; 4];
        for j in 0..4 {
            let mut b = [0.0f64; 4];
            b[j] = 1.0;
            lubksb(&a, &index, &mut b);
            for i in 0..4 {
                inverse[i][j] = b[i];
            }
        }
        return Some(from_rows(&inverse));
    }

    fn inverse_transformation(&self) -> DMat4 {
        let rotation = self.upper_3x3().transpose();
        let translation = -(rotation * self.w_axis.truncate());
        let mut result = DMat4::from_mat3(DMat3::from_cols(
            rotation.x_axis,
            rotation.y_axis,
            rotation.z_axis,
        ));
        result.w_axis = translation.extend(1.0);
        return result;
    }

    fn extract_eye_point(&self) -> DVec3 {
        let rotation = self.upper_3x3();
        return -(rotation.transpose() * self.w_axis.truncate());
    }

    fn extract_forward_vector(&self) -> DVec3 {
        return -DVec3::new(self.x_axis.z, self.y_axis.z, self.z_axis.z);
    }

    fn upper_3x3(&self) -> DMat3 {
        return DMat3::from_cols(
            self.x_axis.truncate(),
            self.y_axis.truncate(),
            self.z_axis.truncate(),
        );
    }

    fn offset_projection_depth(&mut self, depth_offset: f64) {
        self.z_axis.z *= 1.0 + depth_offset;
    }

    fn unproject(&self, screen_point: &DVec3, viewport: &Viewport) -> Option<DVec3> {
        let sx = ((screen_point.x - viewport.x) / viewport.width) * 2.0 - 1.0;
        let sy = ((screen_point.y - viewport.y) / viewport.height) * 2.0 - 1.0;
        let sz = 2.0 * screen_point.z - 1.0;
        if !(-1.0..=1.0).contains(&sz) {
            return None;
        }

        let clip = *self * DVec4::new(sx, sy, sz, 1.0);
        if clip.w == 0.0 {
            return None;
        }
        return Some(clip.truncate() / clip.w);
    }
}

/// Builds a perspective projection for the viewport and clip distances. The
/// frustum rectangle at the near plane has a width equal to the near
/// distance, preserving a fixed horizontal field of view at any aspect.
pub fn perspective_projection(
    viewport_width: f64,
    viewport_height: f64,
    near_distance: f64,
    far_distance: f64,
) -> Result<DMat4, GeomError> {
    if viewport_width <= 0.0 {
        return Err(GeomError::InvalidWidth(viewport_width));
    }
    if viewport_height <= 0.0 {
        return Err(GeomError::InvalidHeight(viewport_height));
    }
    if near_distance == far_distance || near_distance <= 0.0 || far_distance <= 0.0 {
        return Err(GeomError::InvalidClipDistances {
            near: near_distance,
            far: far_distance,
        });
    }

    let (min_x, min_y, rect_width, rect_height) =
        perspective_frustum_rectangle(viewport_width, viewport_height, near_distance);
    let left = min_x;
    let right = min_x + rect_width;
    let bottom = min_y;
    let top = min_y + rect_height;

    let mut rows = [[0.0f64; 4]; 4];
    rows[0][0] = 2.0 * near_distance / (right - left);
    rows[0][2] = (right + left) / (right - left);
    rows[1][1] = 2.0 * near_distance / (top - bottom);
    rows[1][2] = (top + bottom) / (top - bottom);
    rows[2][2] = -(far_distance + near_distance) / (far_distance - near_distance);
    rows[2][3] = -2.0 * near_distance * far_distance / (far_distance - near_distance);
    rows[3][2] = -1.0;
    return Ok(from_rows(&rows));
}

/// Modelview placing the eye at `eye_position`, looking down the surface
/// normal with north up, rotated by roll, then tilt, then heading.
pub fn first_person_modelview(
    eye_position: &Position,
    heading: f64,
    tilt: f64,
    roll: f64,
    globe: &Globe,
) -> DMat4 {
    // The sines are inverted relative to the canonical rotation matrices to
    // rotate the eye counter-clockwise for roll and tilt, clockwise for
    // heading.
    let (s, c) = (roll * DEGREES_TO_RADIANS).sin_cos();
    let roll_rotation = from_rows(&[
        [c, s, 0.0, 0.0],
        [-s, c, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    let (s, c) = (tilt * DEGREES_TO_RADIANS).sin_cos();
    let tilt_rotation = from_rows(&[
        [1.0, 0.0, 0.0, 0.0],
        [0.0, c, s, 0.0],
        [0.0, -s, c, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    let (s, c) = (heading * DEGREES_TO_RADIANS).sin_cos();
    let heading_rotation = from_rows(&[
        [c, -s, 0.0, 0.0],
        [s, c, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    let eye_point = globe.compute_point_from_position(
        eye_position.latitude,
        eye_position.longitude,
        eye_position.altitude,
    );
    let (x_axis, y_axis, z_axis) = globe.local_coordinate_axes_at_point(&eye_point);
    let local = from_rows(&[
        [x_axis.x, x_axis.y, x_axis.z, -x_axis.dot(eye_point)],
        [y_axis.x, y_axis.y, y_axis.z, -y_axis.dot(eye_point)],
        [z_axis.x, z_axis.y, z_axis.z, -z_axis.dot(eye_point)],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    return roll_rotation * tilt_rotation * heading_rotation * local;
}

/// Modelview keeping `look_at` centered at the given range, heading, tilt
/// and roll. Errors when the range is negative.
pub fn look_at_modelview(
    look_at: &Position,
    range: f64,
    heading: f64,
    tilt: f64,
    roll: f64,
    globe: &Globe,
) -> Result<DMat4, GeomError> {
    if range < 0.0 {
        return Err(GeomError::NegativeRange(range));
    }

    let back_off = DMat4::from_translation(DVec3::new(0.0, 0.0, -range));
    return Ok(back_off * first_person_modelview(look_at, heading, tilt, roll, globe));
}

const JACOBI_MAX_SWEEPS: usize = 32;
const JACOBI_EPSILON: f64 = 1.0e-10;

/// Jacobi eigen-decomposition of a symmetric 3x3 matrix. Returns the
/// eigenvectors scaled by their eigenvalues, sorted most to least prominent.
/// `None` when the matrix is not symmetric.
pub fn eigen_decomposition_symmetric(matrix: &DMat3) -> Option<[DVec3; 3]> {
    let mut a = [
        [matrix.col(0).x, matrix.col(1).x, matrix.col(2).x],
        [matrix.col(0).y, matrix.col(1).y, matrix.col(2).y],
        [matrix.col(0).z, matrix.col(1).z, matrix.col(2).z],
    ];
    if a[0][1] != a[1][0] || a[0][2] != a[2][0] || a[1][2] != a[2][1] {
        return None;
    }

    let mut r = [
        [1.0f64, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ];

    for _ in 0..JACOBI_MAX_SWEEPS {
        let off = a[0][1] * a[0][1] + a[0][2] * a[0][2] + a[1][2] * a[1][2];
        if off < JACOBI_EPSILON {
            break;
        }

        for &(p, q) in &[(0usize, 1usize), (0, 2), (1, 2)] {
            if a[p][q].abs() < JACOBI_EPSILON {
                continue;
            }

            let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
            let t = if theta < 0.0 {
                -1.0 / (-theta + (1.0 + theta * theta).sqrt())
            } else {
                1.0 / (theta + (1.0 + theta * theta).sqrt())
            };
            let c = 1.0 / (1.0 + t * t).sqrt();
            let s = t * c;

            // Rotate a in the (p, q) plane from both sides.
            for k in 0..3 {
                let akp = a[k][p];
                let akq = a[k][q];
                a[k][p] = c * akp - s * akq;
                a[k][q] = s * akp + c * akq;
            }
            for k in 0..3 {
                let apk = a[p][k];
                let aqk = a[q][k];
                a[p][k] = c * apk - s * aqk;
                a[q][k] = s * apk + c * aqk;
            }
            for row in r.iter_mut() {
                let rkp = row[p];
                let rkq = row[q];
                row[p] = c * rkp - s * rkq;
                row[q] = s * rkp + c * rkq;
            }
        }
    }

    let mut eigenvalues = [a[0][0], a[1][1], a[2][2]];
    let mut vectors = [
        DVec3::new(r[0][0], r[1][0], r[2][0]),
        DVec3::new(r[0][1], r[1][1], r[2][1]),
        DVec3::new(r[0][2], r[1][2], r[2][2]),
    ];

    // Sort descending by eigenvalue.
    for i in 0..2 {
        for j in (i + 1)..3 {
            if eigenvalues[j] > eigenvalues[i] {
                eigenvalues.swap(i, j);
                vectors.swap(i, j);
            }
        }
    }

    return Some([
        vectors[0].normalize() * eigenvalues[0],
        vectors[1].normalize() * eigenvalues[1],
        vectors[2].normalize() * eigenvalues[2],
    ]);
}

/// Unit principal axes of a point collection from the eigensystem of its
/// covariance matrix, strongest first. `None` for an empty collection or a
/// degenerate covariance.
pub fn principal_axes_from_points(points: &[DVec3]) -> Option<(DVec3, DVec3, DVec3)> {
    if points.is_empty() {
        return None;
    }

    let count = points.len() as f64;
    let mean = points.iter().copied().sum::<DVec3>() / count;

    let mut c = [[0.0f64; 3]; 3];
    for p in points {
        let d = *p - mean;
        c[0][0] += d.x * d.x;
        c[0][1] += d.x * d.y;
        c[0][2] += d.x * d.z;
        c[1][1] += d.y * d.y;
        c[1][2] += d.y * d.z;
        c[2][2] += d.z * d.z;
    }
    let covariance = DMat3::from_cols(
        DVec3::new(c[0][0], c[0][1], c[0][2]) / count,
        DVec3::new(c[0][1], c[1][1], c[1][2]) / count,
        DVec3::new(c[0][2], c[1][2], c[2][2]) / count,
    );

    let scaled = eigen_decomposition_symmetric(&covariance)?;
    let r = scaled[0].try_normalize()?;
    let s = scaled[1].try_normalize()?;
    let t = scaled[2].try_normalize()?;
    return Some((r, s, t));
}

fn to_rows(m: &DMat4) -> [[f64; 4]; 4] {
    let mut rows = [[0.0f64; 4]; 4];
    for (j, col) in [m.x_axis, m.y_axis, m.z_axis, m.w_axis].iter().enumerate() {
        rows[0][j] = col.x;
        rows[1][j] = col.y;
        rows[2][j] = col.z;
        rows[3][j] = col.w;
    }
    return rows;
}

fn from_rows(rows: &[[f64; 4]; 4]) -> DMat4 {
    return DMat4::from_cols(
        DVec4::new(rows[0][0], rows[1][0], rows[2][0], rows[3][0]),
        DVec4::new(rows[0][1], rows[1][1], rows[2][1], rows[3][1]),
        DVec4::new(rows[0][2], rows[1][2], rows[2][2], rows[3][2]),
        DVec4::new(rows[0][3], rows[1][3], rows[2][3], rows[3][3]),
    );
}

/// LU decomposition with scaled partial pivoting. Returns the row-exchange
/// parity, or 0.0 when a row of zeros makes the matrix singular.
fn ludcmp(a: &mut [[f64; 4]; 4], index: &mut [usize; 4]) -> f64 {
    let mut d = 1.0f64;
    let mut vv = [0.0f64; 4];

    for (i, row) in a.iter().enumerate() {
        let mut big = 0.0f64;
        for value in row.iter() {
            let temp = value.abs();
            if temp > big {
                big = temp;
            }
        }
        if big == 0.0 {
            return 0.0;
        }
        vv[i] = 1.0 / big;
    }

    for j in 0..4 {
        for i in 0..j {
            let mut sum = a[i][j];
            for k in 0..i {
                sum -= a[i][k] * a[k][j];
            }
            a[i][j] = sum;
        }

        let mut big = 0.0f64;
        let mut imax = j;
        for i in j..4 {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= a[i][k] * a[k][j];
            }
            a[i][j] = sum;

            let dum = vv[i] * sum.abs();
            if dum >= big {
                big = dum;
                imax = i;
            }
        }

        if j != imax {
            a.swap(imax, j);
            d = -d;
            vv[imax] = vv[j];
        }

        index[j] = imax;
        if a[j][j] == 0.0 {
            a[j][j] = LU_TINY;
        }

        if j != 3 {
            let dum = 1.0 / a[j][j];
            for i in (j + 1)..4 {
                a[i][j] *= dum;
            }
        }
    }

    return d;
}

/// Back substitution for a right-hand side against a ludcmp factorization.
fn lubksb(a: &[[f64; 4]; 4], index: &[usize; 4], b: &mut [f64; 4]) {
    let mut ii: isize = -1;
    for i in 0..4 {
        let ip = index[i];
        let mut sum = b[ip];
        b[ip] = b[i];
        if ii >= 0 {
            for j in (ii as usize)..i {
                sum -= a[i][j] * b[j];
            }
        } else if sum != 0.0 {
            ii = i as isize;
        }
        b[i] = sum;
    }

    for i in (0..4).rev() {
        let mut sum = b[i];
        for j in (i + 1)..4 {
            sum -= a[i][j] * b[j];
        }
        b[i] = sum / a[i][i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{equals_epsilon, EPSILON9};
    use crate::{Globe, ZeroElevationModel};
    use rand::{Rng, SeedableRng};

    fn random_affine(rng: &mut impl Rng) -> DMat4 {
        loop {
            let rotation = DMat4::from_rotation_x(rng.gen_range(-3.0..3.0))
                * DMat4::from_rotation_y(rng.gen_range(-3.0..3.0))
                * DMat4::from_rotation_z(rng.gen_range(-3.0..3.0));
            let scale = DMat4::from_scale(DVec3::new(
                rng.gen_range(0.5..4.0),
                rng.gen_range(0.5..4.0),
                rng.gen_range(0.5..4.0),
            ));
            let translation = DMat4::from_translation(DVec3::new(
                rng.gen_range(-100.0..100.0),
                rng.gen_range(-100.0..100.0),
                rng.gen_range(-100.0..100.0),
            ));
            let m = translation * rotation * scale;
            if m.determinant().abs() > 1e-6 {
                return m;
            }
        }
    }

    #[test]
    fn general_inverse_round_trip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let m = random_affine(&mut rng);
            let inverse = m.try_invert_general().unwrap();
            let product = m * inverse;
            assert!(product.abs_diff_eq(DMat4::IDENTITY, EPSILON9));
        }
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let mut m = DMat4::IDENTITY;
        m.z_axis = m.x_axis; // two identical columns
        assert!(m.try_invert_general().is_none());
        assert!(DMat4::ZERO.try_invert_general().is_none());
    }

    #[test]
    fn orthonormal_inverse_matches_general_inverse() {
        let m = DMat4::from_rotation_y(0.7)
            * DMat4::from_rotation_x(-0.3)
            * DMat4::from_translation(DVec3::new(10.0, -4.0, 2.5));
        // from_translation multiplies on the left here so the combined
        // matrix is rigid with a rotated translation; both inverses agree.
        let general = m.try_invert_general().unwrap();
        let fast = m.inverse_transformation();
        assert!(general.abs_diff_eq(fast, EPSILON9));
    }

    #[test]
    fn perspective_projection_validates_arguments() {
        assert!(perspective_projection(0.0, 100.0, 1.0, 10.0).is_err());
        assert!(perspective_projection(100.0, -5.0, 1.0, 10.0).is_err());
        assert!(perspective_projection(100.0, 100.0, 5.0, 5.0).is_err());
        assert!(perspective_projection(100.0, 100.0, -1.0, 10.0).is_err());
        assert!(perspective_projection(100.0, 100.0, 1.0, 10.0).is_ok());
    }

    #[test]
    fn unproject_rejects_out_of_range_depth() {
        let projection = perspective_projection(800.0, 600.0, 1.0, 1000.0).unwrap();
        let inverse = projection.try_invert_general().unwrap();
        let viewport = Viewport::new(0.0, 0.0, 800.0, 600.0);
        assert!(inverse
            .unproject(&DVec3::new(400.0, 300.0, 1.5), &viewport)
            .is_none());
        assert!(inverse
            .unproject(&DVec3::new(400.0, 300.0, 0.5), &viewport)
            .is_some());
    }

    #[test]
    fn eigen_decomposition_of_known_matrix() {
        // Symmetric matrix with eigenvalues 6, 3, 1.
        let m = DMat3::from_cols(
            DVec3::new(4.0, -1.0, 1.0),
            DVec3::new(-1.0, 3.0, -2.0),
            DVec3::new(1.0, -2.0, 3.0),
        );
        let axes = eigen_decomposition_symmetric(&m).unwrap();
        let mut lengths: Vec<f64> = axes.iter().map(|v| v.length()).collect();
        lengths.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert!(equals_epsilon(lengths[0], 6.0, None, Some(1e-8)));
        assert!(equals_epsilon(lengths[1], 3.0, None, Some(1e-8)));
        assert!(equals_epsilon(lengths[2], 1.0, None, Some(1e-8)));
        // Sorted most prominent first.
        assert!(axes[0].length() >= axes[1].length());
        assert!(axes[1].length() >= axes[2].length());
    }

    #[test]
    fn eigen_decomposition_rejects_asymmetric_input() {
        let m = DMat3::from_cols(
            DVec3::new(1.0, 2.0, 3.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(0.0, 0.0, 1.0),
        );
        assert!(eigen_decomposition_symmetric(&m).is_none());
    }

    #[test]
    fn look_at_modelview_rejects_negative_range() {
        let globe = Globe::new(Box::new(ZeroElevationModel::default()));
        let look_at = Position::new(0.0, 0.0, 0.0);
        assert!(look_at_modelview(&look_at, -1.0, 0.0, 0.0, 0.0, &globe).is_err());
    }

    #[test]
    fn look_at_modelview_eye_point_is_range_above_surface() {
        let globe = Globe::new(Box::new(ZeroElevationModel::default()));
        let look_at = Position::new(0.0, 0.0, 0.0);
        let range = 1.0e7;
        let modelview = look_at_modelview(&look_at, range, 0.0, 0.0, 0.0, &globe).unwrap();
        let eye = modelview.extract_eye_point();
        let surface = globe.compute_point_from_position(0.0, 0.0, 0.0);
        assert!(equals_epsilon(
            (eye - surface).length(),
            range,
            None,
            Some(1e-3)
        ));
    }
}
