use bevy::math::DVec3;

use crate::math::principal_axes_from_points;
use crate::{Frustum, GeomError, Globe, Plane, Sector};

/// An oriented bounding box: a center, three mutually orthogonal axis
/// vectors and a radius.
///
/// The axes are stored at full extent length, sorted so `r` is the longest
/// and `t` the shortest; the frustum intersection shortcut below relies on
/// that ordering. `bottom_center` and `top_center` are the ends of the `r`
/// axis through the center.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub center: DVec3,
    pub bottom_center: DVec3,
    pub top_center: DVec3,
    pub r: DVec3,
    pub s: DVec3,
    pub t: DVec3,
    pub radius: f64,
}

impl Default for BoundingBox {
    /// A unit box centered at the origin, axes along X, Y and Z.
    fn default() -> Self {
        Self {
            center: DVec3::ZERO,
            bottom_center: DVec3::new(-0.5, 0.0, 0.0),
            top_center: DVec3::new(0.5, 0.0, 0.0),
            r: DVec3::X,
            s: DVec3::Y,
            t: DVec3::Z,
            radius: 3.0f64.sqrt(),
        }
    }
}

impl BoundingBox {
    pub fn new() -> Self {
        return Self::default();
    }

    /// Fits this box to a point collection using its principal axes.
    pub fn set_to_points(&mut self, points: &[DVec3]) -> Result<(), GeomError> {
        if points.is_empty() {
            return Err(GeomError::EmptyPointList);
        }

        let (r, s, t) = principal_axes_from_points(points).unwrap_or((DVec3::X, DVec3::Y, DVec3::Z));

        let mut r_min = f64::MAX;
        let mut r_max = f64::MIN;
        let mut s_min = f64::MAX;
        let mut s_max = f64::MIN;
        let mut t_min = f64::MAX;
        let mut t_max = f64::MIN;

        for p in points {
            let pdr = p.dot(r);
            r_min = r_min.min(pdr);
            r_max = r_max.max(pdr);

            let pds = p.dot(s);
            s_min = s_min.min(pds);
            s_max = s_max.max(pds);

            let pdt = p.dot(t);
            t_min = t_min.min(pdt);
            t_max = t_max.max(pdt);
        }

        if r_max == r_min {
            r_max = r_min + 1.0;
        }
        if s_max == s_min {
            s_max = s_min + 1.0;
        }
        if t_max == t_min {
            t_max = t_min + 1.0;
        }

        self.assign(r, s, t, [r_min, r_max], [s_min, s_max], [t_min, t_max]);
        return Ok(());
    }

    /// Fits this box to a geographic sector at the given elevation range.
    ///
    /// A 3x3 grid bounds the sector closely enough: corners at the minimum
    /// elevation, everything else at the maximum. The local coordinate axes
    /// at the grid center serve as the box axes; the result runs about +-10%
    /// of the volume a principal-component fit would give, far cheaper.
    pub fn set_to_sector(
        &mut self,
        sector: &Sector,
        globe: &Globe,
        min_elevation: f64,
        max_elevation: f64,
    ) {
        let mut elevations = [max_elevation; 9];
        elevations[0] = min_elevation;
        elevations[2] = min_elevation;
        elevations[6] = min_elevation;
        elevations[8] = min_elevation;

        let mut points = [DVec3::ZERO; 9];
        // 3x3 is always a valid grid and the arrays are sized exactly.
        let _ = globe.compute_points_for_grid(sector, 3, 3, &elevations, &DVec3::ZERO, &mut points);

        let (mut r, mut s, mut t) = globe.local_coordinate_axes_at_point(&points[4]);

        let mut r_extremes = [f64::INFINITY, f64::NEG_INFINITY];
        let mut s_extremes = [f64::INFINITY, f64::NEG_INFINITY];
        let mut t_extremes = [f64::INFINITY, f64::NEG_INFINITY];

        for p in &points {
            adjust_extremes(&r, &mut r_extremes, &s, &mut s_extremes, &t, &mut t_extremes, p);
        }

        // Past a hemisphere the 3x3 grid under-fits; the antipodal points on
        // the centroid parallel are the true longitude extremes.
        if sector.delta_longitude() > 180.0 {
            let east = globe.compute_point_from_position(
                sector.centroid_latitude(),
                sector.centroid_longitude() + 90.0,
                max_elevation,
            );
            let west = globe.compute_point_from_position(
                sector.centroid_latitude(),
                sector.centroid_longitude() - 90.0,
                max_elevation,
            );
            adjust_extremes(&r, &mut r_extremes, &s, &mut s_extremes, &t, &mut t_extremes, &east);
            adjust_extremes(&r, &mut r_extremes, &s, &mut s_extremes, &t, &mut t_extremes, &west);
        }

        // Sort the axes from most to least prominent.
        if r_extremes[1] - r_extremes[0] < s_extremes[1] - s_extremes[0] {
            std::mem::swap(&mut r, &mut s);
            std::mem::swap(&mut r_extremes, &mut s_extremes);
        }
        if s_extremes[1] - s_extremes[0] < t_extremes[1] - t_extremes[0] {
            std::mem::swap(&mut s, &mut t);
            std::mem::swap(&mut s_extremes, &mut t_extremes);
        }
        if r_extremes[1] - r_extremes[0] < s_extremes[1] - s_extremes[0] {
            std::mem::swap(&mut r, &mut s);
            std::mem::swap(&mut r_extremes, &mut s_extremes);
        }

        self.assign(r, s, t, r_extremes, s_extremes, t_extremes);
    }

    fn assign(
        &mut self,
        r: DVec3,
        s: DVec3,
        t: DVec3,
        r_extremes: [f64; 2],
        s_extremes: [f64; 2],
        t_extremes: [f64; 2],
    ) {
        let r_len = r_extremes[1] - r_extremes[0];
        let s_len = s_extremes[1] - s_extremes[0];
        let t_len = t_extremes[1] - t_extremes[0];
        let r_sum = r_extremes[1] + r_extremes[0];
        let s_sum = s_extremes[1] + s_extremes[0];
        let t_sum = t_extremes[1] + t_extremes[0];

        let center = 0.5 * (r * r_sum + s * s_sum + t * t_sum);
        let r_half = 0.5 * r * r_len;

        self.center = center;
        self.top_center = center + r_half;
        self.bottom_center = center - r_half;
        self.r = r * r_len;
        self.s = s * s_len;
        self.t = t * t_len;
        self.radius = 0.5 * (r_len * r_len + s_len * s_len + t_len * t_len).sqrt();
    }

    pub fn translate(&mut self, translation: &DVec3) {
        self.bottom_center += *translation;
        self.top_center += *translation;
        self.center += *translation;
    }

    /// Distance to a point, treating the box as a sphere of its radius.
    pub fn distance_to(&self, point: &DVec3) -> f64 {
        return (self.center.distance(*point) - self.radius).abs();
    }

    /// The box's extent projected onto a plane normal.
    pub fn effective_radius(&self, plane: &Plane) -> f64 {
        let n = plane.normal;
        return 0.5 * (self.r.dot(n).abs() + self.s.dot(n).abs() + self.t.dot(n).abs());
    }

    /// Treats the box as the segment between its bottom and top centers,
    /// thickened by the two minor axes, and clips it against each plane.
    /// Exits on the first plane that fully separates the box.
    pub fn intersects_frustum(&self, frustum: &Frustum) -> bool {
        let mut end1 = self.bottom_center;
        let mut end2 = self.top_center;

        for plane in [
            &frustum.near,
            &frustum.far,
            &frustum.left,
            &frustum.right,
            &frustum.top,
            &frustum.bottom,
        ] {
            if self.intersection_point(plane, &mut end1, &mut end2) < 0.0 {
                return false;
            }
        }
        return true;
    }

    fn intersection_point(&self, plane: &Plane, end1: &mut DVec3, end2: &mut DVec3) -> f64 {
        let n = plane.normal;
        let effective_radius = 0.5 * (self.s.dot(n).abs() + self.t.dot(n).abs());
        return intersects_at(plane, effective_radius, end1, end2);
    }
}

fn adjust_extremes(
    r: &DVec3,
    r_extremes: &mut [f64; 2],
    s: &DVec3,
    s_extremes: &mut [f64; 2],
    t: &DVec3,
    t_extremes: &mut [f64; 2],
    p: &DVec3,
) {
    let pdr = p.dot(*r);
    r_extremes[0] = r_extremes[0].min(pdr);
    r_extremes[1] = r_extremes[1].max(pdr);

    let pds = p.dot(*s);
    s_extremes[0] = s_extremes[0].min(pds);
    s_extremes[1] = s_extremes[1].max(pds);

    let pdt = p.dot(*t);
    t_extremes[0] = t_extremes[0].min(pdt);
    t_extremes[1] = t_extremes[1].max(pdt);
}

/// Clips the segment to the positive halfspace of the plane, expanded by
/// the effective radius. Returns -1 when the whole segment is beyond the
/// radius on the negative side, 0 when no conclusion can be drawn.
fn intersects_at(plane: &Plane, eff_radius: f64, end1: &mut DVec3, end2: &mut DVec3) -> f64 {
    let dq1 = plane.dot(end1);
    let bq1 = dq1 <= -eff_radius;

    let dq2 = plane.dot(end2);
    let bq2 = dq2 <= -eff_radius;

    if bq1 && bq2 {
        return -1.0;
    }

    if bq1 == bq2 {
        return 0.0;
    }

    let t = (eff_radius + dq1) / plane.normal.dot(*end1 - *end2);
    let clipped = *end1 + (*end2 - *end1) * t;

    if bq1 {
        *end1 = clipped;
    } else {
        *end2 = clipped;
    }

    return t;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::perspective_projection;
    use crate::ZeroElevationModel;
    use bevy::math::DMat4;
    use crate::math::Matrix4Ext;

    fn globe() -> Globe {
        return Globe::new(Box::new(ZeroElevationModel::default()));
    }

    #[test]
    fn sector_box_contains_its_sample_grid() {
        let g = globe();
        let sector = Sector::new(10.0, 20.0, 30.0, 50.0);
        let mut bbox = BoundingBox::new();
        bbox.set_to_sector(&sector, &g, 0.0, 0.0);

        let elevations = [0.0f64; 9];
        let mut points = [DVec3::ZERO; 9];
        g.compute_points_for_grid(&sector, 3, 3, &elevations, &DVec3::ZERO, &mut points)
            .unwrap();

        for p in &points {
            let distance = bbox.center.distance(*p);
            assert!(
                distance <= bbox.radius * (1.0 + 1e-9),
                "point {p:?} at distance {distance} outside radius {}",
                bbox.radius
            );
        }
    }

    #[test]
    fn axes_are_ordered_by_decreasing_extent() {
        let g = globe();
        let mut bbox = BoundingBox::new();
        bbox.set_to_sector(&Sector::new(-5.0, 5.0, -40.0, 40.0), &g, 0.0, 0.0);

        assert!(bbox.r.length() >= bbox.s.length());
        assert!(bbox.s.length() >= bbox.t.length());
    }

    #[test]
    fn points_box_encloses_the_points() {
        let points = vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(10.0, 1.0, 0.5),
            DVec3::new(5.0, -2.0, 1.0),
            DVec3::new(-3.0, 0.5, -0.5),
        ];
        let mut bbox = BoundingBox::new();
        bbox.set_to_points(&points).unwrap();

        for p in &points {
            assert!(bbox.center.distance(*p) <= bbox.radius * (1.0 + 1e-9));
        }

        assert!(BoundingBox::new().set_to_points(&[]).is_err());
    }

    #[test]
    fn box_behind_the_eye_misses_the_frustum() {
        let projection = perspective_projection(800.0, 600.0, 1.0, 1000.0).unwrap();
        let frustum = Frustum::from_projection_matrix(&projection);

        let mut in_front = BoundingBox::new();
        in_front.translate(&DVec3::new(0.0, 0.0, -100.0));
        assert!(in_front.intersects_frustum(&frustum));

        let mut behind = BoundingBox::new();
        behind.translate(&DVec3::new(0.0, 0.0, 100.0));
        assert!(!behind.intersects_frustum(&frustum));
    }

    #[test]
    fn translated_box_follows_the_frustum() {
        let projection = perspective_projection(800.0, 600.0, 1.0, 1000.0).unwrap();
        let modelview = DMat4::from_translation(DVec3::new(0.0, 0.0, -500.0));
        // Planes move into model coordinates via the modelview transpose.
        let frustum = Frustum::from_projection_matrix(&projection)
            .transform_by_matrix(&modelview.transpose())
            .normalize();

        let mut at_origin = BoundingBox::new();
        assert!(at_origin.intersects_frustum(&frustum));
        at_origin.translate(&DVec3::new(0.0, 0.0, 5000.0));
        assert!(!at_origin.intersects_frustum(&frustum));

        // The modelview is rigid, so its orthonormal inverse agrees.
        let inverse = modelview.inverse_transformation();
        assert!(inverse.abs_diff_eq(modelview.try_invert_general().unwrap(), 1e-9));
    }
}
