use bevy::math::DVec3;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::math::DEGREES_TO_RADIANS;
use crate::{
    BoundingBox, ElevationModel, Frustum, GeographicProjection, GeomError, Line, Position,
    ProjectionWgs84, Sector,
};

/// WGS84 semi-major axis, meters.
pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6378137.0;
/// WGS84 inverse flattening.
pub const WGS84_INVERSE_FLATTENING: f64 = 298.257223563;

static GLOBE_ID_POOL: AtomicU64 = AtomicU64::new(0);

/// An ellipsoidal globe: radii, an elevation model and a geographic
/// projection. The default configuration is Earth under WGS84.
pub struct Globe {
    pub elevation_model: Box<dyn ElevationModel>,
    pub equatorial_radius: f64,
    pub polar_radius: f64,
    pub eccentricity_squared: f64,
    projection: Box<dyn GeographicProjection>,
    offset: f64,
    offset_vector: DVec3,
    id: u64,
}

impl Globe {
    pub fn new(elevation_model: Box<dyn ElevationModel>) -> Self {
        return Self::with_projection(elevation_model, Box::new(ProjectionWgs84::default()));
    }

    pub fn with_projection(
        elevation_model: Box<dyn ElevationModel>,
        projection: Box<dyn GeographicProjection>,
    ) -> Self {
        let f = 1.0 / WGS84_INVERSE_FLATTENING;
        Self {
            elevation_model,
            equatorial_radius: WGS84_SEMI_MAJOR_AXIS,
            polar_radius: WGS84_SEMI_MAJOR_AXIS * (1.0 - f),
            eccentricity_squared: 2.0 * f - f * f,
            projection,
            offset: 0.0,
            offset_vector: DVec3::ZERO,
            id: GLOBE_ID_POOL.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    /// Identifies this globe's current state; cached values keyed by this
    /// string are invalidated when it changes.
    pub fn state_key(&self) -> String {
        return format!(
            "globe {} {}offset {} {}",
            self.id,
            self.elevation_model.state_key(),
            self.offset,
            self.projection.state_key()
        );
    }

    pub fn projection(&self) -> &dyn GeographicProjection {
        return self.projection.as_ref();
    }

    pub fn is_2d(&self) -> bool {
        return self.projection.is_2d();
    }

    /// 2D globes that scroll continuously in longitude.
    pub fn is_continuous(&self) -> bool {
        return self.projection.is_continuous();
    }

    pub fn projection_limits(&self) -> Option<Sector> {
        return self.projection.projection_limits();
    }

    /// Whole-world copies to the side of the center copy are positioned by
    /// this offset during continuous 2D scrolling.
    pub fn offset(&self) -> f64 {
        return self.offset;
    }

    pub fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
        self.offset_vector.x = offset * 2.0 * PI * self.equatorial_radius;
    }

    pub fn offset_vector(&self) -> DVec3 {
        return self.offset_vector;
    }

    pub fn compute_point_from_position(&self, latitude: f64, longitude: f64, altitude: f64) -> DVec3 {
        return self.projection.geographic_to_cartesian(
            self,
            latitude,
            longitude,
            altitude,
            &self.offset_vector,
        );
    }

    pub fn compute_point_from_location(&self, latitude: f64, longitude: f64) -> DVec3 {
        return self.compute_point_from_position(latitude, longitude, 0.0);
    }

    /// Fills `result` with a grid of points relative to `reference_point`,
    /// row-major from the minimum latitude, one elevation per point.
    pub fn compute_points_for_grid(
        &self,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        elevations: &[f64],
        reference_point: &DVec3,
        result: &mut [DVec3],
    ) -> Result<(), GeomError> {
        if num_lat < 1 || num_lon < 1 {
            return Err(GeomError::InvalidGridSize { num_lat, num_lon });
        }

        let num_points = num_lat * num_lon;
        if elevations.len() < num_points {
            return Err(GeomError::ArrayTooShort {
                need: num_points,
                got: elevations.len(),
            });
        }
        if result.len() < num_points {
            return Err(GeomError::ArrayTooShort {
                need: num_points,
                got: result.len(),
            });
        }

        self.projection.geographic_to_cartesian_grid(
            self,
            sector,
            num_lat,
            num_lon,
            elevations,
            reference_point,
            &self.offset_vector,
            result,
        );
        return Ok(());
    }

    pub fn compute_position_from_point(&self, x: f64, y: f64, z: f64) -> Position {
        let mut result =
            self.projection
                .cartesian_to_geographic(self, x, y, z, &self.offset_vector);

        // Wrap if the globe is continuous.
        if self.is_continuous() {
            if result.longitude < -180.0 {
                result.longitude += 360.0;
            } else if result.longitude > 180.0 {
                result.longitude -= 360.0;
            }
        }

        return result;
    }

    /// The geocentric radius at a location.
    pub fn radius_at(&self, latitude: f64, _longitude: f64) -> f64 {
        let sin_lat = (latitude * DEGREES_TO_RADIANS).sin();
        let e2 = self.eccentricity_squared;
        let rpm = self.equatorial_radius / (1.0 - e2 * sin_lat * sin_lat).sqrt();

        return rpm * (1.0 + (e2 * e2 - 2.0 * e2) * sin_lat * sin_lat).sqrt();
    }

    pub fn surface_normal_at_location(&self, latitude: f64, longitude: f64) -> DVec3 {
        return self.projection.surface_normal_at_location(latitude, longitude);
    }

    pub fn surface_normal_at_point(&self, point: &DVec3) -> DVec3 {
        return self
            .projection
            .surface_normal_at_point(self, point.x, point.y, point.z);
    }

    pub fn north_tangent_at_location(&self, latitude: f64, longitude: f64) -> DVec3 {
        return self.projection.north_tangent_at_location(latitude, longitude);
    }

    pub fn north_tangent_at_point(&self, point: &DVec3) -> DVec3 {
        return self.projection.north_tangent_at_point(
            self,
            point.x,
            point.y,
            point.z,
            &self.offset_vector,
        );
    }

    /// The local Cartesian frame at a point: x east, y north, z up.
    pub fn local_coordinate_axes_at_point(&self, point: &DVec3) -> (DVec3, DVec3, DVec3) {
        let z_axis = self.surface_normal_at_point(point);
        let north = self.north_tangent_at_point(point);
        let x_axis = north.cross(z_axis).normalize();
        let y_axis = z_axis.cross(x_axis).normalize();
        return (x_axis, y_axis, z_axis);
    }

    /// A cheap whole-globe visibility test: every frustum plane must reach
    /// past the equatorial radius. 2D globes fall back to a full-sphere box.
    pub fn intersects_frustum(&self, frustum: &Frustum) -> bool {
        if self.is_2d() {
            let mut bbox = BoundingBox::new();
            bbox.set_to_sector(
                &Sector::FULL_SPHERE,
                self,
                self.elevation_model.min_elevation(),
                self.elevation_model.max_elevation(),
            );
            return bbox.intersects_frustum(frustum);
        }

        for plane in frustum.planes() {
            if plane.distance <= self.equatorial_radius {
                return false;
            }
        }
        return true;
    }

    /// The first ray-ellipsoid intersection in front of the ray origin, or
    /// `None`. 2D globes intersect the Z = 0 plane instead.
    pub fn intersects_line(&self, line: &Line) -> Option<DVec3> {
        let v = line.direction;
        let s = line.origin;

        if self.is_2d() {
            if v.z == 0.0 && s.z != 0.0 {
                return None; // parallel to and not coincident with the plane
            }

            let t = -s.z / v.z;
            if t < 0.0 {
                return None;
            }
            return Some(line.point_at(t));
        }

        // Ellipsoid scaled to a sphere of the equatorial radius by the
        // oblateness ratio along the polar axis.
        let eqr = self.equatorial_radius;
        let m = eqr / self.polar_radius;
        let m2 = m * m;

        let a = v.x * v.x + m2 * v.y * v.y + v.z * v.z;
        let b = 2.0 * (s.x * v.x + m2 * s.y * v.y + s.z * v.z);
        let c = s.x * s.x + m2 * s.y * s.y + s.z * s.z - eqr * eqr;
        let d = b * b - 4.0 * a * c;

        if d < 0.0 {
            return None;
        }

        let t = (-b - d.sqrt()) / (2.0 * a);
        if t > 0.0 {
            return Some(line.point_at(t));
        }

        let t = (-b + d.sqrt()) / (2.0 * a);
        if t > 0.0 {
            return Some(line.point_at(t));
        }

        return None;
    }

    pub fn elevation_timestamp(&self) -> u64 {
        return self.elevation_model.timestamp();
    }

    pub fn min_elevation(&self) -> f64 {
        return self.elevation_model.min_elevation();
    }

    pub fn max_elevation(&self) -> f64 {
        return self.elevation_model.max_elevation();
    }

    pub fn min_and_max_elevations_for_sector(&self, sector: &Sector) -> (f64, f64) {
        return self.elevation_model.min_and_max_elevations_for_sector(sector);
    }

    pub fn elevation_at_location(&self, latitude: f64, longitude: f64) -> f64 {
        return self.elevation_model.elevation_at_location(latitude, longitude);
    }

    /// Fills `result` with elevations over the sector; returns the achieved
    /// resolution in degrees.
    pub fn elevations_for_grid(
        &self,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        target_resolution: f64,
        result: &mut [f64],
    ) -> Result<f64, GeomError> {
        if num_lat < 1 || num_lon < 1 {
            return Err(GeomError::InvalidGridSize { num_lat, num_lon });
        }
        if result.len() < num_lat * num_lon {
            return Err(GeomError::ArrayTooShort {
                need: num_lat * num_lon,
                got: result.len(),
            });
        }

        return Ok(self.elevation_model.elevations_for_grid(
            sector,
            num_lat,
            num_lon,
            target_resolution,
            result,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::equals_epsilon;
    use crate::ZeroElevationModel;

    fn globe() -> Globe {
        return Globe::new(Box::new(ZeroElevationModel::default()));
    }

    #[test]
    fn wgs84_constants() {
        let g = globe();
        assert_eq!(g.equatorial_radius, 6378137.0);
        assert!(equals_epsilon(g.polar_radius, 6356752.3142, None, Some(1e-4)));
        assert!(equals_epsilon(
            g.eccentricity_squared,
            6.694379990141e-3,
            None,
            Some(1e-12)
        ));
    }

    #[test]
    fn point_position_round_trip() {
        let g = globe();
        let point = g.compute_point_from_position(35.0, -120.0, 5000.0);
        let position = g.compute_position_from_point(point.x, point.y, point.z);
        assert!(equals_epsilon(position.latitude, 35.0, None, Some(1e-9)));
        assert!(equals_epsilon(position.longitude, -120.0, None, Some(1e-9)));
        assert!(equals_epsilon(position.altitude, 5000.0, None, Some(1e-6)));
    }

    #[test]
    fn ray_from_space_hits_the_nearest_surface() {
        let g = globe();
        // Ray from 3 earth radii out on the +Z axis, aimed at the center.
        let origin = DVec3::new(0.0, 0.0, 3.0 * g.equatorial_radius);
        let line = Line::new(origin, DVec3::new(0.0, 0.0, -1.0));
        let hit = g.intersects_line(&line).unwrap();
        assert!(equals_epsilon(hit.z, g.equatorial_radius, None, Some(1e-6)));

        // Aimed away, no intersection.
        let miss = Line::new(origin, DVec3::new(0.0, 0.0, 1.0));
        assert!(g.intersects_line(&miss).is_none());
    }

    #[test]
    fn ray_origin_inside_hits_the_far_side() {
        let g = globe();
        let line = Line::new(DVec3::ZERO, DVec3::new(0.0, 0.0, 1.0));
        let hit = g.intersects_line(&line).unwrap();
        assert!(equals_epsilon(hit.z, g.equatorial_radius, None, Some(1e-6)));
    }

    #[test]
    fn state_key_tracks_offset() {
        let mut g = globe();
        let before = g.state_key();
        g.set_offset(1.0);
        assert_ne!(before, g.state_key());
        assert!(g.offset_vector().x > 0.0);
    }
}
