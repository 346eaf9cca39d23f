use bevy::math::DVec3;
use std::f64::consts::{PI, SQRT_2};

use crate::math::{cbrt, DEGREES_TO_RADIANS, RADIANS_TO_DEGREES};
use crate::{Globe, Position, Sector};

/// Maps geographic coordinates to and from Cartesian model coordinates.
///
/// The model coordinate system has its origin at the globe's center, the Y
/// axis through the north pole, the Z axis through the intersection of the
/// prime meridian and the equator, and the X axis 90 degrees east of Z in
/// the equatorial plane.
pub trait GeographicProjection: Send + Sync {
    fn display_name(&self) -> &str;

    fn is_2d(&self) -> bool;

    /// 2D projections that scroll continuously in longitude.
    fn is_continuous(&self) -> bool {
        return false;
    }

    /// The geographic region this projection can represent, `None` for the
    /// whole sphere.
    fn projection_limits(&self) -> Option<Sector> {
        return None;
    }

    /// Identifies this projection's state for cache invalidation.
    fn state_key(&self) -> String;

    fn geographic_to_cartesian(
        &self,
        globe: &Globe,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        offset: &DVec3,
    ) -> DVec3;

    /// Batch evaluation over a sector, row-major from minimum latitude, with
    /// per-point elevations. Results are relative to `reference_point`. The
    /// slices must hold at least `num_lat * num_lon` entries; the globe
    /// validates that before delegating here.
    fn geographic_to_cartesian_grid(
        &self,
        globe: &Globe,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        elevations: &[f64],
        reference_point: &DVec3,
        offset: &DVec3,
        result: &mut [DVec3],
    );

    fn cartesian_to_geographic(&self, globe: &Globe, x: f64, y: f64, z: f64, offset: &DVec3)
        -> Position;

    fn surface_normal_at_location(&self, latitude: f64, longitude: f64) -> DVec3;

    fn surface_normal_at_point(&self, globe: &Globe, x: f64, y: f64, z: f64) -> DVec3;

    fn north_tangent_at_location(&self, latitude: f64, longitude: f64) -> DVec3;

    fn north_tangent_at_point(
        &self,
        globe: &Globe,
        x: f64,
        y: f64,
        z: f64,
        offset: &DVec3,
    ) -> DVec3;
}

/// The WGS84 ellipsoid, no map projection applied.
#[derive(Debug, Default)]
pub struct ProjectionWgs84;

impl GeographicProjection for ProjectionWgs84 {
    fn display_name(&self) -> &str {
        return "WGS84";
    }

    fn is_2d(&self) -> bool {
        return false;
    }

    fn state_key(&self) -> String {
        return String::from("projection wgs84 ");
    }

    fn geographic_to_cartesian(
        &self,
        globe: &Globe,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        _offset: &DVec3,
    ) -> DVec3 {
        let (sin_lat, cos_lat) = (latitude * DEGREES_TO_RADIANS).sin_cos();
        let (sin_lon, cos_lon) = (longitude * DEGREES_TO_RADIANS).sin_cos();
        // Radius of curvature in the prime vertical.
        let rpm = globe.equatorial_radius
            / (1.0 - globe.eccentricity_squared * sin_lat * sin_lat).sqrt();

        return DVec3::new(
            (rpm + altitude) * cos_lat * sin_lon,
            (rpm * (1.0 - globe.eccentricity_squared) + altitude) * sin_lat,
            (rpm + altitude) * cos_lat * cos_lon,
        );
    }

    fn geographic_to_cartesian_grid(
        &self,
        globe: &Globe,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        elevations: &[f64],
        reference_point: &DVec3,
        _offset: &DVec3,
        result: &mut [DVec3],
    ) {
        let min_lat = sector.min_latitude_radians();
        let max_lat = sector.max_latitude_radians();
        let min_lon = sector.min_longitude_radians();
        let max_lon = sector.max_longitude_radians();
        let delta_lat = (max_lat - min_lat) / if num_lat > 1 { (num_lat - 1) as f64 } else { 1.0 };
        let delta_lon = (max_lon - min_lon) / if num_lon > 1 { (num_lon - 1) as f64 } else { 1.0 };
        let e2 = globe.eccentricity_squared;

        // Longitude trig is constant down each column; compute it once.
        let mut cos_lon = vec![0.0f64; num_lon];
        let mut sin_lon = vec![0.0f64; num_lon];
        let mut lon = min_lon;
        for i in 0..num_lon {
            if i == num_lon - 1 {
                lon = max_lon; // pin the last column to the sector edge
            }
            let (s, c) = lon.sin_cos();
            sin_lon[i] = s;
            cos_lon[i] = c;
            lon += delta_lon;
        }

        let mut elev_index = 0;
        let mut result_index = 0;
        let mut lat = min_lat;
        for j in 0..num_lat {
            if j == num_lat - 1 {
                lat = max_lat;
            }

            let (sin_lat, cos_lat) = lat.sin_cos();
            let rpm = globe.equatorial_radius / (1.0 - e2 * sin_lat * sin_lat).sqrt();

            for i in 0..num_lon {
                let elev = elevations[elev_index];
                elev_index += 1;
                result[result_index] = DVec3::new(
                    (rpm + elev) * cos_lat * sin_lon[i],
                    (rpm * (1.0 - e2) + elev) * sin_lat,
                    (rpm + elev) * cos_lat * cos_lon[i],
                ) - *reference_point;
                result_index += 1;
            }

            lat += delta_lat;
        }
    }

    // Vermeille's analytical geodetic-from-geocentric method. The three
    // branches keep precision near the evolute and over the singular disk
    // and must stay separate.
    fn cartesian_to_geographic(
        &self,
        globe: &Globe,
        x: f64,
        y: f64,
        z: f64,
        _offset: &DVec3,
    ) -> Position {
        let cap_x = z;
        let cap_y = x;
        let cap_z = y;
        let xx_p_yy = cap_x * cap_x + cap_y * cap_y;
        let sqrt_xx_p_yy = xx_p_yy.sqrt();
        let a = globe.equatorial_radius;
        let ra2 = 1.0 / (a * a);
        let e2 = globe.eccentricity_squared;
        let e4 = e2 * e2;
        let p = xx_p_yy * ra2;
        let q = cap_z * cap_z * (1.0 - e2) * ra2;
        let r = (p + q - e4) / 6.0;
        let evolute_border_test = 8.0 * r * r * r + e4 * p * q;

        let h;
        let phi;

        if evolute_border_test > 0.0 || q != 0.0 {
            let u;
            if evolute_border_test > 0.0 {
                // General case.
                let rad1 = evolute_border_test.sqrt();
                let rad2 = (e4 * p * q).sqrt();

                // The cusp split at 10*e2 chooses the better-conditioned
                // cube-root expansion near the cusps of the evolute.
                if evolute_border_test > 10.0 * e2 {
                    let rad3 = cbrt((rad1 + rad2) * (rad1 + rad2));
                    u = r + 0.5 * rad3 + 2.0 * r * r / rad3;
                } else {
                    u = r
                        + 0.5 * cbrt((rad1 + rad2) * (rad1 + rad2))
                        + 0.5 * cbrt((rad1 - rad2) * (rad1 - rad2));
                }
            } else {
                // Near the evolute.
                let rad1 = (-evolute_border_test).sqrt();
                let rad2 = (-8.0 * r * r * r).sqrt();
                let rad3 = (e4 * p * q).sqrt();
                let atan = 2.0 * rad3.atan2(rad1 + rad2) / 3.0;

                u = -4.0 * r * atan.sin() * (PI / 6.0 + atan).cos();
            }

            let v = (u * u + e4 * q).sqrt();
            let w = e2 * (u + v - q) / (2.0 * v);
            let k = (u + v) / ((w * w + u + v).sqrt() + w);
            let d = k * sqrt_xx_p_yy / (k + e2);
            let sqrt_dd_p_zz = (d * d + cap_z * cap_z).sqrt();

            h = (k + e2 - 1.0) * sqrt_dd_p_zz / k;
            phi = 2.0 * cap_z.atan2(sqrt_dd_p_zz + d);
        } else {
            // Singular disk.
            let rad1 = (1.0 - e2).sqrt();
            let rad2 = (e2 - p).sqrt();
            let e = e2.sqrt();

            h = -a * rad1 * rad2 / e;
            phi = rad2 / (e * rad2 + rad1 * p.sqrt());
        }

        // Longitude, split into three half-angle cases to avoid loss of
        // precision near the +/-180 and +/-90 meridians.
        let lambda;
        if (SQRT_2 - 1.0) * cap_y < sqrt_xx_p_yy + cap_x {
            // -135deg < lambda < 135deg
            lambda = 2.0 * cap_y.atan2(sqrt_xx_p_yy + cap_x);
        } else if sqrt_xx_p_yy + cap_y < (SQRT_2 + 1.0) * cap_x {
            // -225deg < lambda < 45deg
            lambda = -PI * 0.5 + 2.0 * cap_x.atan2(sqrt_xx_p_yy - cap_y);
        } else {
            // -45deg < lambda < 225deg
            lambda = PI * 0.5 - 2.0 * cap_x.atan2(sqrt_xx_p_yy + cap_y);
        }

        return Position::new(RADIANS_TO_DEGREES * phi, RADIANS_TO_DEGREES * lambda, h);
    }

    fn surface_normal_at_location(&self, latitude: f64, longitude: f64) -> DVec3 {
        let (sin_lat, cos_lat) = (latitude * DEGREES_TO_RADIANS).sin_cos();
        let (sin_lon, cos_lon) = (longitude * DEGREES_TO_RADIANS).sin_cos();

        return DVec3::new(cos_lat * sin_lon, sin_lat, cos_lat * cos_lon).normalize();
    }

    fn surface_normal_at_point(&self, globe: &Globe, x: f64, y: f64, z: f64) -> DVec3 {
        let a2 = globe.equatorial_radius * globe.equatorial_radius;
        let b2 = globe.polar_radius * globe.polar_radius;

        return DVec3::new(x / a2, y / b2, z / a2).normalize();
    }

    fn north_tangent_at_location(&self, latitude: f64, longitude: f64) -> DVec3 {
        // Rotating (0, 1, 0) about the Y axis by longitude then about the X
        // axis by -latitude collapses to this closed form.
        let (sin_lat, cos_lat) = (latitude * DEGREES_TO_RADIANS).sin_cos();
        let (sin_lon, cos_lon) = (longitude * DEGREES_TO_RADIANS).sin_cos();

        return DVec3::new(-sin_lat * sin_lon, cos_lat, -sin_lat * cos_lon).normalize();
    }

    fn north_tangent_at_point(
        &self,
        globe: &Globe,
        x: f64,
        y: f64,
        z: f64,
        offset: &DVec3,
    ) -> DVec3 {
        let position = self.cartesian_to_geographic(globe, x, y, z, offset);
        return self.north_tangent_at_location(position.latitude, position.longitude);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::equals_epsilon;
    use crate::ZeroElevationModel;

    fn wgs84_globe() -> Globe {
        return Globe::new(Box::new(ZeroElevationModel::default()));
    }

    #[test]
    fn geographic_round_trip_over_the_sphere() {
        let globe = wgs84_globe();
        let projection = ProjectionWgs84::default();
        let offset = DVec3::ZERO;

        let mut lat = -89.0;
        while lat <= 89.0 {
            let mut lon = -180.0;
            while lon <= 180.0 {
                for alt in [0.0, 1.0e4, 1.0e6] {
                    let point =
                        projection.geographic_to_cartesian(&globe, lat, lon, alt, &offset);
                    let position = projection
                        .cartesian_to_geographic(&globe, point.x, point.y, point.z, &offset);
                    assert!(
                        equals_epsilon(position.latitude, lat, None, Some(1e-6)),
                        "lat {lat} lon {lon} alt {alt} -> {position:?}"
                    );
                    // Longitude is degenerate at the antimeridian seam.
                    let lon_error = (position.longitude - lon).abs() % 360.0;
                    assert!(
                        lon_error < 1e-6 || (360.0 - lon_error) < 1e-6,
                        "lat {lat} lon {lon} alt {alt} -> {position:?}"
                    );
                    assert!(
                        equals_epsilon(position.altitude, alt, None, Some(1e-3)),
                        "lat {lat} lon {lon} alt {alt} -> {position:?}"
                    );
                }
                lon += 22.5;
            }
            lat += 11.0;
        }
    }

    #[test]
    fn prime_meridian_equator_lies_on_the_z_axis() {
        let globe = wgs84_globe();
        let projection = ProjectionWgs84::default();
        let point = projection.geographic_to_cartesian(&globe, 0.0, 0.0, 0.0, &DVec3::ZERO);
        assert!(equals_epsilon(point.x, 0.0, None, Some(1e-9)));
        assert!(equals_epsilon(point.y, 0.0, None, Some(1e-9)));
        assert!(equals_epsilon(
            point.z,
            globe.equatorial_radius,
            None,
            Some(1e-9)
        ));
    }

    #[test]
    fn grid_corners_match_single_point_evaluation() {
        let globe = wgs84_globe();
        let projection = ProjectionWgs84::default();
        let sector = Sector::new(10.0, 20.0, 30.0, 40.0);
        let (num_lat, num_lon) = (3usize, 3usize);
        let elevations = vec![0.0f64; num_lat * num_lon];
        let reference = DVec3::new(1000.0, 2000.0, 3000.0);
        let mut grid = vec![DVec3::ZERO; num_lat * num_lon];

        projection.geographic_to_cartesian_grid(
            &globe,
            &sector,
            num_lat,
            num_lon,
            &elevations,
            &reference,
            &DVec3::ZERO,
            &mut grid,
        );

        let corner =
            projection.geographic_to_cartesian(&globe, 20.0, 40.0, 0.0, &DVec3::ZERO) - reference;
        let last = grid[num_lat * num_lon - 1];
        assert!(corner.abs_diff_eq(last, 1e-6));
    }

    #[test]
    fn north_tangent_points_north() {
        let projection = ProjectionWgs84::default();
        let tangent = projection.north_tangent_at_location(0.0, 0.0);
        assert!(tangent.abs_diff_eq(DVec3::new(0.0, 1.0, 0.0), 1e-12));
    }
}
