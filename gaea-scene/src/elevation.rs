use crate::Sector;

/// Source of terrain heights consumed by the globe and the tessellator.
///
/// `elevations_for_grid` returns the resolution actually achieved, in
/// degrees, which may be coarser than requested while data is still loading.
pub trait ElevationModel: Send + Sync {
    /// Monotonic counter bumped whenever the underlying elevations change.
    fn timestamp(&self) -> u64;

    fn min_elevation(&self) -> f64;

    fn max_elevation(&self) -> f64;

    fn min_and_max_elevations_for_sector(&self, sector: &Sector) -> (f64, f64);

    /// Elevation in meters, zero outside the model's coverage area.
    fn elevation_at_location(&self, latitude: f64, longitude: f64) -> f64;

    /// Fills `result` with `num_lat * num_lon` elevations sampled over the
    /// sector in row-major order starting at the minimum latitude. Returns
    /// the achieved resolution in degrees.
    fn elevations_for_grid(
        &self,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        target_resolution: f64,
        result: &mut [f64],
    ) -> f64;

    fn state_key(&self) -> String {
        return format!("elevations {} ", self.timestamp());
    }
}

/// An elevation model that is zero everywhere.
#[derive(Debug, Default)]
pub struct ZeroElevationModel;

impl ElevationModel for ZeroElevationModel {
    fn timestamp(&self) -> u64 {
        return 0;
    }

    fn min_elevation(&self) -> f64 {
        return 0.0;
    }

    fn max_elevation(&self) -> f64 {
        return 0.0;
    }

    fn min_and_max_elevations_for_sector(&self, _sector: &Sector) -> (f64, f64) {
        return (0.0, 0.0);
    }

    fn elevation_at_location(&self, _latitude: f64, _longitude: f64) -> f64 {
        return 0.0;
    }

    fn elevations_for_grid(
        &self,
        _sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        target_resolution: f64,
        result: &mut [f64],
    ) -> f64 {
        for value in result.iter_mut().take(num_lat * num_lon) {
            *value = 0.0;
        }
        return target_resolution;
    }
}

/// A uniform elevation everywhere, handy for tests.
#[derive(Debug)]
pub struct ConstantElevationModel {
    pub elevation: f64,
    pub timestamp: u64,
}

impl ConstantElevationModel {
    pub fn new(elevation: f64) -> Self {
        Self {
            elevation,
            timestamp: 1,
        }
    }
}

impl ElevationModel for ConstantElevationModel {
    fn timestamp(&self) -> u64 {
        return self.timestamp;
    }

    fn min_elevation(&self) -> f64 {
        return self.elevation.min(0.0);
    }

    fn max_elevation(&self) -> f64 {
        return self.elevation.max(0.0);
    }

    fn min_and_max_elevations_for_sector(&self, _sector: &Sector) -> (f64, f64) {
        return (self.elevation, self.elevation);
    }

    fn elevation_at_location(&self, _latitude: f64, _longitude: f64) -> f64 {
        return self.elevation;
    }

    fn elevations_for_grid(
        &self,
        _sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        target_resolution: f64,
        result: &mut [f64],
    ) -> f64 {
        for value in result.iter_mut().take(num_lat * num_lon) {
            *value = self.elevation;
        }
        return target_resolution;
    }
}
