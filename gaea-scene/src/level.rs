use std::cmp::Ordering;

use crate::math::DEGREES_TO_RADIANS;
use crate::{GeomError, Sector};

/// One depth of a tile pyramid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Level {
    pub level_number: usize,
    /// Latitudinal extent of one tile at this level, degrees.
    pub tile_delta_latitude: f64,
    /// Longitudinal extent of one tile at this level, degrees.
    pub tile_delta_longitude: f64,
    /// Cells per tile in longitude.
    pub tile_width: usize,
    /// Cells per tile in latitude.
    pub tile_height: usize,
    /// Angular size of one cell, radians.
    pub texel_size: f64,
}

impl Level {
    pub fn new(
        level_number: usize,
        tile_delta_latitude: f64,
        tile_delta_longitude: f64,
        tile_width: usize,
        tile_height: usize,
    ) -> Self {
        Self {
            level_number,
            tile_delta_latitude,
            tile_delta_longitude,
            tile_width,
            tile_height,
            texel_size: tile_delta_latitude * DEGREES_TO_RADIANS / tile_height as f64,
        }
    }

    /// Tile rows spanning the full latitude range at this level.
    pub fn num_rows(&self) -> u32 {
        return (180.0 / self.tile_delta_latitude).round() as u32;
    }

    /// Tile columns spanning the full longitude range at this level.
    pub fn num_columns(&self) -> u32 {
        return (360.0 / self.tile_delta_longitude).round() as u32;
    }

    pub fn compare(&self, that: &Level) -> Ordering {
        return self.level_number.cmp(&that.level_number);
    }
}

/// A strictly refining chain of levels covering a sector. Each level halves
/// the tile delta of the one before it.
#[derive(Clone, Debug)]
pub struct LevelSet {
    pub sector: Sector,
    levels: Vec<Level>,
}

impl LevelSet {
    pub fn new(
        sector: Sector,
        level_zero_delta_latitude: f64,
        level_zero_delta_longitude: f64,
        num_levels: usize,
        tile_width: usize,
        tile_height: usize,
    ) -> Result<Self, GeomError> {
        if num_levels == 0 {
            return Err(GeomError::EmptyLevelSet);
        }

        let mut levels = Vec::with_capacity(num_levels);
        for n in 0..num_levels {
            let divisor = (1u64 << n) as f64;
            levels.push(Level::new(
                n,
                level_zero_delta_latitude / divisor,
                level_zero_delta_longitude / divisor,
                tile_width,
                tile_height,
            ));
        }

        return Ok(Self { sector, levels });
    }

    pub fn num_levels(&self) -> usize {
        return self.levels.len();
    }

    pub fn first_level(&self) -> &Level {
        return &self.levels[0];
    }

    pub fn last_level(&self) -> &Level {
        return &self.levels[self.levels.len() - 1];
    }

    pub fn level(&self, level_number: usize) -> Option<&Level> {
        return self.levels.get(level_number);
    }

    pub fn next_level(&self, level_number: usize) -> Option<&Level> {
        return self.levels.get(level_number + 1);
    }

    pub fn previous_level(&self, level_number: usize) -> Option<&Level> {
        if level_number == 0 {
            return None;
        }
        return self.levels.get(level_number - 1);
    }

    pub fn is_last_level(&self, level_number: usize) -> bool {
        return level_number + 1 == self.levels.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_sphere_levels() -> LevelSet {
        return LevelSet::new(Sector::FULL_SPHERE, 45.0, 45.0, 15, 32, 32).unwrap();
    }

    #[test]
    fn levels_halve_their_deltas() {
        let levels = full_sphere_levels();
        assert_eq!(levels.num_levels(), 15);
        assert_eq!(levels.first_level().tile_delta_latitude, 45.0);
        assert_eq!(levels.level(1).unwrap().tile_delta_latitude, 22.5);
        assert_eq!(levels.level(2).unwrap().tile_delta_longitude, 11.25);
        assert!(levels.is_last_level(14));
        assert!(!levels.is_last_level(13));
    }

    #[test]
    fn top_level_tile_counts() {
        let levels = full_sphere_levels();
        assert_eq!(levels.first_level().num_rows(), 4);
        assert_eq!(levels.first_level().num_columns(), 8);
        assert_eq!(levels.level(1).unwrap().num_rows(), 8);
    }

    #[test]
    fn texel_size_is_delta_over_height_in_radians() {
        let levels = full_sphere_levels();
        let level = levels.first_level();
        let expected = 45.0 * DEGREES_TO_RADIANS / 32.0;
        assert_eq!(level.texel_size, expected);
    }

    #[test]
    fn empty_level_set_is_an_error() {
        assert!(LevelSet::new(Sector::FULL_SPHERE, 45.0, 45.0, 0, 32, 32).is_err());
    }
}
