use bevy::math::DVec3;

use crate::{BoundingBox, GeomError, Globe, Level, LevelSet, Sector, TileKey};

/// A quadtree tile: a sector at a level, addressed by row and column.
///
/// Frame-dependent state (extent, sample points, reference point) is
/// recomputed by `update` only when the elevations, vertical exaggeration or
/// globe state it was computed from have changed.
#[derive(Clone, Debug)]
pub struct Tile {
    pub sector: Sector,
    pub level: Level,
    pub row: u32,
    pub column: u32,
    pub tile_key: TileKey,
    /// Cartesian bounding volume, valid after `update`.
    pub extent: Option<BoundingBox>,
    /// Local origin for model coordinates associated with this tile. Points
    /// are stored relative to it to keep single-precision GPU vertices
    /// accurate near the tile.
    pub reference_point: DVec3,
    sample_points: Vec<DVec3>,
    update_timestamp: Option<u64>,
    update_vertical_exaggeration: Option<f64>,
    update_globe_state_key: Option<String>,
}

impl Tile {
    pub fn new(sector: Sector, level: Level, row: u32, column: u32) -> Result<Self, GeomError> {
        if row >= level.num_rows() || column >= level.num_columns() {
            return Err(GeomError::TileAddressOutOfRange {
                level: level.level_number,
                row,
                column,
            });
        }

        return Ok(Self {
            sector,
            level,
            row,
            column,
            tile_key: TileKey::new(level.level_number, row, column),
            extent: None,
            reference_point: DVec3::ZERO,
            sample_points: Vec::new(),
            update_timestamp: None,
            update_vertical_exaggeration: None,
            update_globe_state_key: None,
        });
    }

    /// An estimate of this tile's in-memory size, for cache accounting.
    pub fn size(&self) -> usize {
        return 4
            + (4 + 32) // sector
            + 4
            + 8 // row and column
            + 8 // texel size
            + (4 + 32) // reference point
            + (4 + 676) // bounding box
            + 8 // min and max height
            + (4 + 32) // nearest point
            + 8; // extent timestamp and vertical exaggeration
    }

    /// The row containing `latitude` at the given tile delta.
    pub fn compute_row(delta: f64, latitude: f64) -> u32 {
        let mut row = ((latitude + 90.0) / delta).floor() as i64;
        // The grid's north edge belongs to the last row.
        if latitude == 90.0 {
            row -= 1;
        }
        return row.max(0) as u32;
    }

    /// The column containing `longitude` at the given tile delta.
    pub fn compute_column(delta: f64, longitude: f64) -> u32 {
        let mut col = ((longitude + 180.0) / delta).floor() as i64;
        if longitude == 180.0 {
            col -= 1;
        }
        return col.max(0) as u32;
    }

    pub fn compute_last_row(delta: f64, max_latitude: f64) -> u32 {
        if max_latitude + 90.0 < delta {
            return 0;
        }
        return ((max_latitude + 90.0) / delta - 1.0).ceil().max(0.0) as u32;
    }

    pub fn compute_last_column(delta: f64, max_longitude: f64) -> u32 {
        if max_longitude + 180.0 < delta {
            return 0;
        }
        return ((max_longitude + 180.0) / delta - 1.0).ceil().max(0.0) as u32;
    }

    /// The sector spanned by the tile at (level, row, column).
    pub fn compute_sector(level: &Level, row: u32, column: u32) -> Sector {
        let delta_lat = level.tile_delta_latitude;
        let delta_lon = level.tile_delta_longitude;

        let min_lat = -90.0 + row as f64 * delta_lat;
        let min_lon = -180.0 + column as f64 * delta_lon;

        return Sector::new(min_lat, min_lat + delta_lat, min_lon, min_lon + delta_lon);
    }

    /// Appends every tile of the level that falls within the level set's
    /// sector.
    pub fn create_tiles_for_level(
        level_set: &LevelSet,
        level: &Level,
        result: &mut Vec<Tile>,
    ) -> Result<(), GeomError> {
        let delta_lat = level.tile_delta_latitude;
        let delta_lon = level.tile_delta_longitude;
        let sector = &level_set.sector;

        let first_row = Self::compute_row(delta_lat, sector.min_latitude);
        let last_row = Self::compute_row(delta_lat, sector.max_latitude);
        let first_col = Self::compute_column(delta_lon, sector.min_longitude);
        let last_col = Self::compute_column(delta_lon, sector.max_longitude);

        let first_row_lat = -90.0 + first_row as f64 * delta_lat;
        let first_row_lon = -180.0 + first_col as f64 * delta_lon;

        let mut min_lat = first_row_lat;
        for row in first_row..=last_row {
            let max_lat = min_lat + delta_lat;
            let mut min_lon = first_row_lon;

            for col in first_col..=last_col {
                let max_lon = min_lon + delta_lon;
                let tile_sector = Sector::new(min_lat, max_lat, min_lon, max_lon);
                result.push(Tile::new(tile_sector, *level, row, col)?);
                min_lon = max_lon;
            }

            min_lat = max_lat;
        }
        return Ok(());
    }

    /// The four children formed by splitting this tile at its centroid.
    pub fn subdivide(&self, level: &Level) -> Result<[Tile; 4], GeomError> {
        let lat_min = self.sector.min_latitude;
        let lat_max = self.sector.max_latitude;
        let lat_mid = self.sector.centroid_latitude();
        let lon_min = self.sector.min_longitude;
        let lon_max = self.sector.max_longitude;
        let lon_mid = self.sector.centroid_longitude();

        let sub_row = 2 * self.row;
        let sub_col = 2 * self.column;

        return Ok([
            Tile::new(
                Sector::new(lat_min, lat_mid, lon_min, lon_mid),
                *level,
                sub_row,
                sub_col,
            )?,
            Tile::new(
                Sector::new(lat_min, lat_mid, lon_mid, lon_max),
                *level,
                sub_row,
                sub_col + 1,
            )?,
            Tile::new(
                Sector::new(lat_mid, lat_max, lon_min, lon_mid),
                *level,
                sub_row + 1,
                sub_col,
            )?,
            Tile::new(
                Sector::new(lat_mid, lat_max, lon_mid, lon_max),
                *level,
                sub_row + 1,
                sub_col + 1,
            )?,
        ]);
    }

    /// Approximate distance to a point: the nearest of the tile's 3x3 sample
    /// points, valid after `update`.
    pub fn distance_to(&self, point: &DVec3) -> f64 {
        let mut distance_squared = f64::INFINITY;
        for sample in &self.sample_points {
            distance_squared = distance_squared.min(sample.distance_squared(*point));
        }
        return distance_squared.sqrt();
    }

    /// Whether this tile's ground cell size projects to more screen pixels
    /// than the detail factor allows. The pixel size at the tile's distance
    /// is `pixel_size_factor * distance + pixel_size_offset`.
    ///
    /// The 0.5 floor keeps subdivision from running away when the eye is
    /// very near the surface.
    pub fn must_subdivide(
        &self,
        globe: &Globe,
        eye_point: &DVec3,
        pixel_size_factor: f64,
        pixel_size_offset: f64,
        detail_factor: f64,
    ) -> bool {
        let cell_size = globe.equatorial_radius * self.level.texel_size;
        let distance = self.distance_to(eye_point);
        let pixel_size = pixel_size_factor * distance + pixel_size_offset;

        return cell_size > (detail_factor * pixel_size).max(0.5);
    }

    /// Recomputes the extent, sample points and reference point when the
    /// elevations, vertical exaggeration or globe state have changed since
    /// the last call. Returns true when a recomputation happened.
    pub fn update(&mut self, globe: &Globe, vertical_exaggeration: f64) -> bool {
        let elevation_timestamp = globe.elevation_timestamp();
        let globe_state_key = globe.state_key();

        if self.update_timestamp == Some(elevation_timestamp)
            && self.update_vertical_exaggeration == Some(vertical_exaggeration)
            && self.update_globe_state_key.as_deref() == Some(globe_state_key.as_str())
        {
            return false;
        }

        self.do_update(globe, vertical_exaggeration);

        self.update_timestamp = Some(elevation_timestamp);
        self.update_vertical_exaggeration = Some(vertical_exaggeration);
        self.update_globe_state_key = Some(globe_state_key);
        return true;
    }

    fn do_update(&mut self, globe: &Globe, vertical_exaggeration: f64) {
        let (min_elevation, max_elevation) = globe.min_and_max_elevations_for_sector(&self.sector);
        let min_height = min_elevation * vertical_exaggeration;
        let mut max_height = max_elevation * vertical_exaggeration;

        if min_height == max_height {
            max_height = min_height + 10.0; // keep the extent from degenerating
        }

        let mut extent = self.extent.take().unwrap_or_default();
        extent.set_to_sector(&self.sector, globe, min_height, max_height);
        self.extent = Some(extent);

        // A 3x3 grid of sample points estimates the distance from the eye to
        // this tile.
        let sample_elevations = [0.5 * (min_height + max_height); 9];
        if self.sample_points.len() != 9 {
            self.sample_points = vec![DVec3::ZERO; 9];
        }
        // 3x3 with exactly sized arrays never fails validation.
        let _ = globe.compute_points_for_grid(
            &self.sector,
            3,
            3,
            &sample_elevations,
            &DVec3::ZERO,
            &mut self.sample_points,
        );

        self.reference_point = globe.compute_point_from_location(
            self.sector.centroid_latitude(),
            self.sector.centroid_longitude(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ZeroElevationModel;

    fn levels() -> LevelSet {
        return LevelSet::new(Sector::FULL_SPHERE, 45.0, 45.0, 15, 32, 32).unwrap();
    }

    fn globe() -> Globe {
        return Globe::new(Box::new(ZeroElevationModel::default()));
    }

    #[test]
    fn row_and_column_addressing_clamps_at_grid_edges() {
        assert_eq!(Tile::compute_row(45.0, -90.0), 0);
        assert_eq!(Tile::compute_row(45.0, 45.0), 3);
        assert_eq!(Tile::compute_row(45.0, 90.0), 3);
        assert_eq!(Tile::compute_column(45.0, -180.0), 0);
        assert_eq!(Tile::compute_column(45.0, 180.0), 7);
        assert_eq!(Tile::compute_last_row(45.0, 90.0), 3);
        assert_eq!(Tile::compute_last_row(45.0, -50.0), 0);
        assert_eq!(Tile::compute_last_column(45.0, 180.0), 7);
    }

    #[test]
    fn level_zero_covers_the_sphere_in_32_tiles() {
        let level_set = levels();
        let mut tiles = Vec::new();
        Tile::create_tiles_for_level(&level_set, level_set.first_level(), &mut tiles).unwrap();
        assert_eq!(tiles.len(), 32);

        let mut union = tiles[0].sector;
        for tile in &tiles {
            union = union.union(&tile.sector);
        }
        assert_eq!(union, Sector::FULL_SPHERE);
    }

    #[test]
    fn out_of_range_address_is_rejected() {
        let level_set = levels();
        let level = *level_set.first_level();
        assert!(Tile::new(Sector::FULL_SPHERE, level, 4, 0).is_err());
        assert!(Tile::new(Sector::FULL_SPHERE, level, 0, 8).is_err());
    }

    #[test]
    fn subdivision_splits_the_sector_at_the_centroid() {
        let level_set = levels();
        let level = *level_set.first_level();
        let sector = Tile::compute_sector(&level, 2, 4);
        let tile = Tile::new(sector, level, 2, 4).unwrap();

        let children = tile.subdivide(level_set.next_level(0).unwrap()).unwrap();
        assert_eq!(children[0].row, 4);
        assert_eq!(children[0].column, 8);
        assert_eq!(children[3].row, 5);
        assert_eq!(children[3].column, 9);

        let mut union = children[0].sector;
        for child in &children {
            union = union.union(&child.sector);
            assert!(sector.contains_sector(&child.sector));
        }
        assert_eq!(union, sector);
    }

    #[test]
    fn update_is_memoized_on_globe_state() {
        let g = globe();
        let level_set = levels();
        let level = *level_set.first_level();
        let sector = Tile::compute_sector(&level, 2, 4);
        let mut tile = Tile::new(sector, level, 2, 4).unwrap();

        assert!(tile.update(&g, 1.0));
        assert!(tile.extent.is_some());
        assert!(tile.reference_point.length() > 0.0);
        assert!(!tile.update(&g, 1.0));
        assert!(tile.update(&g, 2.0));
    }

    #[test]
    fn distance_to_a_sample_point_is_zero() {
        let g = globe();
        let level_set = levels();
        let level = *level_set.first_level();
        let sector = Tile::compute_sector(&level, 2, 4);
        let mut tile = Tile::new(sector, level, 2, 4).unwrap();
        tile.update(&g, 1.0);

        let centroid = g.compute_point_from_position(
            sector.centroid_latitude(),
            sector.centroid_longitude(),
            5.0, // mid-height of the zero-elevation extent
        );
        assert!(tile.distance_to(&centroid) < 1.0);
    }
}
