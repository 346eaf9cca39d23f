use bevy::math::{DMat4, DVec3};

use gaea_scene::{Direction, GeomError, Globe, Level, Sector, Tile, TileKey};

/// A tile of the currently tessellated terrain: a quadtree tile plus its
/// vertex grid and the state keys that decide when the grid and its GPU
/// buffer must be rebuilt.
#[derive(Clone, Debug)]
pub struct TerrainTile {
    pub tile: Tile,
    /// Translates tile-local points to model coordinates.
    pub transformation_matrix: DMat4,
    /// The vertex grid, row-major from the minimum latitude, relative to the
    /// tile's reference point.
    pub points: Vec<f32>,
    /// Identifies the state the points were computed from.
    pub points_state_key: Option<String>,
    /// Identifies the state of the points currently in the GPU buffer.
    pub points_vbo_state_key: Option<String>,
    neighbor_levels: [Option<Level>; 4],
    state_key: Option<String>,
    elevation_timestamp: Option<u64>,
}

impl TerrainTile {
    pub fn new(sector: Sector, level: Level, row: u32, column: u32) -> Result<Self, GeomError> {
        return Ok(Self {
            tile: Tile::new(sector, level, row, column)?,
            transformation_matrix: DMat4::IDENTITY,
            points: Vec::new(),
            points_state_key: None,
            points_vbo_state_key: None,
            neighbor_levels: [None; 4],
            state_key: None,
            elevation_timestamp: None,
        });
    }

    pub fn from_tile(tile: Tile) -> Self {
        Self {
            tile,
            transformation_matrix: DMat4::IDENTITY,
            points: Vec::new(),
            points_state_key: None,
            points_vbo_state_key: None,
            neighbor_levels: [None; 4],
            state_key: None,
            elevation_timestamp: None,
        }
    }

    pub fn tile_key(&self) -> TileKey {
        return self.tile.tile_key;
    }

    pub fn sector(&self) -> &Sector {
        return &self.tile.sector;
    }

    pub fn level(&self) -> &Level {
        return &self.tile.level;
    }

    /// The level of the tile adjacent in the given direction, `None` when no
    /// such tile is part of the current tessellation.
    pub fn neighbor_level(&self, direction: Direction) -> Option<Level> {
        return self.neighbor_levels[direction.index()];
    }

    pub fn set_neighbor_level(&mut self, direction: Direction, level: Option<Level>) {
        self.neighbor_levels[direction.index()] = level;
        // Neighbor levels feed the state key.
        self.state_key = None;
    }

    /// Whether the neighbor in the given direction is at a coarser level
    /// than this tile.
    pub fn neighbor_is_coarser(&self, direction: Direction) -> bool {
        return match self.neighbor_level(direction) {
            Some(level) => level.compare(&self.tile.level).is_lt(),
            None => false,
        };
    }

    /// Recomputes frame-dependent tile state. Invalidates the state key when
    /// the globe's elevations have changed since the last update.
    pub fn update(&mut self, globe: &Globe, vertical_exaggeration: f64) {
        self.tile.update(globe, vertical_exaggeration);

        let timestamp = globe.elevation_timestamp();
        if self.elevation_timestamp != Some(timestamp) {
            self.elevation_timestamp = Some(timestamp);
            self.state_key = None;
        }
    }

    /// Identifies the elevation and neighbor state this tile's geometry
    /// depends on. Computed lazily and cached until invalidated.
    pub fn state_key(&mut self) -> &str {
        if self.state_key.is_none() {
            self.state_key = Some(self.compute_state_key());
        }
        // Populated just above.
        return self.state_key.as_deref().unwrap_or("");
    }

    fn compute_state_key(&self) -> String {
        let mut key = format!("{}", self.elevation_timestamp.unwrap_or(0));
        for direction in Direction::ALL {
            let comparison: i8 = match self.neighbor_levels[direction.index()] {
                Some(level) => match level.compare(&self.tile.level) {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                },
                None => 0,
            };
            key.push('.');
            key.push_str(&comparison.to_string());
        }
        return key;
    }

    /// The point on this tile's surface beneath the location, in model
    /// coordinates. The location must lie within the tile's sector and the
    /// points must have been generated.
    pub fn surface_point(&self, latitude: f64, longitude: f64) -> DVec3 {
        let sector = &self.tile.sector;
        let tile_width = self.tile.level.tile_width;
        let tile_height = self.tile.level.tile_height;

        // Fractional grid coordinates of the location.
        let s = (longitude - sector.min_longitude) / sector.delta_longitude() * tile_width as f64;
        let t = (latitude - sector.min_latitude) / sector.delta_latitude() * tile_height as f64;

        // Locations on the east or north edge fall in the last cell.
        let (si, sf) = if s < tile_width as f64 {
            (s.floor().max(0.0) as usize, s - s.floor().max(0.0))
        } else {
            (tile_width - 1, 1.0)
        };
        let (ti, tf) = if t < tile_height as f64 {
            (t.floor().max(0.0) as usize, t - t.floor().max(0.0))
        } else {
            (tile_height - 1, 1.0)
        };

        let row_stride = tile_width + 1;
        let lower = 3 * (si + ti * row_stride);
        let upper = 3 * (si + (ti + 1) * row_stride);
        let point = |offset: usize| {
            DVec3::new(
                self.points[offset] as f64,
                self.points[offset + 1] as f64,
                self.points[offset + 2] as f64,
            )
        };
        let ll = point(lower);
        let lr = point(lower + 3);
        let ul = point(upper);
        let ur = point(upper + 3);

        // Interpolate within whichever triangle of the cell contains the
        // location. The cell diagonal runs from lower left to upper right.
        let result = if sf > tf {
            ll + sf * (lr - ll) + tf * (ul - ll)
        } else {
            ur + (1.0 - sf) * (ul - ur) + (1.0 - tf) * (lr - ur)
        };

        return result + self.tile.reference_point;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaea_scene::{LevelSet, ZeroElevationModel};

    fn level_set() -> LevelSet {
        return LevelSet::new(Sector::FULL_SPHERE, 45.0, 45.0, 15, 32, 32).unwrap();
    }

    fn tile() -> TerrainTile {
        let levels = level_set();
        let level = *levels.first_level();
        let sector = Tile::compute_sector(&level, 2, 4);
        return TerrainTile::new(sector, level, 2, 4).unwrap();
    }

    #[test]
    fn state_key_changes_with_neighbor_levels() {
        let levels = level_set();
        let mut t = tile();
        let globe = Globe::new(Box::new(ZeroElevationModel::default()));
        t.update(&globe, 1.0);

        let before = t.state_key().to_string();
        t.set_neighbor_level(Direction::North, levels.previous_level(1).copied());
        let after = t.state_key().to_string();
        assert_ne!(before, after);
    }

    #[test]
    fn coarser_neighbor_detection() {
        let levels = level_set();
        let mut t = tile();
        assert!(!t.neighbor_is_coarser(Direction::East));

        t.set_neighbor_level(Direction::East, levels.level(0).copied());
        assert!(!t.neighbor_is_coarser(Direction::East)); // same level

        let levels = LevelSet::new(Sector::FULL_SPHERE, 45.0, 45.0, 15, 32, 32).unwrap();
        let level_one = *levels.level(1).unwrap();
        let sector = Tile::compute_sector(&level_one, 4, 8);
        let mut finer = TerrainTile::new(sector, level_one, 4, 8).unwrap();
        finer.set_neighbor_level(Direction::West, levels.level(0).copied());
        assert!(finer.neighbor_is_coarser(Direction::West));
    }

    #[test]
    fn surface_point_interpolates_the_vertex_grid() {
        // A flat 1x1-cell tile with unit z so interpolation is easy to check.
        let levels = level_set();
        let level = Level::new(0, 45.0, 45.0, 1, 1);
        let sector = Sector::new(0.0, 45.0, 0.0, 45.0);
        let mut t = TerrainTile::from_tile(
            Tile::new(sector, *levels.first_level(), 2, 4).unwrap(),
        );
        t.tile.level = level;
        // Grid corners: ll, lr on the first row, ul, ur on the second.
        t.points = vec![
            0.0, 0.0, 0.0, // ll
            1.0, 0.0, 0.0, // lr
            0.0, 1.0, 0.0, // ul
            1.0, 1.0, 0.0, // ur
        ];

        let center = t.surface_point(22.5, 22.5);
        assert!((center.x - 0.5).abs() < 1e-9);
        assert!((center.y - 0.5).abs() < 1e-9);

        let lower_left = t.surface_point(0.0, 0.0);
        assert!(lower_left.length() < 1e-9);

        let upper_right = t.surface_point(45.0, 45.0);
        assert!((upper_right.x - 1.0).abs() < 1e-9);
        assert!((upper_right.y - 1.0).abs() < 1e-9);
    }
}
