use gaea_scene::{Sector, TileKey};

use crate::terrain::TerrainTile;

/// The tiles selected for the current frame, with the union of their
/// sectors.
#[derive(Clone, Debug, Default)]
pub struct TerrainTileList {
    tile_keys: Vec<TileKey>,
    sector: Option<Sector>,
}

impl TerrainTileList {
    pub fn add_tile(&mut self, tile: &TerrainTile) {
        self.tile_keys.push(tile.tile_key());
        self.sector = match self.sector {
            Some(sector) => Some(sector.union(tile.sector())),
            None => Some(*tile.sector()),
        };
    }

    pub fn remove_all_tiles(&mut self) {
        self.tile_keys.clear();
        self.sector = None;
    }

    pub fn tile_keys(&self) -> &[TileKey] {
        return &self.tile_keys;
    }

    pub fn sector(&self) -> Option<Sector> {
        return self.sector;
    }

    pub fn len(&self) -> usize {
        return self.tile_keys.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.tile_keys.is_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaea_scene::{LevelSet, Tile};

    #[test]
    fn sector_is_the_union_of_added_tiles() {
        let levels = LevelSet::new(Sector::FULL_SPHERE, 45.0, 45.0, 15, 32, 32).unwrap();
        let level = *levels.first_level();
        let mut list = TerrainTileList::default();
        assert!(list.is_empty());
        assert!(list.sector().is_none());

        for (row, column) in [(0, 0), (1, 1)] {
            let sector = Tile::compute_sector(&level, row, column);
            let tile = TerrainTile::new(sector, level, row, column).unwrap();
            list.add_tile(&tile);
        }

        assert_eq!(list.len(), 2);
        let sector = list.sector().unwrap();
        assert_eq!(sector, Sector::new(-90.0, 0.0, -180.0, -90.0));

        list.remove_all_tiles();
        assert!(list.is_empty());
        assert!(list.sector().is_none());
    }
}
