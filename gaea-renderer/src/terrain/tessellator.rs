use std::collections::HashMap;

use bevy::log::error;
use bevy::math::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

use gaea_scene::math::RADIANS_TO_DEGREES;
use gaea_scene::{
    Direction, Level, LevelSet, Line, MemoryCache, Position, Sector, Tile, TileKey,
};

use crate::draw_context::DrawContext;
use crate::error::TessellationError;
use crate::pick::{PickColor, PickedObject};
use crate::render_backend::TerrainRenderBackend;
use crate::terrain::{
    compute_tri_strip_intersections, SharedGeometry, Terrain, TerrainTile, TerrainTileList,
};

/// Tuning knobs for terrain tessellation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TessellatorConfig {
    /// Latitudinal extent of a level-zero tile, degrees.
    pub top_level_delta_latitude: f64,
    /// Longitudinal extent of a level-zero tile, degrees.
    pub top_level_delta_longitude: f64,
    pub num_levels: usize,
    /// Cells per tile in longitude.
    pub tile_width: usize,
    /// Cells per tile in latitude.
    pub tile_height: usize,
    /// Screen-space detail threshold; larger values select coarser tiles.
    pub detail_control: f64,
    /// Byte capacity of the subdivided-tile cache.
    pub tile_cache_capacity: usize,
    pub tile_cache_low_water: usize,
}

impl Default for TessellatorConfig {
    fn default() -> Self {
        Self {
            top_level_delta_latitude: 45.0,
            top_level_delta_longitude: 45.0,
            num_levels: 15,
            tile_width: 32,
            tile_height: 32,
            detail_control: 40.0,
            tile_cache_capacity: 5_000_000,
            tile_cache_low_water: 4_000_000,
        }
    }
}

/// The tiles registered at one grid corner during assembly, by which of the
/// registering tile's own corners touches the coordinate.
#[derive(Clone, Copy, Debug, Default)]
struct CornerTiles {
    sw: Option<usize>,
    nw: Option<usize>,
    se: Option<usize>,
    ne: Option<usize>,
}

/// Bit patterns key corner coordinates so exactly-equal sector boundaries
/// land in the same map slot.
fn corner_key(latitude: f64, longitude: f64) -> (u64, u64) {
    return (latitude.to_bits(), longitude.to_bits());
}

/// Selects the terrain tiles for a frame and renders them.
///
/// Each frame, the visible top-level tiles are subdivided until they meet
/// the screen-space detail threshold, neighbors differing by more than one
/// level are refined away, edge levels are recorded on every selected tile,
/// and stale vertex grids are regenerated. The result is memoized: a frame
/// with the same globe state, vertical exaggeration, elevations and
/// modelview-projection reuses the previous tessellation.
pub struct Tessellator {
    config: TessellatorConfig,
    levels: LevelSet,
    pub detail_control: f64,
    /// Draw grid edges and tile outlines after each tile, for debugging.
    pub show_wireframe: bool,
    pub show_tile_outline: bool,

    /// All tiles alive this session: top-level tiles plus every cached
    /// subdivision. Terrain and tile lists refer to tiles by key.
    tiles: HashMap<TileKey, TerrainTile>,
    /// Child keys per subdivided parent. Evictions drop the children from
    /// the tile arena when nothing else refers to them.
    tile_cache: MemoryCache<TileKey, [TileKey; 4]>,
    top_level_tiles: HashMap<String, Vec<TileKey>>,
    current_tiles: TerrainTileList,
    assembly: Vec<TileKey>,
    corners: HashMap<(u64, u64), CornerTiles>,
    shared_geometry: Option<SharedGeometry>,

    last_globe_state_key: Option<String>,
    last_vertical_exaggeration: Option<f64>,
    last_elevation_timestamp: Option<u64>,
    last_modelview_projection: Option<DMat4>,
    last_terrain: Option<Terrain>,

    scratch_elevations: Vec<f64>,
    scratch_prev_elevations: Vec<f64>,
    scratch_points: Vec<DVec3>,
}

impl Tessellator {
    pub fn new(config: TessellatorConfig) -> Result<Self, TessellationError> {
        if config.tile_width < 2 || config.tile_height < 2 {
            return Err(TessellationError::TileTooSmall {
                width: config.tile_width,
                height: config.tile_height,
            });
        }

        let levels = LevelSet::new(
            Sector::FULL_SPHERE,
            config.top_level_delta_latitude,
            config.top_level_delta_longitude,
            config.num_levels,
            config.tile_width,
            config.tile_height,
        )?;

        return Ok(Self {
            detail_control: config.detail_control,
            show_wireframe: false,
            show_tile_outline: false,
            tiles: HashMap::new(),
            tile_cache: MemoryCache::new(config.tile_cache_capacity, config.tile_cache_low_water),
            top_level_tiles: HashMap::new(),
            current_tiles: TerrainTileList::default(),
            assembly: Vec::new(),
            corners: HashMap::new(),
            shared_geometry: None,
            last_globe_state_key: None,
            last_vertical_exaggeration: None,
            last_elevation_timestamp: None,
            last_modelview_projection: None,
            last_terrain: None,
            scratch_elevations: Vec::new(),
            scratch_prev_elevations: Vec::new(),
            scratch_points: Vec::new(),
            config,
            levels,
        });
    }

    pub fn config(&self) -> &TessellatorConfig {
        return &self.config;
    }

    pub fn levels(&self) -> &LevelSet {
        return &self.levels;
    }

    pub fn tile(&self, key: &TileKey) -> Option<&TerrainTile> {
        return self.tiles.get(key);
    }

    /// Selects the terrain for the current frame. Returns `None` when no
    /// tile is visible. The selection is memoized on the globe state, the
    /// vertical exaggeration, the elevation timestamp and the
    /// modelview-projection matrix.
    pub fn tessellate(&mut self, dc: &DrawContext) -> Option<Terrain> {
        let elevation_timestamp = dc.globe.elevation_timestamp();
        let unchanged = self.last_globe_state_key.as_deref() == Some(dc.globe_state_key.as_str())
            && self.last_vertical_exaggeration == Some(dc.vertical_exaggeration)
            && self.last_elevation_timestamp == Some(elevation_timestamp)
            && self.last_modelview_projection == Some(dc.modelview_projection);
        if unchanged {
            return self.last_terrain.clone();
        }

        self.last_globe_state_key = Some(dc.globe_state_key.clone());
        self.last_vertical_exaggeration = Some(dc.vertical_exaggeration);
        self.last_elevation_timestamp = Some(elevation_timestamp);
        self.last_modelview_projection = Some(dc.modelview_projection);

        self.current_tiles.remove_all_tiles();
        self.assembly.clear();
        self.corners.clear();

        for key in self.ensure_top_level_tiles(dc) {
            if let Some(tile) = self.tiles.get_mut(&key) {
                tile.update(&dc.globe, dc.vertical_exaggeration);
            }
            if self.is_tile_visible(dc, &key) {
                self.add_tile_or_descendants(dc, key);
            }
        }

        self.refine_neighbors(dc);
        self.finish_tessellating(dc);

        self.last_terrain = if self.current_tiles.is_empty() {
            None
        } else {
            Some(Terrain::new(
                self.current_tiles.sector(),
                self.current_tiles.tile_keys().to_vec(),
                dc.vertical_exaggeration,
                format!("{} ve {}", dc.globe_state_key, dc.vertical_exaggeration),
            ))
        };
        return self.last_terrain.clone();
    }

    fn ensure_top_level_tiles(&mut self, dc: &DrawContext) -> Vec<TileKey> {
        if let Some(keys) = self.top_level_tiles.get(&dc.globe_state_key) {
            return keys.clone();
        }

        let mut tiles = Vec::new();
        if let Err(err) =
            Tile::create_tiles_for_level(&self.levels, self.levels.first_level(), &mut tiles)
        {
            error!("failed to create top level tiles: {err}");
            return Vec::new();
        }

        let keys: Vec<TileKey> = tiles.iter().map(|t| t.tile_key).collect();
        for tile in tiles {
            self.tiles
                .entry(tile.tile_key)
                .or_insert_with(|| TerrainTile::from_tile(tile));
        }
        self.top_level_tiles.insert(dc.globe_state_key.clone(), keys.clone());
        return keys;
    }

    fn is_tile_visible(&self, dc: &DrawContext, key: &TileKey) -> bool {
        let Some(tile) = self.tiles.get(key) else {
            return false;
        };

        if let Some(limits) = dc.globe.projection_limits() {
            if !tile.sector().overlaps(&limits) {
                return false;
            }
        }

        let frustum = if dc.picking_mode {
            dc.pick_frustum.as_ref().or(dc.frustum_in_model_coordinates.as_ref())
        } else {
            dc.frustum_in_model_coordinates.as_ref()
        };
        return match (tile.tile.extent.as_ref(), frustum) {
            (Some(extent), Some(frustum)) => extent.intersects_frustum(frustum),
            _ => false,
        };
    }

    fn tile_meets_render_criteria(&self, dc: &DrawContext, key: &TileKey) -> bool {
        let Some(tile) = self.tiles.get(key) else {
            return true;
        };

        // Polar tiles cover little screen area; relax the threshold so they
        // are not subdivided as aggressively.
        let mut detail_factor = self.detail_control;
        let sector = tile.sector();
        if sector.min_latitude >= 75.0 || sector.max_latitude <= -75.0 {
            detail_factor *= 2.0;
        }

        return self.levels.is_last_level(tile.level().level_number)
            || !tile.tile.must_subdivide(
                &dc.globe,
                &dc.eye_point,
                dc.pixel_size_factor,
                dc.pixel_size_offset,
                detail_factor,
            );
    }

    fn add_tile_or_descendants(&mut self, dc: &DrawContext, key: TileKey) {
        if self.tile_meets_render_criteria(dc, &key) {
            self.add_tile(&key);
            return;
        }
        self.add_tile_descendants(dc, &key);
    }

    fn add_tile_descendants(&mut self, dc: &DrawContext, key: &TileKey) {
        let Some(children) = self.subdivide_to_cache(key) else {
            return;
        };

        for child_key in children {
            let intersects = {
                let Some(child) = self.tiles.get_mut(&child_key) else {
                    continue;
                };
                child.update(&dc.globe, dc.vertical_exaggeration);
                self.levels.sector.intersects(child.sector())
            };
            if intersects && self.is_tile_visible(dc, &child_key) {
                self.add_tile_or_descendants(dc, child_key);
            }
        }
    }

    fn subdivide_to_cache(&mut self, key: &TileKey) -> Option<[TileKey; 4]> {
        if let Some(children) = self.tile_cache.entry_for_key(key) {
            return Some(*children);
        }

        let parent = self.tiles.get(key)?;
        let next_level = *self.levels.next_level(parent.level().level_number)?;
        let children = match parent.tile.subdivide(&next_level) {
            Ok(children) => children,
            Err(err) => {
                error!("failed to subdivide tile {key}: {err}");
                return None;
            }
        };

        let child_keys = [
            children[0].tile_key,
            children[1].tile_key,
            children[2].tile_key,
            children[3].tile_key,
        ];
        let size = 4 * children[0].size();
        for child in children {
            self.tiles
                .entry(child.tile_key)
                .or_insert_with(|| TerrainTile::from_tile(child));
        }

        for (_, evicted_children) in self.tile_cache.put_entry(*key, child_keys, size) {
            for evicted in evicted_children {
                let in_use = self.assembly.contains(&evicted)
                    || self.current_tiles.tile_keys().contains(&evicted)
                    || self.tile_cache.contains_key(&evicted);
                if !in_use {
                    self.tiles.remove(&evicted);
                }
            }
        }
        return Some(child_keys);
    }

    /// Adds a tile to the assembly and registers it under its four corner
    /// coordinates, recording which of its corners touches each.
    fn add_tile(&mut self, key: &TileKey) {
        let Some(tile) = self.tiles.get(key) else {
            return;
        };
        let sector = *tile.sector();

        let index = self.assembly.len();
        self.assembly.push(*key);

        self.corner_entry(sector.min_latitude, sector.min_longitude).sw = Some(index);
        self.corner_entry(sector.max_latitude, sector.min_longitude).nw = Some(index);
        self.corner_entry(sector.min_latitude, sector.max_longitude).se = Some(index);
        self.corner_entry(sector.max_latitude, sector.max_longitude).ne = Some(index);
    }

    fn corner_entry(&mut self, latitude: f64, longitude: f64) -> &mut CornerTiles {
        return self.corners.entry(corner_key(latitude, longitude)).or_default();
    }

    /// Re-subdivides tiles that are more than one level coarser than a tile
    /// sharing a corner with them, iterating until the whole assembly
    /// differs by at most one level across every edge.
    fn refine_neighbors(&mut self, dc: &DrawContext) {
        loop {
            let mut must_refine = vec![false; self.assembly.len()];
            let mut any_refined = false;

            for key in &self.assembly {
                let Some(tile) = self.tiles.get(key) else {
                    continue;
                };
                let level_number = tile.level().level_number;
                if level_number < 2 {
                    // Nothing can be more than one level coarser.
                    continue;
                }
                let sector = *tile.sector();

                // The tiles touching each of this tile's corners from the
                // other side. A neighbor more than one level coarser cannot
                // be stitched to this tile and must refine.
                let candidates = [
                    self.corner_neighbors(sector.max_latitude, sector.max_longitude, |c| [c.se, c.nw]),
                    self.corner_neighbors(sector.min_latitude, sector.max_longitude, |c| [c.ne, c.sw]),
                    self.corner_neighbors(sector.max_latitude, sector.min_longitude, |c| [c.ne, c.sw]),
                    self.corner_neighbors(sector.min_latitude, sector.min_longitude, |c| [c.se, c.nw]),
                ];
                for neighbor_index in candidates.into_iter().flatten().flatten() {
                    let Some(neighbor_key) = self.assembly.get(neighbor_index) else {
                        continue;
                    };
                    let Some(neighbor) = self.tiles.get(neighbor_key) else {
                        continue;
                    };
                    if neighbor.level().level_number + 1 < level_number {
                        must_refine[neighbor_index] = true;
                        any_refined = true;
                    }
                }
            }

            if !any_refined {
                return;
            }

            let previous = std::mem::take(&mut self.assembly);
            self.corners.clear();
            for (index, key) in previous.into_iter().enumerate() {
                if must_refine[index] {
                    self.add_tile_descendants(dc, &key);
                } else {
                    self.add_tile(&key);
                }
            }
        }
    }

    fn corner_neighbors(
        &self,
        latitude: f64,
        longitude: f64,
        pick: fn(&CornerTiles) -> [Option<usize>; 2],
    ) -> [Option<usize>; 2] {
        return self
            .corners
            .get(&corner_key(latitude, longitude))
            .map(pick)
            .unwrap_or([None, None]);
    }

    fn finish_tessellating(&mut self, dc: &DrawContext) {
        for index in 0..self.assembly.len() {
            self.set_neighbors(index);
            let key = self.assembly[index];
            self.regenerate_tile_geometry_if_needed(dc, &key);
            if let Some(tile) = self.tiles.get(&key) {
                self.current_tiles.add_tile(tile);
            }
        }
    }

    /// Records the level of the tile adjoining each edge of the assembly
    /// tile at `index`. An edge neighbor is found through the corner
    /// registry: the tile whose corner coincides with one of this tile's
    /// corners across the shared edge.
    fn set_neighbors(&mut self, index: usize) {
        let key = self.assembly[index];
        let sector = match self.tiles.get(&key) {
            Some(tile) => *tile.sector(),
            None => return,
        };

        let ne = self.corners.get(&corner_key(sector.max_latitude, sector.max_longitude)).copied();
        let se = self.corners.get(&corner_key(sector.min_latitude, sector.max_longitude)).copied();
        let nw = self.corners.get(&corner_key(sector.max_latitude, sector.min_longitude)).copied();
        let sw = self.corners.get(&corner_key(sector.min_latitude, sector.min_longitude)).copied();

        let north_index = ne.and_then(|c| c.se).or_else(|| nw.and_then(|c| c.sw));
        let south_index = se.and_then(|c| c.ne).or_else(|| sw.and_then(|c| c.nw));
        let east_index = ne.and_then(|c| c.nw).or_else(|| se.and_then(|c| c.sw));
        let west_index = nw.and_then(|c| c.ne).or_else(|| sw.and_then(|c| c.se));

        let level_at = |neighbor: Option<usize>| -> Option<Level> {
            let neighbor_key = self.assembly.get(neighbor?)?;
            return self.tiles.get(neighbor_key).map(|t| *t.level());
        };
        let north = level_at(north_index);
        let south = level_at(south_index);
        let east = level_at(east_index);
        let west = level_at(west_index);

        if let Some(tile) = self.tiles.get_mut(&key) {
            tile.set_neighbor_level(Direction::North, north);
            tile.set_neighbor_level(Direction::South, south);
            tile.set_neighbor_level(Direction::East, east);
            tile.set_neighbor_level(Direction::West, west);
        }
    }

    fn regenerate_tile_geometry_if_needed(&mut self, dc: &DrawContext, key: &TileKey) {
        let (state_key, needs_regeneration) = {
            let Some(tile) = self.tiles.get_mut(key) else {
                return;
            };
            let state_key = format!(
                "{} {} ve {}",
                dc.globe_state_key,
                tile.state_key(),
                dc.vertical_exaggeration
            );
            let needs = tile.points.is_empty()
                || tile.points_state_key.as_deref() != Some(state_key.as_str());
            (state_key, needs)
        };

        if needs_regeneration {
            self.regenerate_tile_geometry(dc, key);
            if let Some(tile) = self.tiles.get_mut(key) {
                tile.points_state_key = Some(state_key);
            }
        }
    }

    /// Rebuilds a tile's vertex grid from the globe's elevations, stitching
    /// edges shared with coarser neighbors so no gaps open between levels.
    fn regenerate_tile_geometry(&mut self, dc: &DrawContext, key: &TileKey) {
        let (sector, level, reference_point, coarser) = {
            let Some(tile) = self.tiles.get(key) else {
                return;
            };
            let coarser = [
                tile.neighbor_is_coarser(Direction::North),
                tile.neighbor_is_coarser(Direction::South),
                tile.neighbor_is_coarser(Direction::East),
                tile.neighbor_is_coarser(Direction::West),
            ];
            (*tile.sector(), *tile.level(), tile.tile.reference_point, coarser)
        };

        let num_lat = level.tile_height + 1;
        let num_lon = level.tile_width + 1;
        let num_points = num_lat * num_lon;

        self.scratch_elevations.clear();
        self.scratch_elevations.resize(num_points, 0.0);
        let target_resolution = coverage_target_resolution(level.texel_size);
        if let Err(err) = dc.globe.elevations_for_grid(
            &sector,
            num_lat,
            num_lon,
            target_resolution,
            &mut self.scratch_elevations,
        ) {
            error!("failed to retrieve elevations for tile {key}: {err}");
            return;
        }

        if coarser.iter().any(|&c| c) {
            self.align_neighbor_elevations(dc, &sector, &level, &coarser, num_lat, num_lon);
        }

        if dc.vertical_exaggeration != 1.0 {
            for elevation in &mut self.scratch_elevations[..num_points] {
                *elevation *= dc.vertical_exaggeration;
            }
        }

        self.scratch_points.clear();
        self.scratch_points.resize(num_points, DVec3::ZERO);
        if let Err(err) = dc.globe.compute_points_for_grid(
            &sector,
            num_lat,
            num_lon,
            &self.scratch_elevations,
            &reference_point,
            &mut self.scratch_points,
        ) {
            error!("failed to compute points for tile {key}: {err}");
            return;
        }

        if let Some(tile) = self.tiles.get_mut(key) {
            tile.points.clear();
            tile.points.reserve(3 * num_points);
            for point in &self.scratch_points {
                tile.points.push(point.x as f32);
                tile.points.push(point.y as f32);
                tile.points.push(point.z as f32);
            }
            tile.transformation_matrix = DMat4::from_translation(reference_point);
        }
    }

    /// Overwrites border elevations along edges shared with a coarser
    /// neighbor: even border samples copy the coarser level's sample, odd
    /// samples take the midpoint of the two adjacent coarser samples. The
    /// stitched edge then matches the neighbor's geometry exactly.
    fn align_neighbor_elevations(
        &mut self,
        dc: &DrawContext,
        sector: &Sector,
        level: &Level,
        coarser: &[bool; 4],
        num_lat: usize,
        num_lon: usize,
    ) {
        let Some(prev_level) = self.levels.previous_level(level.level_number).copied() else {
            return;
        };

        let prev_num_lat = num_lat / 2 + 1;
        let prev_num_lon = num_lon / 2 + 1;
        self.scratch_prev_elevations.clear();
        self.scratch_prev_elevations.resize(prev_num_lat * prev_num_lon, 0.0);
        let prev_target_resolution = coverage_target_resolution(prev_level.texel_size);
        if let Err(err) = dc.globe.elevations_for_grid(
            sector,
            prev_num_lat,
            prev_num_lon,
            prev_target_resolution,
            &mut self.scratch_prev_elevations,
        ) {
            error!("failed to retrieve coarse elevations for stitching: {err}");
            return;
        }

        let elevations = &mut self.scratch_elevations;
        let prev = &self.scratch_prev_elevations;

        if coarser[Direction::North.index()] {
            let row = (num_lat - 1) * num_lon;
            let prev_row = (prev_num_lat - 1) * prev_num_lon;
            for i in 0..num_lon {
                let p = prev_row + i / 2;
                elevations[row + i] = if i % 2 == 0 {
                    prev[p]
                } else {
                    0.5 * (prev[p] + prev[p + 1])
                };
            }
        }
        if coarser[Direction::South.index()] {
            for i in 0..num_lon {
                let p = i / 2;
                elevations[i] = if i % 2 == 0 {
                    prev[p]
                } else {
                    0.5 * (prev[p] + prev[p + 1])
                };
            }
        }
        if coarser[Direction::East.index()] {
            for j in 0..num_lat {
                let p = (j / 2) * prev_num_lon + prev_num_lon - 1;
                elevations[j * num_lon + num_lon - 1] = if j % 2 == 0 {
                    prev[p]
                } else {
                    0.5 * (prev[p] + prev[p + prev_num_lon])
                };
            }
        }
        if coarser[Direction::West.index()] {
            for j in 0..num_lat {
                let p = (j / 2) * prev_num_lon;
                elevations[j * num_lon] = if j % 2 == 0 {
                    prev[p]
                } else {
                    0.5 * (prev[p] + prev[p + prev_num_lon])
                };
            }
        }
    }

    fn ensure_shared_geometry(&mut self) {
        if self.shared_geometry.is_none() {
            self.shared_geometry = Some(SharedGeometry::new(
                self.config.tile_width,
                self.config.tile_height,
            ));
        }
    }

    /// Prepares the backend for tile rendering: uploads the shared texture
    /// coordinates and index buffer if they are not already resident.
    pub fn begin_rendering(&mut self, _dc: &DrawContext, backend: &mut dyn TerrainRenderBackend) {
        self.ensure_shared_geometry();
        if let Some(geometry) = self.shared_geometry.as_ref() {
            backend.cache_shared_geometry(&geometry.tex_coords, &geometry.indices);
        }
    }

    pub fn end_rendering(&mut self, _dc: &DrawContext, _backend: &mut dyn TerrainRenderBackend) {}

    /// Binds a tile's vertex buffer, uploading or rewriting it when the
    /// points have changed since the buffer was last filled.
    pub fn begin_rendering_tile(
        &mut self,
        dc: &mut DrawContext,
        key: &TileKey,
        backend: &mut dyn TerrainRenderBackend,
    ) {
        let Some(tile) = self.tiles.get_mut(key) else {
            return;
        };

        let modelview_projection = dc.modelview_projection * tile.transformation_matrix;
        backend.set_tile_transform(&modelview_projection);

        let vbo_key = format!("{} tile {key}", dc.globe_state_key);
        if !backend.has_tile_buffer(&vbo_key) {
            backend.upload_tile_points(&vbo_key, &tile.points);
            tile.points_vbo_state_key = tile.points_state_key.clone();
            dc.frame_statistics.increment_vbo_load_count(1);
        } else if tile.points_vbo_state_key != tile.points_state_key {
            backend.update_tile_points(&vbo_key, &tile.points);
            tile.points_vbo_state_key = tile.points_state_key.clone();
        } else {
            backend.bind_tile_points(&vbo_key);
        }
    }

    /// Draws a tile: the interior strip, then each border strip at half
    /// resolution when the neighbor on that edge is coarser.
    pub fn render_tile(
        &mut self,
        dc: &mut DrawContext,
        key: &TileKey,
        backend: &mut dyn TerrainRenderBackend,
    ) {
        self.ensure_shared_geometry();
        let (base, borders, lores_borders, wireframe, outline) =
            match self.shared_geometry.as_ref() {
                Some(g) => (g.base, g.borders, g.lores_borders, g.wireframe, g.outline),
                None => return,
            };
        let Some(tile) = self.tiles.get(key) else {
            return;
        };

        backend.draw_triangle_strip(base.first, base.count);
        for direction in Direction::ALL {
            let range = if tile.neighbor_is_coarser(direction) {
                lores_borders[direction.index()]
            } else {
                borders[direction.index()]
            };
            backend.draw_triangle_strip(range.first, range.count);
        }

        if !dc.picking_mode {
            if self.show_wireframe {
                backend.draw_lines(wireframe.first, wireframe.count);
            }
            if self.show_tile_outline {
                backend.draw_line_loop(outline.first, outline.count);
            }
        }

        dc.frame_statistics.increment_rendered_tile_count(1);
    }

    pub fn end_rendering_tile(
        &mut self,
        _dc: &DrawContext,
        _key: &TileKey,
        _backend: &mut dyn TerrainRenderBackend,
    ) {
    }

    /// Picks the terrain tiles intersecting the pick frustum: draws them in
    /// a unique pick color and, for point picks, records the nearest
    /// intersection of the pick ray with their geometry.
    pub fn pick(
        &mut self,
        dc: &mut DrawContext,
        tile_keys: &[TileKey],
        user_object: &str,
        backend: &mut dyn TerrainRenderBackend,
    ) {
        let Some(pick_frustum) = dc.pick_frustum.clone() else {
            return;
        };

        let pickable: Vec<TileKey> = tile_keys
            .iter()
            .copied()
            .filter(|key| {
                self.tiles
                    .get(key)
                    .and_then(|tile| tile.tile.extent.as_ref())
                    .map(|extent| extent.intersects_frustum(&pick_frustum))
                    .unwrap_or(false)
            })
            .collect();
        if pickable.is_empty() {
            return;
        }

        let mut color = None;
        if !dc.pick_terrain_only {
            let unique = dc.unique_pick_color();
            color = Some(unique);
            self.draw_pick_tiles(dc, &pickable, unique, backend);
        }

        if !dc.region_picking {
            let Some(ray) = dc.pick_ray.clone() else {
                return;
            };
            if let Some(point) = self.compute_nearest_intersection(&ray, &pickable) {
                let surface =
                    dc.globe.compute_position_from_point(point.x, point.y, point.z);
                let altitude = dc
                    .globe
                    .elevation_at_location(surface.latitude, surface.longitude)
                    * dc.vertical_exaggeration;
                let position = Position::new(surface.latitude, surface.longitude, altitude);
                dc.add_picked_object(PickedObject::terrain(color, user_object, position));
            }
        }
    }

    fn draw_pick_tiles(
        &mut self,
        dc: &mut DrawContext,
        keys: &[TileKey],
        color: PickColor,
        backend: &mut dyn TerrainRenderBackend,
    ) {
        backend.set_pick_color(color);
        self.begin_rendering(dc, backend);
        for key in keys {
            self.begin_rendering_tile(dc, key, backend);
            self.render_tile(dc, key, backend);
            self.end_rendering_tile(dc, key, backend);
        }
        self.end_rendering(dc, backend);
    }

    /// Appends the intersections of a line with a tile's rendered geometry,
    /// in model coordinates. The same strips are tested that `render_tile`
    /// draws, so picking agrees with what is on screen.
    pub fn compute_intersections(
        &mut self,
        line: &Line,
        key: &TileKey,
        results: &mut Vec<DVec3>,
    ) {
        self.ensure_shared_geometry();
        let Some(geometry) = self.shared_geometry.as_ref() else {
            return;
        };
        let Some(tile) = self.tiles.get(key) else {
            return;
        };
        if tile.points.is_empty() {
            return;
        }

        let local = Line::new(line.origin - tile.tile.reference_point, line.direction);
        let first_result = results.len();

        compute_tri_strip_intersections(
            &local,
            &tile.points,
            geometry.indices_for(&geometry.base),
            results,
        );
        for direction in [
            Direction::South,
            Direction::West,
            Direction::East,
            Direction::North,
        ] {
            let range = if tile.neighbor_is_coarser(direction) {
                &geometry.lores_borders[direction.index()]
            } else {
                &geometry.borders[direction.index()]
            };
            compute_tri_strip_intersections(
                &local,
                &tile.points,
                geometry.indices_for(range),
                results,
            );
        }

        for hit in &mut results[first_result..] {
            *hit += tile.tile.reference_point;
        }
    }

    /// The intersection of the line with the given tiles nearest the line's
    /// origin.
    pub fn compute_nearest_intersection(
        &mut self,
        line: &Line,
        tile_keys: &[TileKey],
    ) -> Option<DVec3> {
        let mut results = Vec::new();
        for key in tile_keys {
            self.compute_intersections(line, key, &mut results);
        }
        return results.into_iter().min_by(|a, b| {
            a.distance_squared(line.origin)
                .total_cmp(&b.distance_squared(line.origin))
        });
    }
}

/// The elevation resolution requested for a tile, degrees: an eighth of the
/// tile's texel size.
fn coverage_target_resolution(texel_size: f64) -> f64 {
    return texel_size / 8.0 * RADIANS_TO_DEGREES;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_backend::NoopRenderBackend;
    use crate::world_window::WorldWindow;
    use gaea_scene::math::Viewport;
    use gaea_scene::{ElevationModel, Globe};

    /// Elevations that vary with the sampled resolution, the way a tiled
    /// model serves differently filtered data per level.
    struct ResolutionDependentElevations;

    fn terraced_sample(latitude: f64, longitude: f64, resolution: f64) -> f64 {
        return resolution * 2.0e4
            + 1.0e3 * (latitude * 211.0).to_radians().sin()
            + 1.0e3 * (longitude * 173.0).to_radians().cos();
    }

    impl ElevationModel for ResolutionDependentElevations {
        fn timestamp(&self) -> u64 {
            return 1;
        }

        fn min_elevation(&self) -> f64 {
            return -10_000.0;
        }

        fn max_elevation(&self) -> f64 {
            return 10_000.0;
        }

        fn min_and_max_elevations_for_sector(&self, _sector: &Sector) -> (f64, f64) {
            return (-10_000.0, 10_000.0);
        }

        fn elevation_at_location(&self, latitude: f64, longitude: f64) -> f64 {
            return terraced_sample(latitude, longitude, 0.0);
        }

        fn elevations_for_grid(
            &self,
            sector: &Sector,
            num_lat: usize,
            num_lon: usize,
            target_resolution: f64,
            result: &mut [f64],
        ) -> f64 {
            let mut index = 0;
            for j in 0..num_lat {
                let t = if num_lat > 1 {
                    j as f64 / (num_lat - 1) as f64
                } else {
                    0.0
                };
                let latitude =
                    sector.min_latitude + t * (sector.max_latitude - sector.min_latitude);
                for i in 0..num_lon {
                    let s = if num_lon > 1 {
                        i as f64 / (num_lon - 1) as f64
                    } else {
                        0.0
                    };
                    let longitude =
                        sector.min_longitude + s * (sector.max_longitude - sector.min_longitude);
                    result[index] = terraced_sample(latitude, longitude, target_resolution);
                    index += 1;
                }
            }
            return target_resolution;
        }
    }

    fn opposite(direction: Direction) -> Direction {
        return match direction {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        };
    }

    /// A tile's edge vertices in model coordinates, ordered south to north
    /// or west to east.
    fn edge_points(tile: &TerrainTile, direction: Direction) -> Vec<DVec3> {
        let num_lon = tile.level().tile_width + 1;
        let num_lat = tile.level().tile_height + 1;
        let indices: Vec<usize> = match direction {
            Direction::North => ((num_lat - 1) * num_lon..num_lat * num_lon).collect(),
            Direction::South => (0..num_lon).collect(),
            Direction::East => (0..num_lat).map(|j| j * num_lon + num_lon - 1).collect(),
            Direction::West => (0..num_lat).map(|j| j * num_lon).collect(),
        };
        return indices
            .into_iter()
            .map(|index| {
                DVec3::new(
                    tile.points[3 * index] as f64,
                    tile.points[3 * index + 1] as f64,
                    tile.points[3 * index + 2] as f64,
                ) + tile.tile.reference_point
            })
            .collect();
    }

    /// The selected tile one level coarser that adjoins `tile` on the given
    /// edge.
    fn edge_neighbor<'a>(
        tessellator: &'a Tessellator,
        keys: &[TileKey],
        tile: &TerrainTile,
        direction: Direction,
    ) -> Option<&'a TerrainTile> {
        let sector = *tile.sector();
        let level = tile.level().level_number;
        return keys.iter().find_map(|key| {
            let candidate = tessellator.tile(key)?;
            if candidate.level().level_number + 1 != level {
                return None;
            }
            let c = *candidate.sector();
            let adjoins = match direction {
                Direction::North => (c.min_latitude - sector.max_latitude).abs() < 1e-9,
                Direction::South => (c.max_latitude - sector.min_latitude).abs() < 1e-9,
                Direction::East => (c.min_longitude - sector.max_longitude).abs() < 1e-9,
                Direction::West => (c.max_longitude - sector.min_longitude).abs() < 1e-9,
            };
            let spans = match direction {
                Direction::North | Direction::South => {
                    c.min_longitude <= sector.min_longitude + 1e-9
                        && c.max_longitude >= sector.max_longitude - 1e-9
                }
                Direction::East | Direction::West => {
                    c.min_latitude <= sector.min_latitude + 1e-9
                        && c.max_latitude >= sector.max_latitude - 1e-9
                }
            };
            if adjoins && spans {
                return Some(candidate);
            }
            return None;
        });
    }

    #[test]
    fn stitched_borders_match_the_coarser_neighbor_geometry() {
        let globe = Globe::new(Box::new(ResolutionDependentElevations));
        let mut window =
            WorldWindow::new(globe, Viewport::new(0.0, 0.0, 800.0, 600.0)).unwrap();
        window.navigator.range = 1_000_000.0;
        let mut backend = NoopRenderBackend::new();
        window.render(&mut backend);

        let keys = window
            .draw_context
            .terrain
            .as_ref()
            .map(|t| t.tile_keys.clone())
            .unwrap_or_default();
        assert!(!keys.is_empty());

        let altitude = |p: &DVec3| {
            return window
                .globe()
                .compute_position_from_point(p.x, p.y, p.z)
                .altitude;
        };

        let mut stitched_edges = 0;
        for key in &keys {
            let tile = window.tessellator.tile(key).unwrap();
            for direction in Direction::ALL {
                if !tile.neighbor_is_coarser(direction) {
                    continue;
                }
                let neighbor = edge_neighbor(&window.tessellator, &keys, tile, direction)
                    .unwrap_or_else(|| panic!("no {direction:?} neighbor for tile {key}"));
                let edge = edge_points(tile, direction);
                let neighbor_edge = edge_points(neighbor, opposite(direction));
                stitched_edges += 1;

                // Corner vertices belong to two edges and may follow the
                // perpendicular edge's neighbor; test the interior only.
                for i in 2..edge.len() - 2 {
                    if i % 2 == 0 {
                        // Even vertices carry the coarser level's samples, so
                        // each one lands on a vertex of the neighbor's edge.
                        let nearest = neighbor_edge
                            .iter()
                            .map(|p| p.distance(edge[i]))
                            .fold(f64::INFINITY, f64::min);
                        assert!(
                            nearest < 3.0,
                            "{direction:?} border vertex {i} of tile {key} is \
                             {nearest:.1} m off the coarser edge"
                        );
                    } else {
                        // Odd vertices sit midway between the coarser samples
                        // on either side.
                        let mean = 0.5 * (altitude(&edge[i - 1]) + altitude(&edge[i + 1]));
                        let error = (altitude(&edge[i]) - mean).abs();
                        assert!(
                            error < 3.0,
                            "{direction:?} border vertex {i} of tile {key} is \
                             {error:.1} m off the midpoint elevation"
                        );
                    }
                }
            }
        }
        assert!(
            stitched_edges > 0,
            "the view selected no tiles with coarser neighbors"
        );
    }

    #[test]
    fn rejects_degenerate_tile_dimensions() {
        let config = TessellatorConfig {
            tile_width: 1,
            ..TessellatorConfig::default()
        };
        assert!(matches!(
            Tessellator::new(config),
            Err(TessellationError::TileTooSmall { width: 1, .. })
        ));
    }

    #[test]
    fn corner_keys_distinguish_signed_zero_free_coordinates() {
        assert_eq!(corner_key(45.0, -90.0), corner_key(45.0, -90.0));
        assert_ne!(corner_key(45.0, -90.0), corner_key(45.0, 90.0));
    }

    #[test]
    fn partial_config_json_falls_back_to_defaults() {
        let config: TessellatorConfig =
            serde_json::from_str(r#"{"num_levels": 5, "detail_control": 80.0}"#).unwrap();
        assert_eq!(config.num_levels, 5);
        assert_eq!(config.detail_control, 80.0);
        assert_eq!(config.tile_width, TessellatorConfig::default().tile_width);
    }

    #[test]
    fn default_config_builds_a_full_sphere_level_set() {
        let tessellator = Tessellator::new(TessellatorConfig::default()).unwrap();
        assert_eq!(tessellator.levels().sector, Sector::FULL_SPHERE);
        assert_eq!(tessellator.levels().first_level().level_number, 0);
    }
}
