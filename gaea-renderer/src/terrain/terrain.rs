use bevy::math::DVec3;

use gaea_scene::{AltitudeMode, Globe, Sector, TileKey};

use crate::draw_context::DrawContext;
use crate::render_backend::TerrainRenderBackend;
use crate::terrain::Tessellator;

/// The terrain selected for one frame: the keys of the selected tiles and
/// the sector they cover. Tile data stays with the tessellator; a terrain is
/// a cheap handle that can be cloned into the draw context.
#[derive(Clone, Debug)]
pub struct Terrain {
    pub sector: Option<Sector>,
    pub tile_keys: Vec<TileKey>,
    pub vertical_exaggeration: f64,
    /// Identifies the globe state and exaggeration this terrain was built
    /// from.
    pub state_key: String,
}

impl Terrain {
    pub fn new(
        sector: Option<Sector>,
        tile_keys: Vec<TileKey>,
        vertical_exaggeration: f64,
        state_key: String,
    ) -> Self {
        Self {
            sector,
            tile_keys,
            vertical_exaggeration,
            state_key,
        }
    }

    pub fn len(&self) -> usize {
        return self.tile_keys.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.tile_keys.is_empty();
    }

    /// The point on the terrain surface beneath the location, displaced
    /// `offset` meters along the surface normal. Falls back to the globe's
    /// elevations when no terrain tile covers the location.
    pub fn surface_point(
        &self,
        globe: &Globe,
        tessellator: &Tessellator,
        latitude: f64,
        longitude: f64,
        offset: f64,
    ) -> DVec3 {
        for key in &self.tile_keys {
            let Some(tile) = tessellator.tile(key) else {
                continue;
            };
            if tile.points.is_empty() || !tile.sector().contains(latitude, longitude) {
                continue;
            }

            let mut point = tile.surface_point(latitude, longitude);
            if offset != 0.0 {
                point += globe.surface_normal_at_location(latitude, longitude) * offset;
            }
            return point;
        }

        let height =
            offset + globe.elevation_at_location(latitude, longitude) * self.vertical_exaggeration;
        return globe.compute_point_from_position(latitude, longitude, height);
    }

    /// Resolves a surface point for an altitude and its interpretation.
    pub fn surface_point_for_mode(
        &self,
        globe: &Globe,
        tessellator: &Tessellator,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        mode: AltitudeMode,
    ) -> DVec3 {
        return match mode {
            AltitudeMode::ClampToGround => {
                self.surface_point(globe, tessellator, latitude, longitude, 0.0)
            }
            AltitudeMode::RelativeToGround => {
                self.surface_point(globe, tessellator, latitude, longitude, altitude)
            }
            AltitudeMode::Absolute => globe.compute_point_from_position(
                latitude,
                longitude,
                altitude * self.vertical_exaggeration,
            ),
        };
    }

    pub fn begin_rendering(
        &self,
        dc: &DrawContext,
        tessellator: &mut Tessellator,
        backend: &mut dyn TerrainRenderBackend,
    ) {
        tessellator.begin_rendering(dc, backend);
    }

    pub fn end_rendering(
        &self,
        dc: &DrawContext,
        tessellator: &mut Tessellator,
        backend: &mut dyn TerrainRenderBackend,
    ) {
        tessellator.end_rendering(dc, backend);
    }

    pub fn begin_rendering_tile(
        &self,
        dc: &mut DrawContext,
        tessellator: &mut Tessellator,
        tile_key: &TileKey,
        backend: &mut dyn TerrainRenderBackend,
    ) {
        tessellator.begin_rendering_tile(dc, tile_key, backend);
    }

    pub fn render_tile(
        &self,
        dc: &mut DrawContext,
        tessellator: &mut Tessellator,
        tile_key: &TileKey,
        backend: &mut dyn TerrainRenderBackend,
    ) {
        tessellator.render_tile(dc, tile_key, backend);
    }

    pub fn end_rendering_tile(
        &self,
        dc: &DrawContext,
        tessellator: &mut Tessellator,
        tile_key: &TileKey,
        backend: &mut dyn TerrainRenderBackend,
    ) {
        tessellator.end_rendering_tile(dc, tile_key, backend);
    }

    /// Renders every tile of this terrain.
    pub fn render(
        &self,
        dc: &mut DrawContext,
        tessellator: &mut Tessellator,
        backend: &mut dyn TerrainRenderBackend,
    ) {
        self.begin_rendering(dc, tessellator, backend);
        for key in &self.tile_keys {
            self.begin_rendering_tile(dc, tessellator, key, backend);
            self.render_tile(dc, tessellator, key, backend);
            self.end_rendering_tile(dc, tessellator, key, backend);
        }
        self.end_rendering(dc, tessellator, backend);
    }

    /// Picks this terrain's tiles against the draw context's pick frustum
    /// and ray.
    pub fn pick(
        &self,
        dc: &mut DrawContext,
        tessellator: &mut Tessellator,
        backend: &mut dyn TerrainRenderBackend,
    ) {
        tessellator.pick(dc, &self.tile_keys, "terrain", backend);
    }
}
