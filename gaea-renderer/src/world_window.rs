use std::time::Instant;

use bevy::log::{error, warn};
use bevy::math::{DMat4, DVec2, DVec3, DVec4};
use serde::{Deserialize, Serialize};

use gaea_scene::math::{
    horizon_distance_for_globe_radius, look_at_modelview, perspective_near_distance,
    perspective_near_distance_for_far_distance, perspective_projection, Matrix4Ext, Viewport,
};
use gaea_scene::{Frustum, GeomError, Globe, Line, Position};

use crate::draw_context::{DrawContext, Layer};
use crate::error::TessellationError;
use crate::navigator::LookAtNavigator;
use crate::pick::{PickedObjectList, Rectangle};
use crate::render_backend::TerrainRenderBackend;
use crate::terrain::{Terrain, Tessellator, TessellatorConfig};

/// The eye altitude, meters, below which the atmosphere contributes to the
/// far clip distance.
const ATMOSPHERE_ALTITUDE: f64 = 160_000.0;

/// Construction-time settings for a world window.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldWindowConfig {
    /// Depth buffer resolution, bits.
    pub depth_bits: u32,
    /// The meters of depth resolution wanted at the far clip plane.
    pub far_resolution: f64,
    pub vertical_exaggeration: f64,
    pub surface_opacity: f64,
    /// When true, picks report every object at the pick point, not just the
    /// nearest.
    pub deep_picking: bool,
    pub tessellator: TessellatorConfig,
}

impl Default for WorldWindowConfig {
    fn default() -> Self {
        Self {
            depth_bits: 24,
            far_resolution: 10.0,
            vertical_exaggeration: 1.0,
            surface_opacity: 1.0,
            deep_picking: false,
            tessellator: TessellatorConfig::default(),
        }
    }
}

/// A view of a globe: owns the draw context, the tessellator, the navigator
/// and the layer list, and drives frame drawing and picking against a
/// render backend.
pub struct WorldWindow {
    pub draw_context: DrawContext,
    pub tessellator: Tessellator,
    pub navigator: LookAtNavigator,
    pub layers: Vec<Box<dyn Layer>>,
    pub viewport: Viewport,
    pub depth_bits: u32,
    pub far_resolution: f64,
    pub vertical_exaggeration: f64,
    pub surface_opacity: f64,
    pub deep_picking: bool,

    redraw_requested: bool,
    is_context_lost: bool,
    defer_ordered_rendering: bool,
    terrain_center: Option<Terrain>,
    terrain_right: Option<Terrain>,
    terrain_left: Option<Terrain>,
}

impl WorldWindow {
    pub fn new(globe: Globe, viewport: Viewport) -> Result<Self, TessellationError> {
        return Self::with_config(globe, viewport, WorldWindowConfig::default());
    }

    pub fn with_config(
        globe: Globe,
        viewport: Viewport,
        config: WorldWindowConfig,
    ) -> Result<Self, TessellationError> {
        let tessellator = Tessellator::new(config.tessellator)?;
        return Ok(Self {
            draw_context: DrawContext::new(globe),
            tessellator,
            navigator: LookAtNavigator::default(),
            layers: Vec::new(),
            viewport,
            depth_bits: config.depth_bits,
            far_resolution: config.far_resolution,
            vertical_exaggeration: config.vertical_exaggeration,
            surface_opacity: config.surface_opacity,
            deep_picking: config.deep_picking,
            redraw_requested: true,
            is_context_lost: false,
            defer_ordered_rendering: false,
            terrain_center: None,
            terrain_right: None,
            terrain_left: None,
        });
    }

    pub fn globe(&self) -> &Globe {
        return &self.draw_context.globe;
    }

    pub fn globe_mut(&mut self) -> &mut Globe {
        return &mut self.draw_context.globe;
    }

    pub fn add_layer(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer);
        self.request_redraw();
    }

    pub fn request_redraw(&mut self) {
        self.redraw_requested = true;
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if self.viewport != viewport {
            self.viewport = viewport;
            self.request_redraw();
        }
    }

    pub fn is_context_lost(&self) -> bool {
        return self.is_context_lost;
    }

    /// Notifies the window that its rendering context was lost. Cached GPU
    /// state is dropped; frames are skipped until the context is restored.
    pub fn context_lost<B: TerrainRenderBackend>(&mut self, backend: &mut B) {
        self.is_context_lost = true;
        self.draw_context.context_lost();
        backend.clear_gpu_state();
    }

    pub fn context_restored(&mut self) {
        self.is_context_lost = false;
        self.request_redraw();
    }

    /// Draws a frame when one has been requested since the last draw.
    pub fn redraw_if_needed<B: TerrainRenderBackend>(&mut self, backend: &mut B) {
        if !self.redraw_requested || self.is_context_lost {
            return;
        }
        self.redraw_requested = false;

        self.reset_draw_context();
        self.draw_frame(backend);

        // A renderable may request another frame while drawing this one.
        if self.draw_context.redraw_requested {
            self.redraw_requested = true;
        }
    }

    /// Draws a frame unconditionally.
    pub fn render<B: TerrainRenderBackend>(&mut self, backend: &mut B) {
        if self.is_context_lost {
            return;
        }
        self.redraw_requested = false;
        self.reset_draw_context();
        self.draw_frame(backend);
    }

    /// Picks the objects at a screen point, nearest marked on top. The point
    /// is in screen coordinates, origin at the upper left.
    pub fn pick<B: TerrainRenderBackend>(
        &mut self,
        pick_point: DVec2,
        backend: &mut B,
    ) -> PickedObjectList {
        if self.is_context_lost {
            return PickedObjectList::default();
        }

        self.reset_draw_context();
        self.draw_context.picking_mode = true;
        self.draw_context.pick_point = Some(pick_point);
        self.draw_context.pick_ray = self.ray_through_screen_point(&pick_point);
        self.draw_frame(backend);
        return self.draw_context.objects_at_pick_point.clone();
    }

    /// Picks only the terrain at a screen point.
    pub fn pick_terrain<B: TerrainRenderBackend>(
        &mut self,
        pick_point: DVec2,
        backend: &mut B,
    ) -> PickedObjectList {
        if self.is_context_lost {
            return PickedObjectList::default();
        }

        self.reset_draw_context();
        self.draw_context.picking_mode = true;
        self.draw_context.pick_terrain_only = true;
        self.draw_context.pick_point = Some(pick_point);
        self.draw_context.pick_ray = self.ray_through_screen_point(&pick_point);
        self.draw_frame(backend);
        return self.draw_context.objects_at_pick_point.clone();
    }

    /// Picks all shapes intersecting a screen rectangle. The rectangle is in
    /// screen coordinates, origin at the upper left.
    pub fn pick_shapes_in_region<B: TerrainRenderBackend>(
        &mut self,
        rectangle: Rectangle,
        backend: &mut B,
    ) -> PickedObjectList {
        if self.is_context_lost {
            return PickedObjectList::default();
        }

        self.reset_draw_context();
        self.draw_context.picking_mode = true;
        self.draw_context.region_picking = true;
        self.draw_context.pick_rectangle = Some(Rectangle::new(
            rectangle.x,
            self.viewport.height - (rectangle.y + rectangle.height),
            rectangle.width,
            rectangle.height,
        ));
        self.draw_frame(backend);
        return self.draw_context.objects_at_pick_point.clone();
    }

    /// The ray from the eye through a screen point, in model coordinates.
    /// `None` when the point cannot be unprojected.
    pub fn ray_through_screen_point(&self, point: &DVec2) -> Option<Line> {
        let viewport_point = DVec3::new(point.x, self.viewport.height - point.y, 0.0);
        let inverse = self.draw_context.modelview_projection.try_invert_general()?;

        let near = inverse.unproject(&viewport_point, &self.viewport)?;
        let far = inverse.unproject(
            &DVec3::new(viewport_point.x, viewport_point.y, 1.0),
            &self.viewport,
        )?;

        let origin = self.draw_context.modelview.extract_eye_point();
        return Some(Line::new(origin, (far - near).normalize()));
    }

    /// The modelview and projection matrices for the navigator's view. The
    /// far clip distance reaches the horizon plus the atmosphere's horizon;
    /// the near distance is as large as the depth resolution allows without
    /// clipping the surface.
    pub fn compute_viewing_transform(&self) -> Result<(DMat4, DMat4), GeomError> {
        let globe = &self.draw_context.globe;
        let look_at = Position::new(
            self.navigator.look_at_location.latitude,
            self.navigator.look_at_location.longitude,
            0.0,
        );
        let modelview = look_at_modelview(
            &look_at,
            self.navigator.range,
            self.navigator.heading,
            self.navigator.tilt,
            self.navigator.roll,
            globe,
        )?;

        let eye_point = modelview.extract_eye_point();
        let eye = globe.compute_position_from_point(eye_point.x, eye_point.y, eye_point.z);
        let globe_radius = globe.equatorial_radius.max(globe.polar_radius);
        let mut far = horizon_distance_for_globe_radius(globe_radius, eye.altitude)
            + horizon_distance_for_globe_radius(globe_radius, ATMOSPHERE_ALTITUDE);
        if far < 1.0e3 {
            far = 1.0e3;
        }

        let mut near =
            perspective_near_distance_for_far_distance(far, self.far_resolution, self.depth_bits);
        // Keep the near plane from crossing the terrain beneath the eye.
        let distance_to_surface = eye.altitude
            - globe.elevation_at_location(eye.latitude, eye.longitude) * self.vertical_exaggeration;
        if distance_to_surface > 0.0 {
            let max_near = perspective_near_distance(
                self.viewport.width,
                self.viewport.height,
                distance_to_surface,
            );
            near = near.min(max_near);
        }
        if near < 1.0 {
            near = 1.0;
        }

        let projection =
            perspective_projection(self.viewport.width, self.viewport.height, near, far)?;
        return Ok((modelview, projection));
    }

    /// The linear model of pixel size against eye distance implied by a
    /// projection: pixel size is `factor * distance + offset`.
    fn compute_pixel_metrics(&self, projection: &DMat4) -> (f64, f64) {
        let Some(inverse) = projection.try_invert_general() else {
            warn!("projection matrix is not invertible");
            return (0.0, 0.0);
        };
        let transform = |x: f64, y: f64, z: f64| -> DVec3 {
            let v = inverse * DVec4::new(x, y, z, 1.0);
            return v.truncate() / v.w;
        };

        let near_bottom_left = transform(-1.0, -1.0, -1.0);
        let near_top_right = transform(1.0, 1.0, -1.0);
        let far_bottom_left = transform(-1.0, -1.0, 1.0);
        let far_top_right = transform(1.0, 1.0, 1.0);

        let near_width = (near_top_right.x - near_bottom_left.x).abs();
        let far_width = (far_top_right.x - far_bottom_left.x).abs();
        let near_distance = -near_bottom_left.z;
        let far_distance = -far_bottom_left.z;

        let width_scale = (far_width - near_width) / (far_distance - near_distance);
        let width_offset = near_width - width_scale * near_distance;
        return (
            width_scale / self.viewport.width,
            width_offset / self.viewport.height,
        );
    }

    fn compute_draw_context(&mut self) {
        let (modelview, projection) = match self.compute_viewing_transform() {
            Ok(matrices) => matrices,
            Err(err) => {
                error!("failed to compute the viewing transform: {err}");
                return;
            }
        };
        let (pixel_size_factor, pixel_size_offset) = self.compute_pixel_metrics(&projection);

        let dc = &mut self.draw_context;
        dc.viewport = self.viewport;
        dc.modelview = modelview;
        dc.projection = projection;
        dc.modelview_projection = projection * modelview;
        dc.eye_point = modelview.extract_eye_point();
        dc.pixel_size_factor = pixel_size_factor;
        dc.pixel_size_offset = pixel_size_offset;
        dc.modelview_normal_transform =
            modelview.inverse_transformation().upper_3x3().transpose();
        dc.frustum_in_model_coordinates = Some(
            Frustum::from_projection_matrix(&projection)
                .transform_by_matrix(&modelview.transpose())
                .normalize(),
        );
    }

    fn reset_draw_context(&mut self) {
        self.draw_context.globe.set_offset(0.0);
        self.draw_context.reset();
        self.draw_context.vertical_exaggeration = self.vertical_exaggeration;
        self.draw_context.surface_opacity = self.surface_opacity;
        self.draw_context.deep_picking = self.deep_picking;
        self.compute_draw_context();
        self.draw_context.update();
    }

    fn draw_frame<B: TerrainRenderBackend>(&mut self, backend: &mut B) {
        self.draw_context.frame_statistics.begin_frame();
        backend.begin_frame(self.draw_context.picking_mode);
        self.defer_ordered_rendering = false;

        if self.draw_context.globe.is_2d() && self.draw_context.globe.is_continuous() {
            self.do_2d_contiguous_repaint(backend);
        } else {
            self.do_normal_repaint(backend);
        }

        backend.end_frame();
        self.draw_context.frame_statistics.end_frame();
    }

    fn do_normal_repaint<B: TerrainRenderBackend>(&mut self, backend: &mut B) {
        self.create_terrain();
        backend.clear_frame(self.draw_context.clear_color);

        if self.draw_context.picking_mode {
            if self.draw_context.make_pick_frustum() {
                self.do_pick(backend);
                self.resolve_pick(backend);
            }
        } else {
            self.do_draw(backend);
        }
    }

    fn do_2d_contiguous_repaint<B: TerrainRenderBackend>(&mut self, backend: &mut B) {
        self.create_terrain_2d_contiguous();
        backend.clear_frame(self.draw_context.clear_color);

        if self.draw_context.picking_mode {
            if self.draw_context.make_pick_frustum() {
                self.pick_2d_contiguous(backend);
                self.resolve_pick(backend);
            }
        } else {
            self.draw_2d_contiguous(backend);
        }
    }

    fn create_terrain(&mut self) {
        let terrain = self.tessellator.tessellate(&self.draw_context);
        self.draw_context
            .frame_statistics
            .set_terrain_tile_count(terrain.as_ref().map(Terrain::len).unwrap_or(0));
        self.draw_context.terrain = terrain;
    }

    /// Tessellates a terrain for the center globe copy and for the copies
    /// offset one world width to each side, where visible.
    fn create_terrain_2d_contiguous(&mut self) {
        self.terrain_center = self.tessellate_at_offset(0.0);
        self.terrain_right = self.tessellate_at_offset(1.0);
        self.terrain_left = self.tessellate_at_offset(-1.0);
    }

    fn tessellate_at_offset(&mut self, offset: f64) -> Option<Terrain> {
        self.draw_context.globe.set_offset(offset);
        self.draw_context.globe_state_key = self.draw_context.globe.state_key();

        let visible = match self.draw_context.frustum_in_model_coordinates.as_ref() {
            Some(frustum) => self.draw_context.globe.intersects_frustum(frustum),
            None => false,
        };
        if !visible {
            return None;
        }
        return self.tessellator.tessellate(&self.draw_context);
    }

    /// Makes one globe copy current: sets its longitude offset and its
    /// terrain on the draw context.
    fn make_current(&mut self, offset: f64) {
        self.draw_context.globe.set_offset(offset);
        self.draw_context.globe_state_key = self.draw_context.globe.state_key();
        self.draw_context.terrain = if offset > 0.5 {
            self.terrain_right.clone()
        } else if offset < -0.5 {
            self.terrain_left.clone()
        } else {
            self.terrain_center.clone()
        };
    }

    fn do_draw<B: TerrainRenderBackend>(&mut self, backend: &mut B) {
        self.draw_pass(backend, true);
        if !self.defer_ordered_rendering {
            self.draw_screen_renderables();
        }
    }

    fn draw_pass<B: TerrainRenderBackend>(&mut self, backend: &mut B, accumulate: bool) {
        if let Some(terrain) = self.draw_context.terrain.clone() {
            terrain.render(&mut self.draw_context, &mut self.tessellator, backend);
        }
        self.draw_layers(accumulate);
        self.draw_surface_renderables();
        if !self.defer_ordered_rendering {
            self.draw_ordered_renderables();
        }
    }

    fn draw_2d_contiguous<B: TerrainRenderBackend>(&mut self, backend: &mut B) {
        if self.terrain_center.is_some() {
            self.make_current(0.0);
            // Ordered rendering waits until the last globe copy has drawn.
            self.defer_ordered_rendering =
                self.terrain_left.is_some() || self.terrain_right.is_some();
            self.draw_pass(backend, true);
        }

        if self.terrain_right.is_some() {
            self.make_current(1.0);
            self.defer_ordered_rendering = self.terrain_left.is_some();
            self.draw_pass(backend, false);
        }

        self.defer_ordered_rendering = false;
        if self.terrain_left.is_some() {
            self.make_current(-1.0);
            self.draw_pass(backend, false);
        }

        self.draw_screen_renderables();
    }

    fn do_pick<B: TerrainRenderBackend>(&mut self, backend: &mut B) {
        if let Some(terrain) = self.draw_context.terrain.clone() {
            terrain.pick(&mut self.draw_context, &mut self.tessellator, backend);
        }

        if !self.draw_context.pick_terrain_only {
            self.draw_layers(true);
            self.draw_surface_renderables();
            if !self.defer_ordered_rendering {
                self.draw_ordered_renderables();
                self.draw_screen_renderables();
            }
        }
    }

    fn pick_2d_contiguous<B: TerrainRenderBackend>(&mut self, backend: &mut B) {
        if self.terrain_center.is_some() {
            self.make_current(0.0);
            self.defer_ordered_rendering =
                self.terrain_left.is_some() || self.terrain_right.is_some();
            self.do_pick(backend);
        }

        if self.terrain_right.is_some() {
            self.make_current(1.0);
            self.defer_ordered_rendering = self.terrain_left.is_some();
            self.do_pick(backend);
        }

        self.defer_ordered_rendering = false;
        if self.terrain_left.is_some() {
            self.make_current(-1.0);
            self.do_pick(backend);
        }
    }

    /// Renders every enabled layer, isolating failures so one broken layer
    /// cannot take down the frame.
    fn draw_layers(&mut self, accumulate_ordered_renderables: bool) {
        let start = Instant::now();
        self.draw_context.accumulate_ordered_renderables = accumulate_ordered_renderables;

        for layer in &mut self.layers {
            if !layer.enabled() {
                continue;
            }
            if self.draw_context.picking_mode && !layer.pick_enabled() {
                continue;
            }
            if let Err(err) = layer.render(&mut self.draw_context) {
                error!("error while rendering layer {}: {err}", layer.display_name());
            }
        }

        self.draw_context
            .frame_statistics
            .add_layer_rendering_time(start.elapsed().as_secs_f64() * 1000.0);
    }

    fn draw_surface_renderables(&mut self) {
        self.draw_context.reverse_surface_renderables();
        while let Some(mut renderable) = self.draw_context.pop_surface_renderable() {
            if let Err(err) = renderable.render_surface(&mut self.draw_context) {
                warn!(
                    "error while rendering surface shape {}: {err}",
                    renderable.display_name()
                );
            }
        }
    }

    fn draw_ordered_renderables(&mut self) {
        let start = Instant::now();
        self.draw_context.sort_ordered_renderables();
        self.draw_context.ordered_rendering_mode = true;

        while let Some(mut renderable) = self.draw_context.pop_ordered_renderable() {
            if let Err(err) = renderable.render_ordered(&mut self.draw_context) {
                warn!(
                    "error while rendering shape {}: {err}",
                    renderable.display_name()
                );
            }
        }

        self.draw_context.ordered_rendering_mode = false;
        self.draw_context
            .frame_statistics
            .add_ordered_rendering_time(start.elapsed().as_secs_f64() * 1000.0);
    }

    fn draw_screen_renderables(&mut self) {
        while let Some(mut renderable) = self.draw_context.next_screen_renderable() {
            if let Err(err) = renderable.render_ordered(&mut self.draw_context) {
                warn!(
                    "error while rendering screen shape {}: {err}",
                    renderable.display_name()
                );
            }
        }
    }

    fn resolve_pick<B: TerrainRenderBackend>(&mut self, backend: &B) {
        if self.draw_context.pick_terrain_only {
            self.resolve_terrain_pick();
        } else if self.draw_context.region_picking {
            self.resolve_region_pick(backend);
        } else {
            self.resolve_top_pick(backend);
        }
    }

    /// Marks the object whose pick color was drawn at the pick point as on
    /// top. Outside deep picking mode only the top object and the terrain
    /// object are kept.
    fn resolve_top_pick<B: TerrainRenderBackend>(&mut self, backend: &B) {
        if self.draw_context.objects_at_pick_point.is_empty() {
            return;
        }
        let Some(pick_point) = self.draw_context.pick_point else {
            return;
        };

        let viewport_point = self.draw_context.convert_point_to_viewport(&pick_point);
        let drawn_color = backend.read_pick_color(viewport_point.x, viewport_point.y);

        let mut terrain_index = None;
        let mut top_marked = false;
        {
            let objects = self.draw_context.objects_at_pick_point.objects_mut();
            for (index, object) in objects.iter_mut().enumerate() {
                if object.is_terrain && terrain_index.is_none() {
                    terrain_index = Some(index);
                }
                if let (Some(color), Some(drawn)) = (object.color, drawn_color) {
                    if color.equals_rgb(&drawn) {
                        object.is_on_top = true;
                        top_marked = true;
                    }
                }
            }

            // Backends without color readback cannot identify the drawn
            // object; the terrain intersection is still authoritative.
            if !top_marked {
                if let Some(index) = terrain_index {
                    objects[index].is_on_top = true;
                }
            }
        }

        if !self.deep_picking {
            let objects = self.draw_context.objects_at_pick_point.objects_mut();
            let mut terrain_kept = false;
            objects.retain(|object| {
                if object.is_on_top {
                    terrain_kept |= object.is_terrain;
                    return true;
                }
                if object.is_terrain && !terrain_kept {
                    terrain_kept = true;
                    return true;
                }
                return false;
            });
        }
    }

    /// Marks the terrain object as on top; terrain-only picks have no other
    /// candidates.
    fn resolve_terrain_pick(&mut self) {
        let objects = self.draw_context.objects_at_pick_point.objects_mut();
        if let Some(object) = objects.iter_mut().find(|o| o.is_terrain) {
            object.is_on_top = true;
        }
    }

    /// Marks every object whose pick color appears within the pick
    /// rectangle as on top.
    fn resolve_region_pick<B: TerrainRenderBackend>(&mut self, backend: &B) {
        let Some(rectangle) = self.draw_context.pick_rectangle else {
            return;
        };

        let colors = backend.read_pick_colors(&rectangle);
        let objects = self.draw_context.objects_at_pick_point.objects_mut();
        for object in objects.iter_mut() {
            if let Some(color) = object.color {
                if colors.iter().any(|drawn| color.equals_rgb(drawn)) {
                    object.is_on_top = true;
                }
            }
        }
    }
}
