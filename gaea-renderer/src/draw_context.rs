use std::collections::VecDeque;

use bevy::math::{DMat3, DMat4, DVec2, DVec3};

use gaea_scene::math::{Matrix4Ext, Viewport};
use gaea_scene::{BoundingBox, Frustum, Globe, Line, Plane, Position};

use crate::error::RenderError;
use crate::frame_statistics::FrameStatistics;
use crate::pick::{PickColor, PickColorReader, PickedObject, PickedObjectList, Rectangle};
use crate::terrain::Terrain;

/// A renderable drawn during the layer pass.
pub trait Layer: Send + Sync {
    fn display_name(&self) -> &str;

    fn enabled(&self) -> bool {
        return true;
    }

    fn pick_enabled(&self) -> bool {
        return true;
    }

    fn render(&mut self, dc: &mut DrawContext) -> Result<(), RenderError>;
}

/// A renderable queued during the layer pass and drawn back to front after
/// all layers have rendered. Renderables with an eye distance of zero are
/// screen renderables, drawn last in the order they were queued.
pub trait OrderedRenderable: Send + Sync {
    fn display_name(&self) -> &str;

    fn eye_distance(&self) -> f64;

    fn render_ordered(&mut self, dc: &mut DrawContext) -> Result<(), RenderError>;
}

/// A renderable drawn directly onto the terrain surface, after layers and
/// before ordered renderables.
pub trait SurfaceRenderable: Send + Sync {
    fn display_name(&self) -> &str;

    fn render_surface(&mut self, dc: &mut DrawContext) -> Result<(), RenderError>;
}

struct OrderedEntry {
    renderable: Box<dyn OrderedRenderable>,
    insertion_order: u64,
    eye_distance: f64,
    /// The globe state at queueing time, restored when the entry is drawn so
    /// renderables queued during a continuous-globe pass draw at the offset
    /// they were queued under.
    globe_state_key: String,
    globe_offset: f64,
}

/// Carries the state needed to render one frame: the globe, the viewing
/// matrices, the renderable queues and the picking state. A single draw
/// context lives for the life of the window and is reset at the start of
/// every frame.
pub struct DrawContext {
    pub globe: Globe,
    pub globe_state_key: String,
    pub vertical_exaggeration: f64,
    pub surface_opacity: f64,

    pub eye_point: DVec3,
    pub eye_position: Position,
    pub modelview: DMat4,
    pub projection: DMat4,
    pub modelview_projection: DMat4,
    pub modelview_normal_transform: DMat3,
    pub frustum_in_model_coordinates: Option<Frustum>,
    pub viewport: Viewport,
    pub pixel_size_factor: f64,
    pub pixel_size_offset: f64,

    pub terrain: Option<Terrain>,
    pub frame_statistics: FrameStatistics,
    pub clear_color: PickColor,
    /// Monotonic frame counter, advanced by `reset`.
    pub timestamp: u64,
    pub redraw_requested: bool,

    pub picking_mode: bool,
    pub pick_terrain_only: bool,
    pub deep_picking: bool,
    pub region_picking: bool,
    /// Pick point in screen coordinates, origin at the upper left.
    pub pick_point: Option<DVec2>,
    pub pick_ray: Option<Line>,
    /// Pick region in viewport coordinates, origin at the lower left.
    pub pick_rectangle: Option<Rectangle>,
    pub pick_frustum: Option<Frustum>,
    pub objects_at_pick_point: PickedObjectList,
    pick_color: PickColor,

    pub ordered_rendering_mode: bool,
    /// False during repeat globe passes so layers do not queue their
    /// ordered renderables a second time.
    pub accumulate_ordered_renderables: bool,
    surface_renderables: Vec<Box<dyn SurfaceRenderable>>,
    ordered_renderables: Vec<OrderedEntry>,
    screen_renderables: VecDeque<OrderedEntry>,
    ordered_renderables_counter: u64,
}

impl DrawContext {
    pub fn new(globe: Globe) -> Self {
        let globe_state_key = globe.state_key();
        Self {
            globe,
            globe_state_key,
            vertical_exaggeration: 1.0,
            surface_opacity: 1.0,
            eye_point: DVec3::ZERO,
            eye_position: Position::default(),
            modelview: DMat4::IDENTITY,
            projection: DMat4::IDENTITY,
            modelview_projection: DMat4::IDENTITY,
            modelview_normal_transform: DMat3::IDENTITY,
            frustum_in_model_coordinates: None,
            viewport: Viewport::default(),
            pixel_size_factor: 0.0,
            pixel_size_offset: 0.0,
            terrain: None,
            frame_statistics: FrameStatistics::default(),
            clear_color: PickColor::TRANSPARENT,
            timestamp: 0,
            redraw_requested: false,
            picking_mode: false,
            pick_terrain_only: false,
            deep_picking: false,
            region_picking: false,
            pick_point: None,
            pick_ray: None,
            pick_rectangle: None,
            pick_frustum: None,
            objects_at_pick_point: PickedObjectList::default(),
            pick_color: PickColor::TRANSPARENT,
            ordered_rendering_mode: false,
            accumulate_ordered_renderables: true,
            surface_renderables: Vec::new(),
            ordered_renderables: Vec::new(),
            screen_renderables: VecDeque::new(),
            ordered_renderables_counter: 0,
        }
    }

    /// Prepares this context for a new frame: clears the renderable queues
    /// and the picking state, advances the frame timestamp and resets the
    /// matrices to identity.
    pub fn reset(&mut self) {
        self.timestamp += 1;

        self.surface_renderables.clear();
        self.ordered_renderables.clear();
        self.screen_renderables.clear();
        self.ordered_renderables_counter = 0;
        self.ordered_rendering_mode = false;
        self.accumulate_ordered_renderables = true;

        self.picking_mode = false;
        self.pick_terrain_only = false;
        self.region_picking = false;
        self.pick_point = None;
        self.pick_ray = None;
        self.pick_rectangle = None;
        self.pick_frustum = None;
        self.pick_color = PickColor::TRANSPARENT;
        self.objects_at_pick_point.clear();

        self.modelview = DMat4::IDENTITY;
        self.projection = DMat4::IDENTITY;
        self.modelview_projection = DMat4::IDENTITY;
        self.modelview_normal_transform = DMat3::IDENTITY;
        self.frustum_in_model_coordinates = None;
        self.terrain = None;
        self.redraw_requested = false;
    }

    /// Recomputes state derived from the globe and the eye point. Called
    /// after the viewing matrices have been set for the frame.
    pub fn update(&mut self) {
        self.globe_state_key = self.globe.state_key();
        self.eye_position = self.globe.compute_position_from_point(
            self.eye_point.x,
            self.eye_point.y,
            self.eye_point.z,
        );
    }

    /// Drops state tied to the rendering context after a context loss.
    pub fn context_lost(&mut self) {
        self.surface_renderables.clear();
        self.ordered_renderables.clear();
        self.screen_renderables.clear();
        self.objects_at_pick_point.clear();
        self.terrain = None;
    }

    pub fn add_surface_renderable(&mut self, renderable: Box<dyn SurfaceRenderable>) {
        self.surface_renderables.push(renderable);
    }

    pub fn reverse_surface_renderables(&mut self) {
        self.surface_renderables.reverse();
    }

    pub fn pop_surface_renderable(&mut self) -> Option<Box<dyn SurfaceRenderable>> {
        return self.surface_renderables.pop();
    }

    /// Queues a renderable for drawing after the layer pass. Renderables
    /// with an eye distance of zero are queued as screen renderables.
    pub fn add_ordered_renderable(&mut self, renderable: Box<dyn OrderedRenderable>) {
        let eye_distance = renderable.eye_distance();
        self.insert_ordered(renderable, eye_distance);
    }

    /// Queues a renderable behind everything queued so far.
    pub fn add_ordered_renderable_to_back(&mut self, renderable: Box<dyn OrderedRenderable>) {
        self.insert_ordered(renderable, f64::MAX);
    }

    fn insert_ordered(&mut self, renderable: Box<dyn OrderedRenderable>, eye_distance: f64) {
        self.ordered_renderables_counter += 1;
        let entry = OrderedEntry {
            renderable,
            insertion_order: self.ordered_renderables_counter,
            eye_distance,
            globe_state_key: self.globe_state_key.clone(),
            globe_offset: self.globe.offset(),
        };
        if eye_distance == 0.0 {
            self.screen_renderables.push_back(entry);
        } else {
            self.ordered_renderables.push(entry);
        }
    }

    /// Sorts the ordered renderables so that popping from the back yields
    /// them farthest first. Ties draw in insertion order.
    pub fn sort_ordered_renderables(&mut self) {
        self.ordered_renderables.sort_by(|a, b| {
            a.eye_distance
                .total_cmp(&b.eye_distance)
                .then(b.insertion_order.cmp(&a.insertion_order))
        });
    }

    /// Removes and returns the next ordered renderable, restoring the globe
    /// state it was queued under.
    pub fn pop_ordered_renderable(&mut self) -> Option<Box<dyn OrderedRenderable>> {
        let entry = self.ordered_renderables.pop()?;
        self.globe_state_key = entry.globe_state_key;
        if self.globe.is_continuous() {
            self.globe.set_offset(entry.globe_offset);
        }
        return Some(entry.renderable);
    }

    pub fn next_screen_renderable(&mut self) -> Option<Box<dyn OrderedRenderable>> {
        return self.screen_renderables.pop_front().map(|e| e.renderable);
    }

    pub fn ordered_renderable_count(&self) -> usize {
        return self.ordered_renderables.len();
    }

    /// The next color in this frame's pick color sequence. Never returns
    /// the clear color.
    pub fn unique_pick_color(&mut self) -> PickColor {
        let mut color = self.pick_color.next();
        if color.equals_rgb(&self.clear_color) {
            color = color.next();
        }
        self.pick_color = color;
        return color;
    }

    pub fn add_picked_object(&mut self, object: PickedObject) {
        self.objects_at_pick_point.add(object);
    }

    /// Adds a picked object to the results, in deep picking mode only when
    /// the color drawn at the pick point matches the object's color.
    pub fn resolve_pick(&mut self, object: PickedObject, reader: &dyn PickColorReader) {
        if self.deep_picking && !self.region_picking {
            let Some(pick_point) = self.pick_point else {
                return;
            };
            let viewport_point = self.convert_point_to_viewport(&pick_point);
            let drawn = reader.read_pick_color(viewport_point.x, viewport_point.y);
            match (object.color, drawn) {
                (Some(color), Some(drawn)) if color.equals_rgb(&drawn) => {
                    self.add_picked_object(object);
                }
                _ => {}
            }
        } else {
            self.add_picked_object(object);
        }
    }

    /// Computes the pick frustum, a small volume around the pick point or
    /// pick rectangle, clamped to the viewport. Returns false when the pick
    /// region lies entirely outside the viewport.
    pub fn make_pick_frustum(&mut self) -> bool {
        const APERTURE_RADIUS: f64 = 2.0;

        let rect = if let Some(pick_point) = self.pick_point {
            let p = self.convert_point_to_viewport(&pick_point);
            Rectangle::new(
                p.x - APERTURE_RADIUS,
                p.y - APERTURE_RADIUS,
                2.0 * APERTURE_RADIUS,
                2.0 * APERTURE_RADIUS,
            )
        } else if let Some(pick_rectangle) = self.pick_rectangle {
            pick_rectangle
        } else {
            return false;
        };

        let viewport_rect = Rectangle::new(
            self.viewport.x,
            self.viewport.y,
            self.viewport.width,
            self.viewport.height,
        );
        let Some(rect) = rect.intersection(&viewport_rect) else {
            return false;
        };

        let Some(inverse) = self.modelview_projection.try_invert_general() else {
            return false;
        };

        // The eight corners of the pick volume in model coordinates.
        let mut corners = [DVec3::ZERO; 8];
        let xs = [rect.x, rect.x + rect.width];
        let ys = [rect.y, rect.y + rect.height];
        let zs = [0.0, 1.0];
        let mut i = 0;
        for x in xs {
            for y in ys {
                for z in zs {
                    let screen_point = DVec3::new(x, y, z);
                    match inverse.unproject(&screen_point, &self.viewport) {
                        Some(p) => corners[i] = p,
                        None => return false,
                    }
                    i += 1;
                }
            }
        }

        let centroid = corners.iter().sum::<DVec3>() / 8.0;
        // Corner layout: index = x*4 + y*2 + z.
        let [lbn, lbf, ltn, ltf, rbn, rbf, rtn, rtf] = corners;
        let left = plane_through(&lbn, &lbf, &ltn, &centroid);
        let right = plane_through(&rbn, &rtn, &rbf, &centroid);
        let bottom = plane_through(&lbn, &rbn, &lbf, &centroid);
        let top = plane_through(&ltn, &ltf, &rtn, &centroid);
        let near = plane_through(&lbn, &ltn, &rbn, &centroid);
        let far = plane_through(&lbf, &rbf, &ltf, &centroid);
        let (Some(left), Some(right), Some(bottom), Some(top), Some(near), Some(far)) =
            (left, right, bottom, top, near, far)
        else {
            return false;
        };

        self.pick_frustum = Some(Frustum::new(left, right, bottom, top, near, far));
        return true;
    }

    /// Whether the extent projects to fewer than `num_pixels` pixels at its
    /// distance from the eye.
    pub fn is_small(&self, extent: Option<&BoundingBox>, num_pixels: f64) -> bool {
        let Some(extent) = extent else {
            return false;
        };
        let distance = extent.center.distance(self.eye_point);
        return 2.0 * extent.radius < num_pixels * self.pixel_size_at_distance(distance);
    }

    /// The approximate size in meters of one pixel at the given distance
    /// from the eye.
    pub fn pixel_size_at_distance(&self, distance: f64) -> f64 {
        return self.pixel_size_factor * distance + self.pixel_size_offset;
    }

    /// Projects a model point into viewport coordinates, `None` when the
    /// point is behind the eye or outside the depth range.
    pub fn project(&self, model_point: &DVec3) -> Option<DVec3> {
        let clip = self.modelview_projection * model_point.extend(1.0);
        if clip.w == 0.0 {
            return None;
        }

        let mut ndc = clip.truncate() / clip.w;
        if ndc.z < -1.0 || ndc.z > 1.0 {
            return None;
        }

        ndc = ndc * 0.5 + DVec3::splat(0.5);
        return Some(DVec3::new(
            ndc.x * self.viewport.width + self.viewport.x,
            ndc.y * self.viewport.height + self.viewport.y,
            ndc.z,
        ));
    }

    /// Projects a model point like `project`, but scales the projected depth
    /// by `1 + depth_offset` so surface shapes can be pulled toward the eye
    /// ahead of the terrain they sit on.
    pub fn project_with_depth(&self, model_point: &DVec3, depth_offset: f64) -> Option<DVec3> {
        let eye = self.modelview * model_point.extend(1.0);
        let p = &self.projection;
        let mut clip = *p * eye;
        clip.z = p.x_axis.z * eye.x
            + p.y_axis.z * eye.y
            + p.z_axis.z * eye.z * (1.0 + depth_offset)
            + p.w_axis.z * eye.w;
        if clip.w == 0.0 {
            return None;
        }

        let mut ndc = clip.truncate() / clip.w;
        if ndc.x < -1.0 || ndc.x > 1.0 || ndc.y < -1.0 || ndc.y > 1.0 {
            return None;
        }
        ndc.z = ndc.z.clamp(-1.0, 1.0);

        ndc = ndc * 0.5 + DVec3::splat(0.5);
        return Some(DVec3::new(
            ndc.x * self.viewport.width + self.viewport.x,
            ndc.y * self.viewport.height + self.viewport.y,
            ndc.z,
        ));
    }

    /// Converts a screen point (origin upper left) to viewport coordinates
    /// (origin lower left).
    pub fn convert_point_to_viewport(&self, point: &DVec2) -> DVec2 {
        return DVec2::new(point.x, self.viewport.height - point.y);
    }
}

/// The plane through three points, oriented so `inside` is on its positive
/// side. `None` when the points are collinear.
fn plane_through(a: &DVec3, b: &DVec3, c: &DVec3, inside: &DVec3) -> Option<Plane> {
    let mut normal = (*b - *a).cross(*c - *a);
    if normal.length_squared() == 0.0 {
        return None;
    }
    normal = normal.normalize();
    if normal.dot(*inside - *a) < 0.0 {
        normal = -normal;
    }
    return Some(Plane::from_normal(normal, -normal.dot(*a)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaea_scene::math::perspective_projection;
    use gaea_scene::ZeroElevationModel;

    struct TestRenderable {
        name: String,
        eye_distance: f64,
    }

    impl OrderedRenderable for TestRenderable {
        fn display_name(&self) -> &str {
            return &self.name;
        }

        fn eye_distance(&self) -> f64 {
            return self.eye_distance;
        }

        fn render_ordered(&mut self, _dc: &mut DrawContext) -> Result<(), RenderError> {
            return Ok(());
        }
    }

    fn draw_context() -> DrawContext {
        return DrawContext::new(Globe::new(Box::new(ZeroElevationModel::default())));
    }

    fn add(dc: &mut DrawContext, name: &str, eye_distance: f64) {
        dc.add_ordered_renderable(Box::new(TestRenderable {
            name: name.to_string(),
            eye_distance,
        }));
    }

    #[test]
    fn ordered_renderables_pop_back_to_front() {
        let mut dc = draw_context();
        add(&mut dc, "near", 10.0);
        add(&mut dc, "far", 1000.0);
        add(&mut dc, "mid", 100.0);

        dc.sort_ordered_renderables();
        let order: Vec<String> = std::iter::from_fn(|| dc.pop_ordered_renderable())
            .map(|r| r.display_name().to_string())
            .collect();
        assert_eq!(order, ["far", "mid", "near"]);
    }

    #[test]
    fn equal_eye_distances_draw_in_insertion_order() {
        let mut dc = draw_context();
        add(&mut dc, "first", 50.0);
        add(&mut dc, "second", 50.0);

        dc.sort_ordered_renderables();
        let order: Vec<String> = std::iter::from_fn(|| dc.pop_ordered_renderable())
            .map(|r| r.display_name().to_string())
            .collect();
        assert_eq!(order, ["first", "second"]);
    }

    #[test]
    fn zero_eye_distance_renderables_are_screen_renderables() {
        let mut dc = draw_context();
        add(&mut dc, "screen a", 0.0);
        add(&mut dc, "screen b", 0.0);
        add(&mut dc, "world", 5.0);

        assert_eq!(dc.ordered_renderable_count(), 1);
        assert_eq!(dc.next_screen_renderable().unwrap().display_name(), "screen a");
        assert_eq!(dc.next_screen_renderable().unwrap().display_name(), "screen b");
        assert!(dc.next_screen_renderable().is_none());
    }

    #[test]
    fn unique_pick_colors_never_repeat_the_clear_color() {
        let mut dc = draw_context();
        let first = dc.unique_pick_color();
        let second = dc.unique_pick_color();
        assert_ne!(first, second);
        assert!(!first.equals_rgb(&dc.clear_color));
        assert!(!second.equals_rgb(&dc.clear_color));
    }

    #[test]
    fn reset_advances_the_timestamp_and_clears_pick_state() {
        let mut dc = draw_context();
        dc.picking_mode = true;
        dc.pick_point = Some(DVec2::new(1.0, 2.0));
        add(&mut dc, "leftover", 5.0);

        let before = dc.timestamp;
        dc.reset();
        assert!(dc.timestamp > before);
        assert!(!dc.picking_mode);
        assert!(dc.pick_point.is_none());
        assert_eq!(dc.ordered_renderable_count(), 0);
    }

    struct FixedColorReader(PickColor);

    impl PickColorReader for FixedColorReader {
        fn read_pick_color(&self, _x: f64, _y: f64) -> Option<PickColor> {
            return Some(self.0);
        }
    }

    #[test]
    fn deep_picking_keeps_only_objects_whose_color_was_drawn() {
        let mut dc = draw_context();
        dc.deep_picking = true;
        dc.pick_point = Some(DVec2::new(10.0, 10.0));

        let drawn = dc.unique_pick_color();
        let not_drawn = dc.unique_pick_color();
        let reader = FixedColorReader(drawn);

        dc.resolve_pick(PickedObject::new(drawn, "visible"), &reader);
        dc.resolve_pick(PickedObject::new(not_drawn, "occluded"), &reader);

        assert_eq!(dc.objects_at_pick_point.len(), 1);
        assert_eq!(dc.objects_at_pick_point.objects()[0].user_object, "visible");
    }

    #[test]
    fn pick_frustum_contains_the_picked_ray() {
        let mut dc = draw_context();
        dc.viewport = Viewport::new(0.0, 0.0, 800.0, 600.0);
        dc.projection = perspective_projection(800.0, 600.0, 1.0, 1000.0).unwrap();
        dc.modelview = DMat4::from_translation(DVec3::new(0.0, 0.0, -10.0));
        dc.modelview_projection = dc.projection * dc.modelview;
        dc.pick_point = Some(DVec2::new(400.0, 300.0));

        assert!(dc.make_pick_frustum());
        let frustum = dc.pick_frustum.as_ref().unwrap();
        // A point straight ahead of the eye lies inside the pick volume.
        assert!(frustum.contains_point(&DVec3::new(0.0, 0.0, 0.0)));
        // A point far off to the side does not.
        assert!(!frustum.contains_point(&DVec3::new(100.0, 0.0, 0.0)));
    }

    #[test]
    fn project_round_trips_the_viewport_center() {
        let mut dc = draw_context();
        dc.viewport = Viewport::new(0.0, 0.0, 800.0, 600.0);
        dc.projection = perspective_projection(800.0, 600.0, 1.0, 1000.0).unwrap();
        dc.modelview = DMat4::from_translation(DVec3::new(0.0, 0.0, -10.0));
        dc.modelview_projection = dc.projection * dc.modelview;

        let projected = dc.project(&DVec3::ZERO).unwrap();
        assert!((projected.x - 400.0).abs() < 1e-6);
        assert!((projected.y - 300.0).abs() < 1e-6);

        // Behind the eye.
        assert!(dc.project(&DVec3::new(0.0, 0.0, 100.0)).is_none());
    }
}
