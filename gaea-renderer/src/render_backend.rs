use std::collections::HashMap;

use bevy::math::DMat4;

use crate::pick::{PickColor, PickColorReader};

/// The drawing surface the terrain pipeline renders into. Implementations
/// own the GPU-side buffers; the pipeline drives them through the
/// begin/render/end protocol and keys tile vertex buffers by state strings
/// so stale buffers are re-uploaded only when their source data changed.
pub trait TerrainRenderBackend: PickColorReader {
    fn begin_frame(&mut self, picking: bool);

    fn end_frame(&mut self);

    fn clear_frame(&mut self, clear_color: PickColor);

    /// Ensures the shared tile geometry (texture coordinates and the index
    /// buffer every tile draws from) is resident. Returns true when the
    /// geometry was uploaded by this call.
    fn cache_shared_geometry(&mut self, tex_coords: &[f32], indices: &[u16]) -> bool;

    fn has_tile_buffer(&self, key: &str) -> bool;

    fn upload_tile_points(&mut self, key: &str, points: &[f32]);

    /// Rewrites an existing tile buffer in place.
    fn update_tile_points(&mut self, key: &str, points: &[f32]);

    fn bind_tile_points(&mut self, key: &str);

    fn set_tile_transform(&mut self, modelview_projection: &DMat4);

    fn set_pick_color(&mut self, color: PickColor);

    fn draw_triangle_strip(&mut self, first_index: usize, index_count: usize);

    fn draw_lines(&mut self, first_index: usize, index_count: usize);

    fn draw_line_loop(&mut self, first_index: usize, index_count: usize);

    /// Drops all cached GPU state, used on context loss.
    fn clear_gpu_state(&mut self);
}

/// One recorded draw call, kept by [`NoopRenderBackend`] for assertions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedDraw {
    pub buffer_key: Option<String>,
    pub first_index: usize,
    pub index_count: usize,
    pub kind: DrawKind,
    pub picking: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawKind {
    TriangleStrip,
    Lines,
    LineLoop,
}

/// A backend that records every call without touching a GPU. Used by
/// headless tests and as the default surface before a real backend is
/// attached.
#[derive(Default)]
pub struct NoopRenderBackend {
    shared_geometry_bytes: usize,
    tile_buffers: HashMap<String, Vec<f32>>,
    bound_buffer: Option<String>,
    transform: DMat4,
    pick_color: PickColor,
    picking: bool,
    pub draws: Vec<RecordedDraw>,
    pub upload_count: usize,
    pub update_count: usize,
    pub bind_count: usize,
    pub clear_count: usize,
}

impl NoopRenderBackend {
    pub fn new() -> Self {
        return Self::default();
    }

    pub fn tile_buffer(&self, key: &str) -> Option<&[f32]> {
        return self.tile_buffers.get(key).map(|b| b.as_slice());
    }

    pub fn tile_buffer_count(&self) -> usize {
        return self.tile_buffers.len();
    }

    pub fn shared_geometry_bytes(&self) -> usize {
        return self.shared_geometry_bytes;
    }

    pub fn current_transform(&self) -> DMat4 {
        return self.transform;
    }

    fn record(&mut self, kind: DrawKind, first_index: usize, index_count: usize) {
        self.draws.push(RecordedDraw {
            buffer_key: self.bound_buffer.clone(),
            first_index,
            index_count,
            kind,
            picking: self.picking,
        });
    }
}

impl PickColorReader for NoopRenderBackend {
    fn read_pick_color(&self, _x: f64, _y: f64) -> Option<PickColor> {
        return None;
    }
}

impl TerrainRenderBackend for NoopRenderBackend {
    fn begin_frame(&mut self, picking: bool) {
        self.picking = picking;
        self.draws.clear();
    }

    fn end_frame(&mut self) {
        self.bound_buffer = None;
    }

    fn clear_frame(&mut self, _clear_color: PickColor) {
        self.clear_count += 1;
    }

    fn cache_shared_geometry(&mut self, tex_coords: &[f32], indices: &[u16]) -> bool {
        if self.shared_geometry_bytes != 0 {
            return false;
        }
        let tex_bytes: &[u8] = bytemuck::cast_slice(tex_coords);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        self.shared_geometry_bytes = tex_bytes.len() + index_bytes.len();
        return true;
    }

    fn has_tile_buffer(&self, key: &str) -> bool {
        return self.tile_buffers.contains_key(key);
    }

    fn upload_tile_points(&mut self, key: &str, points: &[f32]) {
        self.tile_buffers.insert(key.to_string(), points.to_vec());
        self.bound_buffer = Some(key.to_string());
        self.upload_count += 1;
    }

    fn update_tile_points(&mut self, key: &str, points: &[f32]) {
        self.tile_buffers.insert(key.to_string(), points.to_vec());
        self.bound_buffer = Some(key.to_string());
        self.update_count += 1;
    }

    fn bind_tile_points(&mut self, key: &str) {
        self.bound_buffer = Some(key.to_string());
        self.bind_count += 1;
    }

    fn set_tile_transform(&mut self, modelview_projection: &DMat4) {
        self.transform = *modelview_projection;
    }

    fn set_pick_color(&mut self, color: PickColor) {
        self.pick_color = color;
    }

    fn draw_triangle_strip(&mut self, first_index: usize, index_count: usize) {
        self.record(DrawKind::TriangleStrip, first_index, index_count);
    }

    fn draw_lines(&mut self, first_index: usize, index_count: usize) {
        self.record(DrawKind::Lines, first_index, index_count);
    }

    fn draw_line_loop(&mut self, first_index: usize, index_count: usize) {
        self.record(DrawKind::LineLoop, first_index, index_count);
    }

    fn clear_gpu_state(&mut self) {
        self.shared_geometry_bytes = 0;
        self.tile_buffers.clear();
        self.bound_buffer = None;
        self.draws.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_geometry_uploads_once() {
        let mut backend = NoopRenderBackend::new();
        assert!(backend.cache_shared_geometry(&[0.0, 1.0], &[0, 1, 2]));
        assert!(!backend.cache_shared_geometry(&[0.0, 1.0], &[0, 1, 2]));
        assert_eq!(backend.shared_geometry_bytes(), 2 * 4 + 3 * 2);

        backend.clear_gpu_state();
        assert!(backend.cache_shared_geometry(&[0.0], &[0]));
    }

    #[test]
    fn draws_record_the_bound_buffer() {
        let mut backend = NoopRenderBackend::new();
        backend.begin_frame(false);
        backend.upload_tile_points("tile a", &[1.0, 2.0, 3.0]);
        backend.draw_triangle_strip(0, 3);
        backend.end_frame();

        assert_eq!(backend.draws.len(), 1);
        assert_eq!(backend.draws[0].buffer_key.as_deref(), Some("tile a"));
        assert_eq!(backend.draws[0].kind, DrawKind::TriangleStrip);
        assert_eq!(backend.upload_count, 1);
    }
}
