use bevy::math::{DMat4, DVec3};
use bevy::prelude::*;
use bevy::render::mesh::{Indices, PrimitiveTopology};

use gaea_scene::math::{Matrix4Ext, Viewport};
use gaea_scene::{Globe, ZeroElevationModel};

use crate::pick::{PickColor, PickColorReader};
use crate::render_backend::{DrawKind, TerrainRenderBackend};
use crate::world_window::{WorldWindow, WorldWindowConfig};

/// Drives a [`WorldWindow`] inside a bevy app: tessellates the globe every
/// frame the window requests one and mirrors the drawn terrain tiles into
/// mesh entities.
pub struct GlobePlugin {
    pub config: WorldWindowConfig,
}

impl Default for GlobePlugin {
    fn default() -> Self {
        Self {
            config: WorldWindowConfig::default(),
        }
    }
}

impl bevy::app::Plugin for GlobePlugin {
    fn build(&self, app: &mut App) {
        let globe = Globe::new(Box::new(ZeroElevationModel));
        let window = match WorldWindow::with_config(
            globe,
            Viewport::new(0.0, 0.0, 800.0, 600.0),
            self.config.clone(),
        ) {
            Ok(window) => window,
            Err(err) => {
                error!("failed to create the world window: {err}");
                return;
            }
        };
        app.insert_resource(GlobeWindow(window));
        app.insert_resource(MeshTerrainBackend::default());
        app.add_startup_system(setup_scene_camera);
        app.add_system(draw_world_window);
        app.add_system(sync_terrain_meshes.after(draw_world_window));
        app.add_system(sync_scene_camera.after(draw_world_window));
    }
}

/// The [`WorldWindow`] as a bevy resource.
#[derive(Resource)]
pub struct GlobeWindow(pub WorldWindow);

/// Marks the camera entity steered by the world window's navigator.
#[derive(Component)]
pub struct GlobeCamera;

/// Marks a mesh entity mirroring one terrain tile draw.
#[derive(Component)]
pub struct TerrainTileMesh;

struct TileDraw {
    points: Vec<f32>,
    indices: Vec<u16>,
    tex_coords: Vec<f32>,
    transform: DMat4,
    kind: DrawKind,
}

/// A backend that retains each frame's tile draws so a bevy system can turn
/// them into meshes. Pick color readback is unavailable; picks resolve
/// through the terrain ray intersection instead.
#[derive(Resource, Default)]
pub struct MeshTerrainBackend {
    tex_coords: Vec<f32>,
    indices: Vec<u16>,
    tile_buffers: bevy::utils::HashMap<String, Vec<f32>>,
    bound_buffer: Option<String>,
    transform: DMat4,
    picking: bool,
    draws: Vec<TileDraw>,
    frame_drawn: bool,
}

impl MeshTerrainBackend {
    fn record(&mut self, kind: DrawKind, first_index: usize, index_count: usize) {
        if self.picking {
            return;
        }
        let Some(key) = self.bound_buffer.as_ref() else {
            return;
        };
        let Some(points) = self.tile_buffers.get(key) else {
            return;
        };
        let Some(indices) = self.indices.get(first_index..first_index + index_count) else {
            return;
        };
        self.draws.push(TileDraw {
            points: points.clone(),
            indices: indices.to_vec(),
            tex_coords: self.tex_coords.clone(),
            transform: self.transform,
            kind,
        });
    }
}

impl PickColorReader for MeshTerrainBackend {
    fn read_pick_color(&self, _x: f64, _y: f64) -> Option<PickColor> {
        return None;
    }
}

impl TerrainRenderBackend for MeshTerrainBackend {
    fn begin_frame(&mut self, picking: bool) {
        self.picking = picking;
        if !picking {
            self.draws.clear();
        }
    }

    fn end_frame(&mut self) {
        self.bound_buffer = None;
        if !self.picking {
            self.frame_drawn = true;
        }
    }

    fn clear_frame(&mut self, _clear_color: PickColor) {}

    fn cache_shared_geometry(&mut self, tex_coords: &[f32], indices: &[u16]) -> bool {
        if !self.indices.is_empty() {
            return false;
        }
        self.tex_coords = tex_coords.to_vec();
        self.indices = indices.to_vec();
        return true;
    }

    fn has_tile_buffer(&self, key: &str) -> bool {
        return self.tile_buffers.contains_key(key);
    }

    fn upload_tile_points(&mut self, key: &str, points: &[f32]) {
        self.tile_buffers.insert(key.to_string(), points.to_vec());
        self.bound_buffer = Some(key.to_string());
    }

    fn update_tile_points(&mut self, key: &str, points: &[f32]) {
        self.tile_buffers.insert(key.to_string(), points.to_vec());
        self.bound_buffer = Some(key.to_string());
    }

    fn bind_tile_points(&mut self, key: &str) {
        self.bound_buffer = Some(key.to_string());
    }

    fn set_tile_transform(&mut self, modelview_projection: &DMat4) {
        self.transform = *modelview_projection;
    }

    fn set_pick_color(&mut self, _color: PickColor) {}

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
        self.tex_coords.clear();
        self.indices.clear();
        self.tile_buffers.clear();
        self.bound_buffer = None;
        self.draws.clear();
    }
}

fn setup_scene_camera(mut commands: Commands) {
    commands.spawn((Camera3dBundle::default(), GlobeCamera));
}

fn draw_world_window(
    mut globe_window: ResMut<GlobeWindow>,
    mut backend: ResMut<MeshTerrainBackend>,
    primary_window: Query<&Window, With<bevy::window::PrimaryWindow>>,
) {
    if let Ok(window) = primary_window.get_single() {
        globe_window.0.set_viewport(Viewport::new(
            0.0,
            0.0,
            f64::from(window.physical_width().max(1)),
            f64::from(window.physical_height().max(1)),
        ));
    }
    globe_window.0.redraw_if_needed(&mut *backend);
}

/// Keeps the bevy camera at the navigator's eye so the mirrored tile meshes
/// are viewed from the same point the tessellator selected detail for.
fn sync_scene_camera(
    globe_window: Res<GlobeWindow>,
    mut cameras: Query<&mut Transform, With<GlobeCamera>>,
) {
    let eye_matrix = globe_window
        .0
        .draw_context
        .modelview
        .inverse_transformation()
        .as_mat4();
    let eye_transform = Transform::from_matrix(eye_matrix);
    for mut transform in cameras.iter_mut() {
        *transform = eye_transform;
    }
}

fn sync_terrain_meshes(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    mut backend: ResMut<MeshTerrainBackend>,
    globe_window: Res<GlobeWindow>,
    existing: Query<Entity, With<TerrainTileMesh>>,
) {
    if !backend.frame_drawn {
        return;
    }
    backend.frame_drawn = false;

    for entity in existing.iter() {
        commands.entity(entity).despawn_recursive();
    }

    // The recorded transform is modelview-projection times the tile's
    // translation; stripping the frame's modelview-projection back off
    // leaves the tile's placement in model coordinates.
    let Some(inverse_mvp) = globe_window
        .0
        .draw_context
        .modelview_projection
        .try_invert_general()
    else {
        return;
    };

    let material = materials.add(StandardMaterial {
        base_color: Color::rgb(0.2, 0.5, 0.3),
        unlit: true,
        cull_mode: None,
        ..default()
    });

    for draw in backend.draws.drain(..) {
        let mesh = tile_draw_mesh(&draw);
        let translation = (inverse_mvp * draw.transform).col(3).truncate();
        commands.spawn((
            MaterialMeshBundle {
                mesh: meshes.add(mesh),
                material: material.clone(),
                transform: Transform::from_translation(dvec3_to_vec3(translation)),
                ..default()
            },
            TerrainTileMesh,
        ));
    }
}

fn tile_draw_mesh(draw: &TileDraw) -> Mesh {
    let topology = match draw.kind {
        DrawKind::TriangleStrip => PrimitiveTopology::TriangleStrip,
        DrawKind::Lines => PrimitiveTopology::LineList,
        DrawKind::LineLoop => PrimitiveTopology::LineStrip,
    };
    let mut mesh = Mesh::new(topology);

    let positions: Vec<[f32; 3]> = draw
        .points
        .chunks_exact(3)
        .map(|p| [p[0], p[1], p[2]])
        .collect();
    let uvs: Vec<[f32; 2]> = draw
        .tex_coords
        .chunks_exact(2)
        .take(positions.len())
        .map(|t| [t[0], t[1]])
        .collect();
    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, positions);
    mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, uvs);

    let mut indices = draw.indices.clone();
    // A strip cannot express a loop; repeat the first vertex to close it.
    if draw.kind == DrawKind::LineLoop {
        if let Some(first) = indices.first().copied() {
            indices.push(first);
        }
    }
    mesh.set_indices(Some(Indices::U16(indices)));
    return mesh;
}

fn dvec3_to_vec3(v: DVec3) -> Vec3 {
    return Vec3::new(v.x as f32, v.y as f32, v.z as f32);
}
