#![warn(
    clippy::unwrap_used,
    clippy::cast_lossless,
    clippy::unimplemented,
    clippy::expect_used
)]

mod draw_context;
mod error;
mod frame_statistics;
mod navigator;
mod pick;
mod plugin;
mod render_backend;
pub mod terrain;
mod world_window;

pub use draw_context::{DrawContext, Layer, OrderedRenderable, SurfaceRenderable};
pub use error::{RenderError, TessellationError};
pub use frame_statistics::FrameStatistics;
pub use navigator::LookAtNavigator;
pub use pick::{PickColor, PickColorReader, PickedObject, PickedObjectList, Rectangle};
pub use plugin::{GlobeCamera, GlobePlugin, GlobeWindow, MeshTerrainBackend, TerrainTileMesh};
pub use render_backend::{DrawKind, NoopRenderBackend, RecordedDraw, TerrainRenderBackend};
pub use world_window::{WorldWindow, WorldWindowConfig};
