use gaea_scene::GeomError;
use thiserror::Error;

/// Errors surfaced by layers and renderables during a frame. Frame drawing
/// isolates these per layer so a failing layer cannot take the frame down.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Geometry(#[from] GeomError),

    #[error("renderable failed: {0}")]
    Renderable(String),
}

/// Errors raised while constructing the tessellation machinery.
#[derive(Error, Debug)]
pub enum TessellationError {
    #[error(transparent)]
    Geometry(#[from] GeomError),

    #[error("tile dimensions must be at least 2 cells, got {width}x{height}")]
    TileTooSmall { width: usize, height: usize },
}
