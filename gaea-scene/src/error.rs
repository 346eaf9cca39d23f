/// Programmer-error argument violations. Numeric degeneracy (singular
/// matrices, zero divisors) is reported through `Option`/`bool` returns
/// instead, so callers can skip the affected operation for a frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeomError {
    #[error("viewport width must be positive, got {0}")]
    InvalidWidth(f64),
    #[error("viewport height must be positive, got {0}")]
    InvalidHeight(f64),
    #[error("near and far clip distances must be positive and distinct (near {near}, far {far})")]
    InvalidClipDistances { near: f64, far: f64 },
    #[error("range must be non-negative, got {0}")]
    NegativeRange(f64),
    #[error("tile row {row} or column {column} out of range at level {level}")]
    TileAddressOutOfRange { level: usize, row: u32, column: u32 },
    #[error("grid dimensions must be at least 1x1, got {num_lat}x{num_lon}")]
    InvalidGridSize { num_lat: usize, num_lon: usize },
    #[error("array of length {got} is too short, need at least {need}")]
    ArrayTooShort { need: usize, got: usize },
    #[error("level set requires at least one level")]
    EmptyLevelSet,
    #[error("point list must contain at least one point")]
    EmptyPointList,
}
