mod bounding_box;
mod elevation;
mod error;
mod frustum;
mod geodetic;
mod globe;
mod level;
pub mod math;
mod memory_cache;
mod plane;
mod projection;
mod sector;
mod tile;
mod tile_key;

pub use bounding_box::*;
pub use elevation::*;
pub use error::*;
pub use frustum::*;
pub use geodetic::*;
pub use globe::*;
pub use level::*;
pub use memory_cache::*;
pub use plane::*;
pub use projection::*;
pub use sector::*;
pub use tile::*;
pub use tile_key::*;
