mod shared_geometry;
#[allow(clippy::module_inception)]
mod terrain;
mod terrain_tile;
mod terrain_tile_list;
mod tessellator;

pub use shared_geometry::*;
pub use terrain::*;
pub use terrain_tile::*;
pub use terrain_tile_list::*;
pub use tessellator::*;
