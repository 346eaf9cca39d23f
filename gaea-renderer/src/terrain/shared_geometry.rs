use bevy::math::DVec3;

use gaea_scene::Line;

const INTERSECTION_EPSILON: f64 = 1.0e-5;

/// A contiguous span of the shared index buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexRange {
    /// Offset of the first index, in indices.
    pub first: usize,
    pub count: usize,
}

/// Geometry shared by every terrain tile: the texture coordinate grid and a
/// single index buffer holding the interior triangle strip, the border
/// strips at full and half resolution, and the wireframe and outline debug
/// indices. Tiles differ only in their vertex points, so this is built once
/// per tile dimensions.
#[derive(Clone, Debug)]
pub struct SharedGeometry {
    pub tex_coords: Vec<f32>,
    pub indices: Vec<u16>,
    pub base: IndexRange,
    /// Full-resolution border strips, indexed by `Direction::index()`.
    pub borders: [IndexRange; 4],
    /// Half-resolution border strips for edges against a coarser neighbor,
    /// indexed by `Direction::index()`.
    pub lores_borders: [IndexRange; 4],
    pub wireframe: IndexRange,
    pub outline: IndexRange,
}

impl SharedGeometry {
    pub fn new(tile_width: usize, tile_height: usize) -> Self {
        let mut geometry = Self {
            tex_coords: build_tex_coords(tile_width, tile_height),
            indices: Vec::new(),
            base: IndexRange::default(),
            borders: [IndexRange::default(); 4],
            lores_borders: [IndexRange::default(); 4],
            wireframe: IndexRange::default(),
            outline: IndexRange::default(),
        };
        geometry.build_indices(tile_width, tile_height);
        return geometry;
    }

    pub fn indices_for(&self, range: &IndexRange) -> &[u16] {
        return &self.indices[range.first..range.first + range.count];
    }

    fn build_indices(&mut self, tile_width: usize, tile_height: usize) {
        let num_lat = tile_height + 1;
        let num_lon = tile_width + 1;
        let indices = &mut self.indices;

        // The interior grid: a strip between each pair of adjacent vertex
        // columns, one vertex row in from every border, the columns joined
        // by two degenerate triangles.
        for lon_index in 1..num_lon - 2 {
            let mut vertex_index = 0;
            for lat_index in 1..num_lat - 1 {
                vertex_index = lon_index + lat_index * num_lon;
                indices.push(vertex_index as u16);
                indices.push((vertex_index + 1) as u16);
            }
            indices.push((vertex_index + 1) as u16);
            indices.push((lon_index + 1 + num_lon) as u16);
        }
        let num_base = 2 * (num_lat - 3) * (num_lon - 2) + 2 * (num_lat - 3);
        self.base = IndexRange {
            first: indices.len() - num_base,
            count: num_base,
        };

        // Full-resolution border strips joining the interior to each edge.
        // North: east corner, then pairs of (border, interior) vertices
        // moving west.
        let border_count = |n: usize| 2 * n - 2;
        let mut first = indices.len();
        let top_row = (num_lat - 1) * num_lon;
        indices.push((top_row + num_lon - 1) as u16);
        for lon_index in (1..num_lon - 1).rev() {
            let v = top_row + lon_index;
            indices.push(v as u16);
            indices.push((v - num_lon) as u16);
        }
        indices.push(top_row as u16);
        self.borders[north()] = IndexRange {
            first,
            count: border_count(num_lon),
        };

        // South: west corner, pairs moving east.
        first = indices.len();
        indices.push(0);
        for lon_index in 1..num_lon - 1 {
            indices.push(lon_index as u16);
            indices.push((lon_index + num_lon) as u16);
        }
        indices.push((num_lon - 1) as u16);
        self.borders[south()] = IndexRange {
            first,
            count: border_count(num_lon),
        };

        // West: north corner, pairs moving south.
        first = indices.len();
        indices.push(top_row as u16);
        for lat_index in (1..num_lat - 1).rev() {
            let v = lat_index * num_lon;
            indices.push(v as u16);
            indices.push((v + 1) as u16);
        }
        indices.push(0);
        self.borders[west()] = IndexRange {
            first,
            count: border_count(num_lat),
        };

        // East: south corner, pairs moving north.
        first = indices.len();
        indices.push((num_lon - 1) as u16);
        for lat_index in 1..num_lat - 1 {
            let v = lat_index * num_lon + num_lon - 1;
            indices.push(v as u16);
            indices.push((v - 1) as u16);
        }
        indices.push((top_row + num_lon - 1) as u16);
        self.borders[east()] = IndexRange {
            first,
            count: border_count(num_lat),
        };

        // Half-resolution border strips: the border vertex of each pair is
        // snapped to an even grid position so the edge uses every other
        // vertex, matching a neighbor one level coarser.
        first = indices.len();
        indices.push((top_row + num_lon - 1) as u16);
        for lon_index in (1..num_lon - 1).rev() {
            let border = top_row + ((lon_index + 1) & !1usize);
            let interior = top_row + lon_index - num_lon;
            indices.push(border as u16);
            indices.push(interior as u16);
        }
        indices.push(top_row as u16);
        self.lores_borders[north()] = IndexRange {
            first,
            count: border_count(num_lon),
        };

        first = indices.len();
        indices.push(0);
        for lon_index in 1..num_lon - 1 {
            let border = lon_index & !1usize;
            let interior = lon_index + num_lon;
            indices.push(border as u16);
            indices.push(interior as u16);
        }
        indices.push((num_lon - 1) as u16);
        self.lores_borders[south()] = IndexRange {
            first,
            count: border_count(num_lon),
        };

        first = indices.len();
        indices.push(top_row as u16);
        for lat_index in (1..num_lat - 1).rev() {
            let border = ((lat_index + 1) & !1usize) * num_lon;
            let interior = lat_index * num_lon + 1;
            indices.push(border as u16);
            indices.push(interior as u16);
        }
        indices.push(0);
        self.lores_borders[west()] = IndexRange {
            first,
            count: border_count(num_lat),
        };

        first = indices.len();
        indices.push((num_lon - 1) as u16);
        for lat_index in 1..num_lat - 1 {
            let border = (lat_index & !1usize) * num_lon + num_lon - 1;
            let interior = lat_index * num_lon + num_lon - 2;
            indices.push(border as u16);
            indices.push(interior as u16);
        }
        indices.push((top_row + num_lon - 1) as u16);
        self.lores_borders[east()] = IndexRange {
            first,
            count: border_count(num_lat),
        };

        // Wireframe: every horizontal and vertical grid edge as a line pair.
        first = indices.len();
        for lat_index in 0..num_lat {
            for lon_index in 0..tile_width {
                let v = lon_index + lat_index * num_lon;
                indices.push(v as u16);
                indices.push((v + 1) as u16);
            }
        }
        for lon_index in 0..num_lon {
            for lat_index in 0..tile_height {
                let v = lon_index + lat_index * num_lon;
                indices.push(v as u16);
                indices.push((v + num_lon) as u16);
            }
        }
        self.wireframe = IndexRange {
            first,
            count: 2 * tile_width * num_lat + 2 * tile_height * num_lon,
        };

        // Outline: the tile perimeter as a line loop.
        for lon_index in 0..num_lon {
            indices.push(lon_index as u16);
        }
        for lat_index in 1..num_lat {
            indices.push((lat_index * num_lon + num_lon - 1) as u16);
        }
        for lon_index in (0..num_lon - 1).rev() {
            indices.push((top_row + lon_index) as u16);
        }
        for lat_index in (1..num_lat - 1).rev() {
            indices.push((lat_index * num_lon) as u16);
        }
        let outline_count = 2 * (num_lat - 2) + 2 * num_lon + 1;
        self.outline = IndexRange {
            first: indices.len() - outline_count,
            count: outline_count,
        };
    }
}

fn north() -> usize {
    return gaea_scene::Direction::North.index();
}

fn south() -> usize {
    return gaea_scene::Direction::South.index();
}

fn east() -> usize {
    return gaea_scene::Direction::East.index();
}

fn west() -> usize {
    return gaea_scene::Direction::West.index();
}

/// The texture coordinate grid: (s, t) per vertex, row-major from the
/// minimum latitude, with the last row and column forced to exactly one.
fn build_tex_coords(tile_width: usize, tile_height: usize) -> Vec<f32> {
    let num_lat = tile_height + 1;
    let num_lon = tile_width + 1;
    let ds = 1.0 / tile_width as f32;
    let dt = 1.0 / tile_height as f32;

    let mut coords = Vec::with_capacity(2 * num_lat * num_lon);
    for row in 0..num_lat {
        let t = if row == num_lat - 1 { 1.0 } else { row as f32 * dt };
        for col in 0..num_lon {
            let s = if col == num_lon - 1 { 1.0 } else { col as f32 * ds };
            coords.push(s);
            coords.push(t);
        }
    }
    return coords;
}

/// Appends the intersections of a line with the triangles of an indexed
/// triangle strip. The line's origin must be in the same coordinate frame
/// as the points.
pub fn compute_tri_strip_intersections(
    line: &Line,
    points: &[f32],
    indices: &[u16],
    results: &mut Vec<DVec3>,
) {
    let vertex = |index: u16| {
        let i = 3 * index as usize;
        DVec3::new(points[i] as f64, points[i + 1] as f64, points[i + 2] as f64)
    };

    for i in 2..indices.len() {
        let a = vertex(indices[i - 2]);
        let b = vertex(indices[i - 1]);
        let c = vertex(indices[i]);
        if let Some(intersection) = compute_triangle_intersection(line, &a, &b, &c) {
            results.push(intersection);
        }
    }
}

/// Moller-Trumbore ray/triangle intersection. Degenerate triangles, which
/// the strips use to join columns, yield a near-zero determinant and are
/// skipped.
pub fn compute_triangle_intersection(
    line: &Line,
    a: &DVec3,
    b: &DVec3,
    c: &DVec3,
) -> Option<DVec3> {
    let edge1 = *b - *a;
    let edge2 = *c - *a;

    let p = line.direction.cross(edge2);
    let det = edge1.dot(p);
    if det > -INTERSECTION_EPSILON && det < INTERSECTION_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;

    let t_vec = line.origin - *a;
    let u = t_vec.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = t_vec.cross(edge1);
    let v = line.direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = edge2.dot(q) * inv_det;
    if t < 0.0 {
        return None;
    }

    return Some(line.point_at(t));
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaea_scene::Direction;

    #[test]
    fn index_ranges_tile_a_32_by_32_grid() {
        let geometry = SharedGeometry::new(32, 32);
        let num_lat = 33;
        let num_lon = 33;

        assert_eq!(geometry.tex_coords.len(), 2 * num_lat * num_lon);
        assert_eq!(
            geometry.base.count,
            2 * (num_lat - 3) * (num_lon - 2) + 2 * (num_lat - 3)
        );
        for direction in Direction::ALL {
            assert_eq!(geometry.borders[direction.index()].count, 2 * 33 - 2);
            assert_eq!(geometry.lores_borders[direction.index()].count, 2 * 33 - 2);
        }
        assert_eq!(
            geometry.wireframe.count,
            2 * 32 * num_lat + 2 * 32 * num_lon
        );
        assert_eq!(geometry.outline.count, 2 * (num_lat - 2) + 2 * num_lon + 1);

        // Every index addresses a vertex of the grid.
        let num_vertices = (num_lat * num_lon) as u16;
        assert!(geometry.indices.iter().all(|&i| i < num_vertices));
    }

    #[test]
    fn last_tex_coord_row_and_column_are_exactly_one() {
        let geometry = SharedGeometry::new(32, 32);
        let num_lon = 33;
        // Last vertex of the first row.
        assert_eq!(geometry.tex_coords[2 * (num_lon - 1)], 1.0);
        // First vertex of the last row.
        let last_row = 2 * (num_lon * 32);
        assert_eq!(geometry.tex_coords[last_row + 1], 1.0);
    }

    #[test]
    fn lores_borders_use_every_other_edge_vertex() {
        let geometry = SharedGeometry::new(4, 4);
        let south = geometry.indices_for(&geometry.lores_borders[Direction::South.index()]);
        // Border vertices (even positions in the strip) sit on even columns
        // of the south row.
        for pair in south[1..south.len() - 1].chunks(2) {
            assert_eq!(pair[0] % 2, 0);
            assert!(pair[0] < 5);
        }
    }

    #[test]
    fn ray_hits_a_triangle_and_misses_a_degenerate_one() {
        let line = Line::new(DVec3::new(0.25, 0.25, 1.0), DVec3::new(0.0, 0.0, -1.0));
        let a = DVec3::new(0.0, 0.0, 0.0);
        let b = DVec3::new(1.0, 0.0, 0.0);
        let c = DVec3::new(0.0, 1.0, 0.0);

        let hit = compute_triangle_intersection(&line, &a, &b, &c).unwrap();
        assert!((hit - DVec3::new(0.25, 0.25, 0.0)).length() < 1e-9);

        // Behind the origin.
        let behind = Line::new(DVec3::new(0.25, 0.25, -1.0), DVec3::new(0.0, 0.0, -1.0));
        assert!(compute_triangle_intersection(&behind, &a, &b, &c).is_none());

        // Degenerate: repeated vertex.
        assert!(compute_triangle_intersection(&line, &a, &a, &c).is_none());
    }

    #[test]
    fn strip_intersections_collect_all_hits() {
        // A flat two-triangle strip in the z = 0 plane.
        let points: Vec<f32> = vec![
            0.0, 0.0, 0.0, // 0
            1.0, 0.0, 0.0, // 1
            0.0, 1.0, 0.0, // 2
            1.0, 1.0, 0.0, // 3
        ];
        let indices: Vec<u16> = vec![0, 1, 2, 3];
        let line = Line::new(DVec3::new(0.5, 0.5, 2.0), DVec3::new(0.0, 0.0, -1.0));

        let mut results = Vec::new();
        compute_tri_strip_intersections(&line, &points, &indices, &mut results);
        assert!(!results.is_empty());
        for hit in &results {
            assert!(hit.z.abs() < 1e-9);
        }
    }
}
