//! Fixed-width vertex adjacency graph.
//!
//! The graph is derived once from triangle topology and rest positions and is
//! shared read-only by the smoothing filter, the delta precomputation and the
//! per-frame deformer. Each vertex owns exactly `max_neighbors` slots in one
//! flat arena (`vertex * max_neighbors + slot`); unused slots hold
//! [`NO_NEIGHBOR`].
//!
//! # Discovery
//!
//! Vertices duplicated at UV/normal seams share a position but not an index.
//! For each vertex, every vertex coincident with it (squared distance below
//! `min_sqr_distance`) contributes the other two corners of each triangle it
//! belongs to. A triangle is consumed the first time it matches, and
//! neighbors are deduplicated by position so a seam pair is only counted
//! once. Rows are filled in discovery order and truncated to the slot count.

mod store;

pub use store::{AdjacencyStore, JsonFileAdjacencyStore, MemoryAdjacencyStore, load_or_build};

use std::collections::{HashMap, HashSet};

use deltamush_config::{AdjacencySettings, NeighborOverflow};
use glam::Vec3;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::{DeltaMushError, Result};
use crate::mesh::validate_triangles;

/// Slot value meaning "no neighbor".
pub const NO_NEIGHBOR: i32 = -1;

/// Per-vertex neighbor rows of constant width.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjacencyGraph {
    vertex_count: usize,
    max_neighbors: usize,
    slots: Vec<i32>,
    /// `(vertex, true valence)` for rows that lost neighbors to truncation
    overflowed: Vec<(usize, usize)>,
    widest_valence: usize,
}

impl AdjacencyGraph {
    /// Rebuild a graph from its flattened slot array (e.g. from a cache).
    ///
    /// Overflow diagnostics are not stored in the flattened form, so a graph
    /// loaded this way reports none.
    pub fn from_raw(vertex_count: usize, max_neighbors: usize, slots: Vec<i32>) -> Result<Self> {
        if max_neighbors == 0 {
            return Err(DeltaMushError::CacheShape(
                "row width must be at least 1".to_string(),
            ));
        }
        if slots.len() != vertex_count * max_neighbors {
            return Err(DeltaMushError::CacheShape(format!(
                "{} slots cannot form {} rows of {}",
                slots.len(),
                vertex_count,
                max_neighbors
            )));
        }
        if let Some(bad) = slots
            .iter()
            .find(|&&slot| slot < NO_NEIGHBOR || slot as i64 >= vertex_count as i64)
        {
            return Err(DeltaMushError::CacheShape(format!(
                "slot value {} is outside 0..{}",
                bad, vertex_count
            )));
        }

        let widest_valence = slots
            .chunks_exact(max_neighbors)
            .map(|row| row.iter().filter(|&&slot| slot >= 0).count())
            .max()
            .unwrap_or(0);

        Ok(Self {
            vertex_count,
            max_neighbors,
            slots,
            overflowed: Vec::new(),
            widest_valence,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn max_neighbors(&self) -> usize {
        self.max_neighbors
    }

    /// The raw slot row for a vertex, sentinels included.
    pub fn row(&self, vertex: usize) -> &[i32] {
        let start = vertex * self.max_neighbors;
        &self.slots[start..start + self.max_neighbors]
    }

    /// Valid neighbor indices of a vertex, in discovery order.
    pub fn neighbors(&self, vertex: usize) -> impl Iterator<Item = usize> + '_ {
        self.row(vertex)
            .iter()
            .filter(|&&slot| slot >= 0)
            .map(|&slot| slot as usize)
    }

    /// Number of valid neighbors stored for a vertex.
    pub fn valence(&self, vertex: usize) -> usize {
        self.neighbors(vertex).count()
    }

    /// The whole flattened arena.
    pub fn slots(&self) -> &[i32] {
        &self.slots
    }

    /// The arena as bytes, ready for a storage buffer upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.slots)
    }

    /// Vertices whose rows were truncated, with their true valence.
    pub fn overflowed(&self) -> &[(usize, usize)] {
        &self.overflowed
    }

    /// Largest valence discovered, before truncation.
    pub fn widest_valence(&self) -> usize {
        self.widest_valence
    }
}

/// Build the adjacency graph for a mesh.
///
/// This is a load-time operation (roughly linear in vertices times valence
/// thanks to the position grid and incidence lists); never call it per frame.
pub fn build_adjacency(
    positions: &[Vec3],
    triangles: &[[u32; 3]],
    settings: &AdjacencySettings,
) -> Result<AdjacencyGraph> {
    settings.validate()?;
    validate_triangles(triangles, positions.len())?;
    if positions.len() > i32::MAX as usize {
        return Err(DeltaMushError::CacheShape(format!(
            "{} vertices do not fit in 32-bit slots",
            positions.len()
        )));
    }

    let incidence = vertex_triangles(positions.len(), triangles);
    let grid = PositionGrid::new(positions, settings.min_sqr_distance);

    let rows: Vec<Vec<u32>> = (0..positions.len())
        .into_par_iter()
        .map(|vertex| {
            discover_neighbors(
                vertex,
                positions,
                triangles,
                &incidence,
                &grid,
                settings.min_sqr_distance,
            )
        })
        .collect();

    let max_neighbors = settings.max_neighbors;
    let mut slots = vec![NO_NEIGHBOR; positions.len() * max_neighbors];
    let mut overflowed = Vec::new();
    let mut widest_valence = 0;

    for (vertex, found) in rows.iter().enumerate() {
        widest_valence = widest_valence.max(found.len());
        if found.len() > max_neighbors {
            if settings.overflow == NeighborOverflow::Error {
                return Err(DeltaMushError::NeighborOverflow {
                    vertex,
                    found: found.len(),
                    capacity: max_neighbors,
                });
            }
            overflowed.push((vertex, found.len()));
        }

        let row = &mut slots[vertex * max_neighbors..(vertex + 1) * max_neighbors];
        for (slot, &neighbor) in row.iter_mut().zip(found) {
            *slot = neighbor as i32;
        }
    }

    info!(
        "build_adjacency: {} vertices, {} triangles, widest valence {} ({} slots)",
        positions.len(),
        triangles.len(),
        widest_valence,
        max_neighbors
    );
    if !overflowed.is_empty() {
        warn!(
            "build_adjacency: {} vertices have more than {} neighbors (widest {}); extra neighbors dropped",
            overflowed.len(),
            max_neighbors,
            widest_valence
        );
    }

    Ok(AdjacencyGraph {
        vertex_count: positions.len(),
        max_neighbors,
        slots,
        overflowed,
        widest_valence,
    })
}

/// Triangles touching each vertex, in ascending triangle order.
///
/// Walking these lists visits a vertex's triangles in the same order as a
/// full scan of the index buffer would.
fn vertex_triangles(vertex_count: usize, triangles: &[[u32; 3]]) -> Vec<Vec<u32>> {
    let mut incidence = vec![Vec::new(); vertex_count];
    for (t, tri) in triangles.iter().enumerate() {
        for &corner in tri {
            let list: &mut Vec<u32> = &mut incidence[corner as usize];
            if list.last() != Some(&(t as u32)) {
                list.push(t as u32);
            }
        }
    }
    incidence
}

/// Collect the neighbor indices of one vertex in discovery order.
fn discover_neighbors(
    vertex: usize,
    positions: &[Vec3],
    triangles: &[[u32; 3]],
    incidence: &[Vec<u32>],
    grid: &PositionGrid,
    min_sqr_distance: f32,
) -> Vec<u32> {
    let mut found: Vec<u32> = Vec::new();
    let mut consumed: HashSet<u32> = HashSet::new();

    for twin in grid.coincident(vertex, positions, min_sqr_distance) {
        for &t in &incidence[twin] {
            if !consumed.insert(t) {
                continue;
            }

            let [a, b, c] = triangles[t as usize];
            let twin = twin as u32;
            // Later corners win when a degenerate triangle repeats the vertex.
            let others = if c == twin {
                [a, b]
            } else if b == twin {
                [a, c]
            } else {
                [b, c]
            };

            for other in others {
                let p = positions[other as usize];
                let seen = found
                    .iter()
                    .any(|&n| positions[n as usize].distance_squared(p) < min_sqr_distance);
                if !seen {
                    found.push(other);
                }
            }
        }
    }

    found
}

/// Uniform hash grid for coincident-vertex lookup.
///
/// The cell size equals the merge distance, so any coincident pair lies in
/// the same or an adjacent cell.
struct PositionGrid {
    cell_size: f32,
    cells: HashMap<[i64; 3], Vec<u32>>,
}

impl PositionGrid {
    fn new(positions: &[Vec3], min_sqr_distance: f32) -> Self {
        let cell_size = min_sqr_distance.sqrt();
        let mut cells: HashMap<[i64; 3], Vec<u32>> = HashMap::new();
        if cell_size > 0.0 {
            for (i, &p) in positions.iter().enumerate() {
                cells
                    .entry(Self::key(p, cell_size))
                    .or_default()
                    .push(i as u32);
            }
        }
        Self { cell_size, cells }
    }

    /// Out-of-range coordinates saturate to the `i64` limits.
    fn key(p: Vec3, cell_size: f32) -> [i64; 3] {
        let q = (p / cell_size).floor();
        [q.x as i64, q.y as i64, q.z as i64]
    }

    /// Vertices sharing a position with `vertex` (itself included), ascending.
    fn coincident(&self, vertex: usize, positions: &[Vec3], min_sqr_distance: f32) -> Vec<usize> {
        if self.cell_size <= 0.0 {
            return vec![vertex];
        }

        let p = positions[vertex];
        let [x, y, z] = Self::key(p, self.cell_size);
        let mut matches = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let cell = [x.saturating_add(dx), y.saturating_add(dy), z.saturating_add(dz)];
                    let Some(bucket) = self.cells.get(&cell) else {
                        continue;
                    };
                    matches.extend(bucket.iter().map(|&i| i as usize).filter(|&i| {
                        i == vertex || positions[i].distance_squared(p) < min_sqr_distance
                    }));
                }
            }
        }
        // Saturated keys can visit the same cell twice
        matches.sort_unstable();
        matches.dedup();
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smoothing::LaplacianFilter;
    use crate::test_meshes;
    use deltamush_config::FilterKind;

    #[test]
    fn test_tetrahedron_neighbors() {
        let (positions, triangles) = test_meshes::tetrahedron();
        let graph = build_adjacency(&positions, &triangles, &AdjacencySettings::default()).unwrap();

        assert_eq!(graph.vertex_count(), 4);
        assert_eq!(graph.max_neighbors(), 16);
        for v in 0..4 {
            let mut neighbors: Vec<usize> = graph.neighbors(v).collect();
            neighbors.sort_unstable();
            let expected: Vec<usize> = (0..4).filter(|&n| n != v).collect();
            assert_eq!(neighbors, expected, "vertex {v}");
            assert_eq!(graph.row(v).len(), 16);
            assert!(graph.row(v)[3..].iter().all(|&s| s == NO_NEIGHBOR));
        }
        assert!(graph.overflowed().is_empty());
        assert_eq!(graph.widest_valence(), 3);
    }

    #[test]
    fn test_discovery_order() {
        // Vertex 0 meets 1, 2 in the first triangle and 3 in the second.
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(-1.0, 0.5, 0.0)];
        let triangles = vec![[0, 1, 2], [0, 2, 3]];
        let graph = build_adjacency(&positions, &triangles, &AdjacencySettings::default()).unwrap();
        assert_eq!(graph.neighbors(0).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(graph.neighbors(2).collect::<Vec<_>>(), vec![0, 1, 3]);
    }

    #[test]
    fn test_truncation_keeps_first_in_discovery_order() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(-1.0, 0.5, 0.0)];
        let triangles = vec![[0, 1, 2], [0, 2, 3]];
        let settings = AdjacencySettings::with_max_neighbors(2);
        let graph = build_adjacency(&positions, &triangles, &settings).unwrap();

        assert_eq!(graph.row(0), &[1, 2]);
        assert_eq!(graph.overflowed(), &[(0, 3), (2, 3)]);
        assert_eq!(graph.widest_valence(), 3);

        // Smoothing only sees the kept neighbors; both sit at distance 1
        for filter in [FilterKind::Uniform, FilterKind::DistanceWeighted] {
            let smoothed = filter.smooth(&positions, &graph).unwrap();
            assert!(
                (smoothed[0] - Vec3::new(0.5, 0.5, 0.0)).length() < 1e-6,
                "{filter:?}: {}",
                smoothed[0]
            );
        }
    }

    #[test]
    fn test_strict_overflow_errors() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(-1.0, 0.5, 0.0)];
        let triangles = vec![[0, 1, 2], [0, 2, 3]];
        let settings = AdjacencySettings {
            max_neighbors: 2,
            overflow: NeighborOverflow::Error,
            ..Default::default()
        };
        let err = build_adjacency(&positions, &triangles, &settings).unwrap_err();
        assert!(matches!(
            err,
            DeltaMushError::NeighborOverflow {
                vertex: 0,
                found: 3,
                capacity: 2
            }
        ));
    }

    #[test]
    fn test_seam_vertices_share_neighbors() {
        let (positions, triangles) = test_meshes::seam_split_quad();
        let graph = build_adjacency(&positions, &triangles, &AdjacencySettings::default()).unwrap();

        // Vertex 1 and its seam twin 4 see the same neighborhood, and the
        // seam copy of vertex 3 (index 5) is not counted twice.
        let row1: Vec<usize> = graph.neighbors(1).collect();
        let row4: Vec<usize> = graph.neighbors(4).collect();
        assert_eq!(row1, vec![0, 3, 2]);
        assert_eq!(row1, row4);
    }

    #[test]
    fn test_tiny_merge_distance_far_from_origin() {
        // Cell keys saturate at both ends of the i64 range
        let positions = vec![
            Vec3::new(1.0e4, 0.0, 0.0),
            Vec3::new(1.0e4 + 1.0, 0.0, 0.0),
            Vec3::new(1.0e4, 1.0, 0.0),
            Vec3::new(-1.0e4, 0.0, -1.0e4),
            Vec3::new(-1.0e4 - 1.0, 0.0, -1.0e4),
            Vec3::new(-1.0e4, -1.0, -1.0e4),
        ];
        let triangles = vec![[0, 1, 2], [3, 4, 5]];
        let settings = AdjacencySettings {
            min_sqr_distance: 1e-30,
            ..Default::default()
        };
        let graph = build_adjacency(&positions, &triangles, &settings).unwrap();

        assert_eq!(graph.neighbors(0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(graph.neighbors(1).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(graph.neighbors(3).collect::<Vec<_>>(), vec![4, 5]);
        assert!(graph.overflowed().is_empty());
    }

    #[test]
    fn test_isolated_vertex_has_empty_row() {
        let (mut positions, triangles) = test_meshes::tetrahedron();
        positions.push(Vec3::splat(10.0));
        let graph = build_adjacency(&positions, &triangles, &AdjacencySettings::default()).unwrap();
        assert_eq!(graph.valence(4), 0);
        assert!(graph.row(4).iter().all(|&s| s == NO_NEIGHBOR));
    }

    #[test]
    fn test_invalid_triangle_rejected() {
        let positions = vec![Vec3::ZERO, Vec3::X];
        let err = build_adjacency(&positions, &[[0, 1, 2]], &AdjacencySettings::default())
            .unwrap_err();
        assert!(matches!(err, DeltaMushError::TriangleIndexOutOfRange { .. }));
    }

    #[test]
    fn test_from_raw_shape_checks() {
        let graph = AdjacencyGraph::from_raw(2, 2, vec![1, -1, 0, -1]).unwrap();
        assert_eq!(graph.neighbors(0).collect::<Vec<_>>(), vec![1]);
        assert_eq!(graph.widest_valence(), 1);
        assert_eq!(graph.as_bytes().len(), 16);

        assert!(AdjacencyGraph::from_raw(2, 2, vec![1, -1, 0]).is_err());
        assert!(AdjacencyGraph::from_raw(2, 2, vec![5, -1, 0, -1]).is_err());
        assert!(AdjacencyGraph::from_raw(2, 0, vec![]).is_err());
    }
}
