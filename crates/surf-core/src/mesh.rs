//! Region growing over scene-mesh triangles.
//!
//! Each unassigned near-horizontal triangle seeds a group; vertices coplanar
//! with the seed face (`|n·(v - v0)| < planar_tolerance`) are absorbed by a
//! flood fill over triangle siblings and the neighbouring cells of a uniform
//! spatial hash. Each vertex is visited once, so a pass costs O(V·k) for k vertices
//! per neighbourhood, and `max_vertices` bounds V per mesh update.

use std::collections::{HashMap, VecDeque};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::config::MeshSection;
use crate::pose::Pose;
use crate::sample::is_horizontal;
use crate::surface::SurfaceSource;
use crate::vec3::Vec3;

/// Identifies one mesh request within one detection session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct MeshTicket {
    pub request: u32,
    pub generation: u32,
}

/// Scene mesh: flat `[x, y, z, ...]` triangle soup in the pose's local frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MeshPayload {
    /// Ticket of the request this answers. Unsolicited updates carry none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<MeshTicket>,
    #[serde(default)]
    pub pose: Pose,
    pub vertices: Vec<f32>,
}

impl MeshPayload {
    /// World-space vertices of whole triangles, capped at `max_vertices`.
    /// A trailing partial triangle is dropped.
    pub fn world_vertices(&self, max_vertices: usize) -> Vec<Vec3> {
        let whole = self.vertices.len() / 9 * 3;
        let capped = whole.min(max_vertices / 3 * 3);
        if capped < whole {
            tracing::debug!("mesh update truncated from {whole} to {capped} vertices");
        }
        if whole * 3 < self.vertices.len() {
            tracing::debug!(
                "mesh update has {} trailing floats, dropped",
                self.vertices.len() - whole * 3
            );
        }
        self.vertices[..capped * 3]
            .chunks_exact(3)
            .map(|c| self.pose.transform_point(Vec3::new(c[0], c[1], c[2])))
            .collect()
    }
}

type Cell = (i32, i32, i32);

struct SpatialHash {
    cell_size: f32,
    cells: HashMap<Cell, Vec<usize>>,
}

impl SpatialHash {
    fn build(vertices: &[Vec3], cell_size: f32) -> Self {
        let mut cells: HashMap<Cell, Vec<usize>> = HashMap::new();
        for (i, v) in vertices.iter().enumerate() {
            if v.is_finite() {
                cells.entry(cell_of(*v, cell_size)).or_default().push(i);
            }
        }
        Self { cell_size, cells }
    }

    /// Indices in the 27 cells around `p`.
    fn neighbours(&self, p: Vec3) -> impl Iterator<Item = usize> + '_ {
        let (cx, cy, cz) = cell_of(p, self.cell_size);
        (-1..=1).flat_map(move |dx| {
            (-1..=1).flat_map(move |dy| {
                (-1..=1).flat_map(move |dz| {
                    self.cells
                        .get(&(cx + dx, cy + dy, cz + dz))
                        .into_iter()
                        .flatten()
                        .copied()
                })
            })
        })
    }
}

fn cell_of(p: Vec3, size: f32) -> Cell {
    (
        (p.x / size).floor() as i32,
        (p.y / size).floor() as i32,
        (p.z / size).floor() as i32,
    )
}

/// Upward unit normal of a triangle, `None` if degenerate or non-finite.
pub fn face_normal(v0: Vec3, v1: Vec3, v2: Vec3) -> Option<Vec3> {
    let n = (v1 - v0).cross(v2 - v0).try_normalize()?;
    Some(if n.y < 0.0 { -n } else { n })
}

/// Group coplanar horizontal regions of a triangle soup into clusters.
pub fn grow_regions(
    vertices: &[Vec3],
    mesh: &MeshSection,
    horizontal_threshold: f32,
) -> Vec<Cluster> {
    let hash = SpatialHash::build(vertices, mesh.grow_radius);
    let mut assigned = vec![false; vertices.len()];
    let mut clusters = Vec::new();
    let mut queue = VecDeque::new();

    for tri in vertices.chunks_exact(3).enumerate() {
        let (t, face) = tri;
        let base = t * 3;
        if assigned[base..base + 3].iter().any(|a| *a) {
            continue;
        }
        let Some(normal) = face_normal(face[0], face[1], face[2]) else {
            continue;
        };
        if !is_horizontal(normal, horizontal_threshold) {
            continue;
        }

        let seed = face[0];
        let mut cluster = Cluster::new(SurfaceSource::Mesh, seed, normal);
        assigned[base] = true;
        queue.push_back(base);
        for i in base + 1..base + 3 {
            assigned[i] = true;
            cluster.absorb(vertices[i], normal);
            queue.push_back(i);
        }

        while let Some(i) = queue.pop_front() {
            let from = vertices[i];
            // Triangle siblings first so shared corners bridge adjacent faces.
            let face_start = i / 3 * 3;
            let siblings = face_start..(face_start + 3).min(vertices.len());
            let near = hash
                .neighbours(from)
                .filter(|&j| vertices[j].distance(from) <= mesh.grow_radius);
            for j in siblings.chain(near) {
                if assigned[j] {
                    continue;
                }
                let v = vertices[j];
                if !v.is_finite() || normal.dot(v - seed).abs() >= mesh.planar_tolerance {
                    continue;
                }
                assigned[j] = true;
                cluster.absorb(v, normal);
                queue.push_back(j);
            }
        }

        clusters.push(cluster);
    }

    clusters
}
