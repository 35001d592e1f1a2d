//! Synthetic scenes: jittered hit-test streams and table-top meshes.
//!
//! Drives `surf simulate`, the benches and the integration tests without a
//! headset. Seeded, so a given seed always yields the same stream.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::constants::UP;
use crate::event::SensorEvent;
use crate::mesh::MeshPayload;
use crate::pose::Pose;
use crate::sample::{BoxScene, HitPoint, SceneBox};
use crate::vec3::Vec3;

/// A rectangular horizontal surface in the synthetic room.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Table {
    pub center: Vec3,
    pub width: f32,
    pub depth: f32,
}

impl Table {
    pub fn new(center: Vec3, width: f32, depth: f32) -> Self {
        Self {
            center,
            width,
            depth,
        }
    }

    /// Top face as a `cells × cells` triangle grid in world space.
    pub fn mesh(&self, cells: usize) -> MeshPayload {
        let cells = cells.max(1);
        let x0 = self.center.x - self.width / 2.0;
        let z0 = self.center.z - self.depth / 2.0;
        let dx = self.width / cells as f32;
        let dz = self.depth / cells as f32;
        let y = self.center.y;
        let mut vertices = Vec::with_capacity(cells * cells * 18);
        for i in 0..cells {
            for k in 0..cells {
                let (xa, za) = (x0 + i as f32 * dx, z0 + k as f32 * dz);
                let (xb, zb) = (xa + dx, za + dz);
                vertices.extend_from_slice(&[xa, y, za, xb, y, za, xb, y, zb]);
                vertices.extend_from_slice(&[xa, y, za, xb, y, zb, xa, y, zb]);
            }
        }
        MeshPayload {
            ticket: None,
            pose: Pose::default(),
            vertices,
        }
    }
}

/// Room with tables, sampled by a noisy hit-test cursor.
pub struct SyntheticScene {
    pub tables: Vec<Table>,
    /// Half-width of the uniform position noise added to every hit (m).
    pub jitter: f32,
    /// Fraction of hits that land on a wall instead of a table.
    pub wall_ratio: f32,
    rng: SmallRng,
}

impl SyntheticScene {
    pub fn new(seed: u64) -> Self {
        Self {
            tables: Vec::new(),
            jitter: 0.02,
            wall_ratio: 0.0,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// A desk in front of the default observer and a side table.
    pub fn office(seed: u64) -> Self {
        Self::new(seed)
            .with_table(Table::new(Vec3::new(0.0, 0.75, -1.0), 1.2, 0.6))
            .with_table(Table::new(Vec3::new(1.4, 0.45, -0.6), 0.5, 0.5))
    }

    fn noise(&mut self) -> f32 {
        if self.jitter <= 0.0 {
            return 0.0;
        }
        self.rng.random_range(-self.jitter..=self.jitter)
    }

    /// `count` hits clustered around the center of `table`, each offset by
    /// the scene jitter.
    pub fn hits_near(&mut self, table: usize, count: usize) -> Vec<HitPoint> {
        let Some(t) = self.tables.get(table).copied() else {
            return Vec::new();
        };
        (0..count)
            .map(|_| HitPoint {
                point: t.center + Vec3::new(self.noise(), 0.0, self.noise()),
                normal: UP,
            })
            .collect()
    }

    /// One frame of hit-test results: a point on a random table (or wall).
    pub fn next_hit(&mut self) -> Option<HitPoint> {
        if self.tables.is_empty() {
            return None;
        }
        if self.rng.random_bool(self.wall_ratio.clamp(0.0, 1.0) as f64) {
            return Some(HitPoint {
                point: Vec3::new(self.rng.random_range(-2.0..2.0), 1.2, -3.0),
                normal: Vec3::new(0.0, 0.0, 1.0),
            });
        }
        let t = self.tables[self.rng.random_range(0..self.tables.len())];
        let x = self.rng.random_range(-0.5..=0.5) * t.width;
        let z = self.rng.random_range(-0.5..=0.5) * t.depth;
        Some(HitPoint {
            point: t.center + Vec3::new(x, self.noise(), z),
            normal: UP,
        })
    }

    /// A cursor sweeping `table` in a serpentine, one row per batch, points
    /// at most `step` apart. Only the height is jittered (a quarter of the
    /// scene jitter) so the running centroid keeps up with the cursor.
    pub fn sweep(&mut self, table: usize, step: f32) -> Vec<Vec<HitPoint>> {
        let Some(t) = self.tables.get(table).copied() else {
            return Vec::new();
        };
        if step <= 0.0 || !step.is_finite() {
            return Vec::new();
        }
        let columns = (t.width / step).ceil().max(1.0) as usize;
        let rows = (t.depth / step).ceil().max(1.0) as usize;
        let (dx, dz) = (t.width / columns as f32, t.depth / rows as f32);
        let x0 = t.center.x - t.width / 2.0;
        let z0 = t.center.z - t.depth / 2.0;

        (0..=rows)
            .map(|r| {
                let mut row: Vec<HitPoint> = (0..=columns)
                    .map(|c| HitPoint {
                        point: Vec3::new(
                            x0 + c as f32 * dx,
                            t.center.y + self.noise() * 0.25,
                            z0 + r as f32 * dz,
                        ),
                        normal: UP,
                    })
                    .collect();
                if r % 2 == 1 {
                    row.reverse();
                }
                row
            })
            .collect()
    }

    pub fn next_event(&mut self) -> Option<SensorEvent> {
        self.next_hit().map(|hit| SensorEvent::HitTest { hits: vec![hit] })
    }

    /// Every table top in one scene-mesh payload.
    pub fn mesh(&self, cells: usize) -> MeshPayload {
        let vertices = self
            .tables
            .iter()
            .flat_map(|t| t.mesh(cells).vertices)
            .collect();
        MeshPayload {
            ticket: None,
            pose: Pose::default(),
            vertices,
        }
    }

    /// Same tables as solid boxes for the raycast fallback.
    pub fn box_scene(&self) -> BoxScene {
        self.tables.iter().fold(BoxScene::new(0.0), |scene, t| {
            scene.with_box(SceneBox::table(t.center, t.width, t.depth, 0.04))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SceneGeometry;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = SyntheticScene::office(7);
        let mut b = SyntheticScene::office(7);
        for _ in 0..20 {
            assert_eq!(a.next_hit(), b.next_hit());
        }
    }

    #[test]
    fn test_hits_stay_within_jitter() {
        let mut scene = SyntheticScene::office(1);
        let center = scene.tables[0].center;
        for hit in scene.hits_near(0, 50) {
            assert!((hit.point.x - center.x).abs() <= 0.02 + 1e-6);
            assert!((hit.point.z - center.z).abs() <= 0.02 + 1e-6);
            assert_eq!(hit.point.y, center.y);
        }
    }

    #[test]
    fn test_table_mesh_size() {
        let mesh = Table::new(Vec3::ZERO, 1.0, 1.0).mesh(4);
        assert_eq!(mesh.vertices.len(), 4 * 4 * 18);
    }

    #[test]
    fn test_scene_mesh_holds_every_table() {
        let scene = SyntheticScene::office(0);
        assert_eq!(scene.mesh(4).vertices.len(), 2 * 4 * 4 * 18);
    }

    #[test]
    fn test_box_scene_matches_tables() {
        let scene = SyntheticScene::office(0).box_scene();
        let hit = scene
            .raycast(Vec3::new(0.0, 1.6, -1.0), Vec3::new(0.0, -1.0, 0.0))
            .unwrap();
        assert!((hit.point.y - 0.75).abs() < 1e-5);
    }

    #[test]
    fn test_sweep_covers_table_serpentine() {
        let mut scene = SyntheticScene::office(3);
        let rows = scene.sweep(1, 0.04);
        let t = scene.tables[1];
        assert_eq!(rows.len(), 14);
        assert!(rows.iter().all(|r| r.len() == 14));

        // Odd rows run backwards, so each row starts where the last ended.
        let end = rows[0].last().unwrap().point;
        let start = rows[1][0].point;
        assert!((end.x - start.x).abs() < 1e-5);
        assert!((start.z - end.z - 0.5 / 13.0).abs() < 1e-5);

        let xs: Vec<f32> = rows.iter().flatten().map(|h| h.point.x).collect();
        let min = xs.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = xs.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert!((max - min - t.width).abs() < 1e-4);
        for hit in rows.iter().flatten() {
            assert!((hit.point.y - t.center.y).abs() <= 0.005 + 1e-6);
        }
    }

    #[test]
    fn test_sweep_rejects_bad_step() {
        let mut scene = SyntheticScene::office(3);
        assert!(scene.sweep(0, 0.0).is_empty());
        assert!(scene.sweep(9, 0.04).is_empty());
    }

    #[test]
    fn test_empty_scene_has_no_hits() {
        assert!(SyntheticScene::new(0).next_hit().is_none());
    }
}
