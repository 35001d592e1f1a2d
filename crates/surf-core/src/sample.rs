//! SampleIngestor: normalizes heterogeneous sensor input into [`Sample`]s.
//!
//! Three paths feed the clusterer: native hit-test points, scene-mesh
//! triangles (see [`crate::mesh`]), and a grid of downward raycasts against
//! known scene geometry when the platform has no hit-testing. All of them
//! drop malformed or non-horizontal input without reporting an error.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{DetectionSection, RaycastSection};
use crate::constants::UP;
use crate::time::Timestamp;
use crate::vec3::Vec3;

/// One normalized environment observation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub position: Vec3,
    /// Unit normal.
    pub normal: Vec3,
    pub captured_at: Timestamp,
}

/// A single platform hit-test result.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HitPoint {
    pub point: Vec3,
    pub normal: Vec3,
}

/// Whether `normal` is close enough to vertical for a table-like surface.
/// Downward-facing normals pass too; they are flipped by [`sample_from_hit`].
pub fn is_horizontal(normal: Vec3, threshold: f32) -> bool {
    normal.dot(UP).abs() > threshold
}

/// Validate one hit and turn it into a sample with an upward unit normal.
pub fn sample_from_hit(
    hit: &HitPoint,
    now: Timestamp,
    detection: &DetectionSection,
) -> Option<Sample> {
    if !hit.point.is_finite() {
        return None;
    }
    let normal = hit.normal.try_normalize()?;
    if !is_horizontal(normal, detection.horizontal_normal_threshold) {
        return None;
    }
    let normal = if normal.y < 0.0 { -normal } else { normal };
    Some(Sample {
        position: hit.point,
        normal,
        captured_at: now,
    })
}

/// Ingest a hit-test batch. Rejected hits are logged at debug level.
pub fn ingest_hits(hits: &[HitPoint], now: Timestamp, detection: &DetectionSection) -> Vec<Sample> {
    let samples: Vec<Sample> = hits
        .iter()
        .filter_map(|hit| sample_from_hit(hit, now, detection))
        .collect();
    let rejected = hits.len() - samples.len();
    if rejected > 0 {
        tracing::debug!("dropped {rejected} of {} hit-test points", hits.len());
    }
    samples
}

// ---------------------------------------------------------------------------
// Raycast fallback
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

/// Known scene geometry that rays can be cast against.
pub trait SceneGeometry {
    /// Nearest intersection along the ray, if any. `direction` is unit length.
    fn raycast(&self, origin: Vec3, direction: Vec3) -> Option<RayHit>;
}

/// Axis-aligned box, e.g. a table top with its legs folded into the volume.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl SceneBox {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Box whose top face is centered at `top_center`.
    pub fn table(top_center: Vec3, width: f32, depth: f32, thickness: f32) -> Self {
        let half = Vec3::new(width / 2.0, 0.0, depth / 2.0);
        Self::new(
            top_center - half - Vec3::new(0.0, thickness, 0.0),
            top_center + half,
        )
    }

    /// Slab-method ray intersection, returning the entry face normal.
    fn intersect(&self, origin: Vec3, direction: Vec3) -> Option<RayHit> {
        let o = origin.to_array();
        let d = direction.to_array();
        let lo = self.min.to_array();
        let hi = self.max.to_array();

        let mut t_near = f32::NEG_INFINITY;
        let mut t_far = f32::INFINITY;
        let mut axis = 0;
        let mut sign = 0.0;

        for i in 0..3 {
            if d[i].abs() < f32::EPSILON {
                if o[i] < lo[i] || o[i] > hi[i] {
                    return None;
                }
                continue;
            }
            let t1 = (lo[i] - o[i]) / d[i];
            let t2 = (hi[i] - o[i]) / d[i];
            let (t_enter, t_exit, face_sign) = if t1 < t2 {
                (t1, t2, -1.0)
            } else {
                (t2, t1, 1.0)
            };
            if t_enter > t_near {
                t_near = t_enter;
                axis = i;
                sign = face_sign;
            }
            t_far = t_far.min(t_exit);
            if t_near > t_far {
                return None;
            }
        }

        if t_near < 0.0 {
            return None;
        }
        let mut n = [0.0; 3];
        n[axis] = sign;
        Some(RayHit {
            point: origin + direction * t_near,
            normal: Vec3::from_array(n),
            distance: t_near,
        })
    }
}

/// A floor plane plus a set of boxes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxScene {
    pub floor_height: f32,
    pub boxes: Vec<SceneBox>,
}

impl BoxScene {
    pub fn new(floor_height: f32) -> Self {
        Self {
            floor_height,
            boxes: Vec::new(),
        }
    }

    pub fn with_box(mut self, b: SceneBox) -> Self {
        self.boxes.push(b);
        self
    }
}

impl SceneGeometry for BoxScene {
    fn raycast(&self, origin: Vec3, direction: Vec3) -> Option<RayHit> {
        let floor = if direction.y.abs() > f32::EPSILON {
            let t = (self.floor_height - origin.y) / direction.y;
            (t >= 0.0).then(|| RayHit {
                point: origin + direction * t,
                normal: UP,
                distance: t,
            })
        } else {
            None
        };

        self.boxes
            .iter()
            .filter_map(|b| b.intersect(origin, direction))
            .chain(floor)
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

/// Cast the fallback ray grid around `observer` and keep elevated horizontal hits.
///
/// The cell directly under the observer is skipped so the user's own
/// position never seeds a surface. Hits within `min_height` of the floor are
/// rejected, which removes the floor plane itself.
pub fn raycast_grid(
    scene: &dyn SceneGeometry,
    observer: Vec3,
    now: Timestamp,
    raycast: &RaycastSection,
    detection: &DetectionSection,
) -> Vec<Sample> {
    let down = Vec3::new(0.0, -1.0, 0.0);
    let n = raycast.grid_size;
    let mut samples = Vec::new();

    for gx in -n..=n {
        for gz in -n..=n {
            if gx == 0 && gz == 0 {
                continue;
            }
            let origin = Vec3::new(
                observer.x + gx as f32 * raycast.grid_spacing,
                observer.y,
                observer.z + gz as f32 * raycast.grid_spacing,
            );
            let Some(hit) = scene.raycast(origin, down) else {
                continue;
            };
            if hit.point.y - raycast.floor_height <= raycast.min_height {
                continue;
            }
            let hit = HitPoint {
                point: hit.point,
                normal: hit.normal,
            };
            if let Some(sample) = sample_from_hit(&hit, now, detection) {
                samples.push(sample);
            }
        }
    }
    samples
}
