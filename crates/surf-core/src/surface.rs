use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use schemars::{JsonSchema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};

use crate::placement::PlacementId;
use crate::time::Timestamp;
use crate::vec3::Vec3;

/// Stable surface identity derived from a quantized centroid.
///
/// Quantizing makes re-detections of the same physical surface map to the
/// same id, but a centroid sitting on a bucket boundary can hash differently
/// from one pass to the next. The registry backs this up with a footprint
/// match, see [`crate::registry::Registry::apply_clusters`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    /// FNV-1a over the integer bucket coordinates of `position`.
    pub fn from_position(position: Vec3, bucket: f32) -> Self {
        let quantize = |v: f32| (v / bucket).round() as i32;
        let cells = [quantize(position.x), quantize(position.y), quantize(position.z)];

        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for cell in cells {
            for byte in cell.to_le_bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
        }
        Self(hash)
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{:016x}", self.0)
    }
}

impl FromStr for SurfaceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix("surface-")
            .ok_or_else(|| format!("surface id must start with 'surface-': {s}"))?;
        u64::from_str_radix(hex, 16)
            .map(SurfaceId)
            .map_err(|e| format!("bad surface id {s}: {e}"))
    }
}

// Serialized as the display string so 64-bit ids survive JSON consumers.
impl Serialize for SurfaceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SurfaceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for SurfaceId {
    fn schema_name() -> Cow<'static, str> {
        "SurfaceId".into()
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> schemars::Schema {
        json_schema!({
            "type": "string",
            "pattern": "^surface-[0-9a-f]{16}$"
        })
    }
}

/// Where a surface's samples came from. Mesh data is trusted more and
/// sampled less often, so it starts more confident and lives longer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SurfaceSource {
    HitTest,
    Mesh,
}

impl SurfaceSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SurfaceSource::HitTest => "hitTest",
            SurfaceSource::Mesh => "mesh",
        }
    }
}

/// Persistent, confidence-scored record of a detected planar region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Surface {
    pub id: SurfaceId,
    pub source: SurfaceSource,
    pub position: Vec3,
    /// Unit normal, oriented upward.
    pub normal: Vec3,
    pub bbox_min: Vec3,
    pub bbox_max: Vec3,
    pub width: f32,
    pub depth: f32,
    pub area: f32,
    /// Saturating trust score in [0, 1].
    pub confidence: f32,
    pub detected_at: Timestamp,
    pub last_seen_at: Timestamp,
    pub last_interaction_at: Timestamp,
    /// Re-detections since creation.
    pub detections: u32,
    pub placement_id: Option<PlacementId>,
    /// Debug highlight progress in [0, 1], advanced once per detection tick.
    pub highlight_progress: f32,
    /// Creation order within the registry.
    pub seq: u64,
}

impl Surface {
    pub fn has_placement(&self) -> bool {
        self.placement_id.is_some()
    }

    /// Grow the footprint to cover `[min, max]` and refresh width/depth/area.
    pub fn extend_footprint(&mut self, min: Vec3, max: Vec3) {
        self.bbox_min = self.bbox_min.min(min);
        self.bbox_max = self.bbox_max.max(max);
        self.width = self.bbox_max.x - self.bbox_min.x;
        self.depth = self.bbox_max.z - self.bbox_min.z;
        self.area = self.width * self.depth;
    }

    /// Whether `point` lies over the footprint (expanded by `margin` in xz)
    /// and within `margin` of the surface height.
    pub fn footprint_contains(&self, point: Vec3, margin: f32) -> bool {
        point.x >= self.bbox_min.x - margin
            && point.x <= self.bbox_max.x + margin
            && point.z >= self.bbox_min.z - margin
            && point.z <= self.bbox_max.z + margin
            && (point.y - self.position.y).abs() < margin
    }

    /// Add `step` to confidence, saturating at 1.0.
    pub fn bump_confidence(&mut self, step: f32) {
        self.confidence = (self.confidence + step.max(0.0)).min(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_surface() -> Surface {
        Surface {
            id: SurfaceId(1),
            source: SurfaceSource::HitTest,
            position: Vec3::new(0.0, 0.75, -1.0),
            normal: Vec3::new(0.0, 1.0, 0.0),
            bbox_min: Vec3::new(-0.2, 0.75, -1.2),
            bbox_max: Vec3::new(0.2, 0.75, -0.8),
            width: 0.4,
            depth: 0.4,
            area: 0.16,
            confidence: 0.25,
            detected_at: 0,
            last_seen_at: 0,
            last_interaction_at: 0,
            detections: 0,
            placement_id: None,
            highlight_progress: 0.0,
            seq: 0,
        }
    }

    #[test]
    fn test_id_stable_within_bucket() {
        let a = SurfaceId::from_position(Vec3::new(0.001, 0.75, -1.002), 0.01);
        let b = SurfaceId::from_position(Vec3::new(-0.003, 0.751, -0.998), 0.01);
        assert_eq!(a, b);
    }

    #[test]
    fn test_id_differs_across_buckets() {
        let a = SurfaceId::from_position(Vec3::new(0.0, 0.75, -1.0), 0.01);
        let b = SurfaceId::from_position(Vec3::new(0.02, 0.75, -1.0), 0.01);
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_display_roundtrip() {
        let id = SurfaceId::from_position(Vec3::new(1.0, 2.0, 3.0), 0.01);
        let text = id.to_string();
        assert!(text.starts_with("surface-"));
        assert_eq!(text.parse::<SurfaceId>().unwrap(), id);
        assert!("table-12".parse::<SurfaceId>().is_err());
    }

    #[test]
    fn test_id_serializes_as_string() {
        let json = serde_json::to_string(&SurfaceId(255)).unwrap();
        assert_eq!(json, "\"surface-00000000000000ff\"");
    }

    #[test]
    fn test_confidence_saturates() {
        let mut s = make_surface();
        for _ in 0..100 {
            s.bump_confidence(0.05);
        }
        assert_eq!(s.confidence, 1.0);
    }

    #[test]
    fn test_negative_step_never_decreases() {
        let mut s = make_surface();
        s.bump_confidence(-0.5);
        assert_eq!(s.confidence, 0.25);
    }

    #[test]
    fn test_extend_footprint_updates_area() {
        let mut s = make_surface();
        s.extend_footprint(Vec3::new(-0.4, 0.75, -1.2), Vec3::new(0.2, 0.75, -0.8));
        assert!((s.width - 0.6).abs() < 1e-6);
        assert!((s.area - 0.24).abs() < 1e-6);
    }

    #[test]
    fn test_footprint_contains() {
        let s = make_surface();
        assert!(s.footprint_contains(Vec3::new(0.25, 0.76, -1.0), 0.1));
        assert!(!s.footprint_contains(Vec3::new(0.35, 0.75, -1.0), 0.1));
        assert!(!s.footprint_contains(Vec3::new(0.0, 0.9, -1.0), 0.1));
    }
}
