//! JSON export format for registry snapshots.
//!
//! The wire format uses camelCase field names, stores quaternions as
//! `[w, x, y, z]` and vectors as `[x, y, z]` arrays so renderers can feed
//! them straight into a transform.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::keyboard::KeyboardTemplate;
use crate::placement::{Placement, PlacementId};
use crate::quaternion::Quaternion;
use crate::registry::{Registry, RegistrySnapshot};
use crate::surface::{Surface, SurfaceId, SurfaceSource};
use crate::time::{Timestamp, unix_millis_to_iso8601};
use crate::vec3::Vec3;

pub const CURRENT_VERSION: &str = "1.0";

#[derive(Debug)]
pub enum WireError {
    Json(serde_json::Error),
    Version(String),
    Invalid(String),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Json(e) => write!(f, "JSON error: {e}"),
            WireError::Version(v) => {
                write!(f, "unsupported export version {v} (expected {CURRENT_VERSION})")
            }
            WireError::Invalid(msg) => write!(f, "invalid export: {msg}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Json(e)
    }
}

// --- Wire format types ---

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WireExport {
    pub version: String,
    #[serde(default)]
    pub timestamp: String,
    pub taken_at: Timestamp,
    pub surfaces: Vec<WireSurface>,
    #[serde(default)]
    pub placements: Vec<WirePlacement>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WireSurface {
    pub id: SurfaceId,
    pub source: SurfaceSource,
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub bbox_min: [f32; 3],
    pub bbox_max: [f32; 3],
    pub confidence: f32,
    #[serde(default)]
    pub detected_at: Timestamp,
    pub last_seen_at: Timestamp,
    #[serde(default)]
    pub last_interaction_at: Timestamp,
    #[serde(default)]
    pub detections: u32,
    #[serde(default)]
    pub placement_id: Option<PlacementId>,
    #[serde(default)]
    pub seq: u64,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WirePlacement {
    pub id: PlacementId,
    pub surface_id: SurfaceId,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub created_at: Timestamp,
    pub last_interaction_at: Timestamp,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_visible: bool,
    #[serde(default)]
    pub template: KeyboardTemplate,
    #[serde(default)]
    pub seq: u64,
}

// --- Conversion ---

impl WireExport {
    pub fn from_snapshot(snapshot: &RegistrySnapshot) -> Self {
        WireExport {
            version: CURRENT_VERSION.to_string(),
            timestamp: unix_millis_to_iso8601(snapshot.taken_at),
            taken_at: snapshot.taken_at,
            surfaces: snapshot.surfaces.iter().map(surface_to_wire).collect(),
            placements: snapshot.placements.iter().map(placement_to_wire).collect(),
        }
    }

    pub fn into_snapshot(self) -> Result<RegistrySnapshot, WireError> {
        if self.version != CURRENT_VERSION {
            return Err(WireError::Version(self.version));
        }
        let surfaces = self
            .surfaces
            .into_iter()
            .map(wire_to_surface)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RegistrySnapshot {
            taken_at: self.taken_at,
            surfaces,
            placements: self.placements.into_iter().map(wire_to_placement).collect(),
        })
    }
}

fn surface_to_wire(s: &Surface) -> WireSurface {
    WireSurface {
        id: s.id,
        source: s.source,
        position: s.position.to_array(),
        normal: s.normal.to_array(),
        bbox_min: s.bbox_min.to_array(),
        bbox_max: s.bbox_max.to_array(),
        confidence: s.confidence,
        detected_at: s.detected_at,
        last_seen_at: s.last_seen_at,
        last_interaction_at: s.last_interaction_at,
        detections: s.detections,
        placement_id: s.placement_id,
        seq: s.seq,
    }
}

fn wire_to_surface(w: WireSurface) -> Result<Surface, WireError> {
    let normal = Vec3::from_array(w.normal)
        .try_normalize()
        .ok_or_else(|| WireError::Invalid(format!("surface {} has a zero normal", w.id)))?;
    if !(0.0..=1.0).contains(&w.confidence) {
        return Err(WireError::Invalid(format!(
            "surface {} confidence {} outside [0, 1]",
            w.id, w.confidence
        )));
    }
    let mut surface = Surface {
        id: w.id,
        source: w.source,
        position: Vec3::from_array(w.position),
        normal,
        bbox_min: Vec3::from_array(w.bbox_min),
        bbox_max: Vec3::from_array(w.bbox_max),
        width: 0.0,
        depth: 0.0,
        area: 0.0,
        confidence: w.confidence,
        detected_at: w.detected_at,
        last_seen_at: w.last_seen_at,
        last_interaction_at: w.last_interaction_at,
        detections: w.detections,
        placement_id: w.placement_id,
        highlight_progress: 1.0,
        seq: w.seq,
    };
    // Derived sizes are recomputed rather than trusted.
    surface.extend_footprint(surface.bbox_min, surface.bbox_max);
    Ok(surface)
}

fn placement_to_wire(p: &Placement) -> WirePlacement {
    WirePlacement {
        id: p.id,
        surface_id: p.surface_id,
        position: p.position.to_array(),
        rotation: p.rotation.to_array(),
        created_at: p.created_at,
        last_interaction_at: p.last_interaction_at,
        is_active: p.is_active,
        is_visible: p.is_visible,
        template: p.template,
        seq: p.seq,
    }
}

fn wire_to_placement(w: WirePlacement) -> Placement {
    Placement {
        id: w.id,
        surface_id: w.surface_id,
        position: Vec3::from_array(w.position),
        rotation: Quaternion::from_array(w.rotation),
        created_at: w.created_at,
        last_interaction_at: w.last_interaction_at,
        is_active: w.is_active,
        is_visible: w.is_visible,
        template: w.template,
        seq: w.seq,
    }
}

/// Import a JSON export and rebuild a registry, checking its invariants.
pub fn import_json(json: &str, max_placements: usize) -> Result<Registry, WireError> {
    let wire: WireExport = serde_json::from_str(json)?;
    let snapshot = wire.into_snapshot()?;
    Registry::from_snapshot(snapshot, max_placements).map_err(WireError::Invalid)
}

/// Export a snapshot to pretty-printed JSON.
pub fn export_json(snapshot: &RegistrySnapshot) -> Result<String, WireError> {
    Ok(serde_json::to_string_pretty(&WireExport::from_snapshot(snapshot))?)
}
