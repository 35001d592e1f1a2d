//! Inbound sensor events and outbound detector events.
//!
//! Both are internally tagged on `type` with camelCase names so a JSON-lines
//! stream reads naturally: `{"type":"hitTest","hits":[...]}`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::keyboard::KeyboardTemplate;
use crate::mesh::{MeshPayload, MeshTicket};
use crate::placement::PlacementId;
use crate::quaternion::Quaternion;
use crate::sample::HitPoint;
use crate::surface::{SurfaceId, SurfaceSource};
use crate::time::Timestamp;
use crate::vec3::Vec3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SensorEvent {
    /// Native hit-test results for one frame.
    HitTest { hits: Vec<HitPoint> },
    MeshUpdate(MeshPayload),
    ToggleDetection { enabled: bool },
    /// Headset pose used by subsequent ticks and frames.
    Observer { position: Vec3, forward: Vec3 },
    #[serde(rename_all = "camelCase")]
    KeyPress { placement_id: PlacementId, key: String },
    #[serde(rename_all = "camelCase")]
    Capabilities { hit_test: bool, mesh: bool },
    SessionEnded,
}

impl SensorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SensorEvent::HitTest { .. } => "hitTest",
            SensorEvent::MeshUpdate(_) => "meshUpdate",
            SensorEvent::ToggleDetection { .. } => "toggleDetection",
            SensorEvent::Observer { .. } => "observer",
            SensorEvent::KeyPress { .. } => "keyPress",
            SensorEvent::Capabilities { .. } => "capabilities",
            SensorEvent::SessionEnded => "sessionEnded",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RemovalReason {
    SurfaceExpired,
    Evicted,
    SessionEnded,
}

impl RemovalReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RemovalReason::SurfaceExpired => "surfaceExpired",
            RemovalReason::Evicted => "evicted",
            RemovalReason::SessionEnded => "sessionEnded",
        }
    }
}

/// Ask the platform for a scene mesh. The answer must echo `ticket`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeshRequest {
    pub ticket: MeshTicket,
    pub requested_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DetectorEvent {
    #[serde(rename_all = "camelCase")]
    SurfaceDetected {
        surface_id: SurfaceId,
        source: SurfaceSource,
        position: Vec3,
        area: f32,
        confidence: f32,
    },
    #[serde(rename_all = "camelCase")]
    SurfaceLost { surface_id: SurfaceId },
    #[serde(rename_all = "camelCase")]
    PlacementCreated {
        placement_id: PlacementId,
        surface_id: SurfaceId,
        position: Vec3,
        rotation: Quaternion,
        /// `rotation` as intrinsic XYZ Euler angles.
        #[serde(default)]
        euler_degrees: Vec3,
        template: KeyboardTemplate,
    },
    #[serde(rename_all = "camelCase")]
    PlacementRemoved {
        placement_id: PlacementId,
        surface_id: SurfaceId,
        reason: RemovalReason,
    },
    #[serde(rename_all = "camelCase")]
    PlacementMoved {
        placement_id: PlacementId,
        position: Vec3,
        rotation: Quaternion,
        #[serde(default)]
        euler_degrees: Vec3,
    },
    #[serde(rename_all = "camelCase")]
    PlacementActiveChanged { placement_id: PlacementId, is_active: bool },
    #[serde(rename_all = "camelCase")]
    PlacementVisibilityChanged { placement_id: PlacementId, is_visible: bool },
    /// A companion screen should be opened above a new placement.
    #[serde(rename_all = "camelCase")]
    ScreenRequested { placement_id: PlacementId, position: Vec3 },
    #[serde(rename_all = "camelCase")]
    KeyInput { placement_id: PlacementId, key: String },
    MeshRequested(MeshRequest),
}

impl DetectorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DetectorEvent::SurfaceDetected { .. } => "surfaceDetected",
            DetectorEvent::SurfaceLost { .. } => "surfaceLost",
            DetectorEvent::PlacementCreated { .. } => "placementCreated",
            DetectorEvent::PlacementRemoved { .. } => "placementRemoved",
            DetectorEvent::PlacementMoved { .. } => "placementMoved",
            DetectorEvent::PlacementActiveChanged { .. } => "placementActiveChanged",
            DetectorEvent::PlacementVisibilityChanged { .. } => "placementVisibilityChanged",
            DetectorEvent::ScreenRequested { .. } => "screenRequested",
            DetectorEvent::KeyInput { .. } => "keyInput",
            DetectorEvent::MeshRequested(_) => "meshRequested",
        }
    }
}
