//! Spatial surface detection and placement lifecycle engine.
//!
//! Turns a noisy stream of hit-test points, scene-mesh triangles or raycast
//! fallbacks into a small set of stable, confidence-scored surfaces, and
//! manages a capacity-bounded pool of virtual keyboards placed on them,
//! kept visible relative to a moving observer.
//!
//! Zero I/O: every operation takes `now` and returns typed events. Transport
//! and persistence live in `surf-cli` and `surf-store`.

pub mod cluster;
pub mod config;
pub mod constants;
pub mod detector;
pub mod event;
pub mod keyboard;
pub mod mesh;
pub mod placement;
pub mod pose;
pub mod quaternion;
pub mod registry;
pub mod sample;
pub mod serde_compat;
pub mod sim;
pub mod surface;
pub mod time;
pub mod vec3;
pub mod visibility;

pub use cluster::{Cluster, SurfaceClusterer};
pub use config::{ConfigError, DetectorConfig};
pub use constants::{EPSILON, UP};
pub use detector::{Capabilities, SurfaceDetector};
pub use event::{DetectorEvent, MeshRequest, RemovalReason, SensorEvent};
pub use keyboard::{KeyboardLayout, KeyboardTemplate};
pub use mesh::{MeshPayload, MeshTicket, grow_regions};
pub use placement::{Placement, PlacementId, place_on_surfaces};
pub use pose::{ObserverPose, Pose, solve_surface_pose};
pub use quaternion::Quaternion;
pub use registry::{Registry, RegistrySnapshot};
pub use sample::{BoxScene, HitPoint, Sample, SceneBox, SceneGeometry};
pub use serde_compat::{CURRENT_VERSION, WireError, export_json, import_json};
pub use sim::{SyntheticScene, Table};
pub use surface::{Surface, SurfaceId, SurfaceSource};
pub use time::{Timestamp, now_unix_millis};
pub use vec3::Vec3;
pub use visibility::VisibilityGate;
