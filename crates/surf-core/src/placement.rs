//! PlacementPolicy: decides which surfaces receive a keyboard.
//!
//! Runs once per detection tick. Each surface without a placement is checked
//! in creation order; at capacity the longest-idle placement is evicted only
//! if it has been idle past the grace period, otherwise creation waits for a
//! later tick.

use std::borrow::Cow;
use std::fmt;

use schemars::{JsonSchema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DetectorConfig;
use crate::constants::{EPSILON, UP};
use crate::event::{DetectorEvent, RemovalReason};
use crate::keyboard::KeyboardTemplate;
use crate::pose::{ObserverPose, solve_surface_pose};
use crate::quaternion::Quaternion;
use crate::registry::Registry;
use crate::surface::{Surface, SurfaceId};
use crate::time::{Timestamp, elapsed};
use crate::vec3::Vec3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlacementId(pub Uuid);

impl PlacementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlacementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlacementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl JsonSchema for PlacementId {
    fn schema_name() -> Cow<'static, str> {
        "PlacementId".into()
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> schemars::Schema {
        json_schema!({
            "type": "string",
            "format": "uuid"
        })
    }
}

/// A keyboard resting on exactly one surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub id: PlacementId,
    pub surface_id: SurfaceId,
    pub position: Vec3,
    pub rotation: Quaternion,
    pub created_at: Timestamp,
    pub last_interaction_at: Timestamp,
    pub is_active: bool,
    pub is_visible: bool,
    pub template: KeyboardTemplate,
    pub seq: u64,
}

impl Placement {
    pub fn idle_for(&self, now: Timestamp) -> u64 {
        elapsed(now, self.last_interaction_at)
    }
}

/// Whether `surface` may receive a placement given where the observer looks.
pub fn is_eligible(surface: &Surface, observer: &ObserverPose, config: &DetectorConfig) -> bool {
    if surface.has_placement() {
        return false;
    }
    if surface.confidence + EPSILON < config.placement.min_confidence {
        return false;
    }
    if surface.area + EPSILON < config.clustering.min_surface_area {
        return false;
    }
    let (_, alignment) = observer.distance_and_alignment(surface.position);
    alignment > config.placement.ahead_alignment
}

/// Placement to give up when at capacity: oldest interaction, then oldest
/// creation.
pub fn eviction_candidate(placements: &[Placement]) -> Option<&Placement> {
    placements
        .iter()
        .min_by_key(|p| (p.last_interaction_at, p.seq))
}

/// Create placements on every eligible surface the capacity allows.
/// Returns the number created.
pub fn place_on_surfaces(
    registry: &mut Registry,
    observer: &ObserverPose,
    now: Timestamp,
    config: &DetectorConfig,
    events: &mut Vec<DetectorEvent>,
) -> usize {
    let candidates: Vec<SurfaceId> = registry
        .surfaces_by_creation()
        .into_iter()
        .filter(|s| is_eligible(s, observer, config))
        .map(|s| s.id)
        .collect();

    let mut created = 0;
    for surface_id in candidates {
        if registry.placement_count() >= config.placement.max_placements {
            let Some(oldest) = eviction_candidate(registry.placements()) else {
                break;
            };
            if oldest.idle_for(now) <= config.placement.eviction_grace_ms {
                tracing::debug!(
                    "placement capacity {} reached, deferring {surface_id}",
                    config.placement.max_placements
                );
                break;
            }
            let id = oldest.id;
            registry.remove_placement(id, RemovalReason::Evicted, events);
        }
        if create_placement(registry, surface_id, now, config, events).is_some() {
            created += 1;
        }
    }
    created
}

/// Put a keyboard on `surface_id`. `None` if the surface is gone or occupied.
pub fn create_placement(
    registry: &mut Registry,
    surface_id: SurfaceId,
    now: Timestamp,
    config: &DetectorConfig,
    events: &mut Vec<DetectorEvent>,
) -> Option<PlacementId> {
    let surface = registry.surface(surface_id)?;
    if surface.has_placement() {
        return None;
    }
    let pose = solve_surface_pose(
        surface.position,
        surface.normal,
        config.placement.clearance_height,
    );
    let placement = Placement {
        id: PlacementId::new(),
        surface_id,
        position: pose.position,
        rotation: pose.orientation,
        created_at: now,
        last_interaction_at: now,
        is_active: false,
        is_visible: false,
        template: config.placement.keyboard_template,
        seq: 0,
    };
    let id = placement.id;
    let template = placement.template;
    registry.attach_placement(placement, now)?;

    tracing::info!("placed {} keyboard {id} on {surface_id}", template.as_str());
    events.push(DetectorEvent::PlacementCreated {
        placement_id: id,
        surface_id,
        position: pose.position,
        rotation: pose.orientation,
        euler_degrees: pose.orientation.to_euler_degrees(),
        template,
    });
    events.push(DetectorEvent::ScreenRequested {
        placement_id: id,
        position: pose.position + UP * config.placement.screen_offset,
    });
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{registry_with, surface_at};

    fn config() -> DetectorConfig {
        DetectorConfig::default()
    }

    fn ahead() -> ObserverPose {
        ObserverPose::new(Vec3::new(0.0, 1.6, 0.0), Vec3::new(0.0, -0.5, -1.0))
    }

    #[test]
    fn test_low_confidence_not_eligible() {
        let s = surface_at(Vec3::new(0.0, 0.75, -1.0), 0.45);
        assert!(!is_eligible(&s, &ahead(), &config()));
    }

    #[test]
    fn test_threshold_confidence_is_eligible() {
        // 0.25 + 7 * 0.05 accumulates float error just below 0.6
        let mut s = surface_at(Vec3::new(0.0, 0.75, -1.0), 0.25);
        for _ in 0..7 {
            s.bump_confidence(0.05);
        }
        assert!(is_eligible(&s, &ahead(), &config()));
    }

    #[test]
    fn test_surface_behind_not_eligible() {
        let s = surface_at(Vec3::new(0.0, 0.75, 1.0), 0.9);
        assert!(!is_eligible(&s, &ahead(), &config()));
    }

    #[test]
    fn test_small_surface_not_eligible() {
        let mut s = surface_at(Vec3::new(0.0, 0.75, -1.0), 0.9);
        s.area = 0.05;
        assert!(!is_eligible(&s, &ahead(), &config()));
    }

    #[test]
    fn test_creation_emits_placement_then_screen() {
        let mut registry = registry_with(&[(Vec3::new(0.0, 0.75, -1.0), 0.9)]);
        let mut events = Vec::new();
        let created = place_on_surfaces(&mut registry, &ahead(), 1_000, &config(), &mut events);
        assert_eq!(created, 1);
        assert_eq!(events.len(), 2);
        let DetectorEvent::PlacementCreated { position, rotation, .. } = &events[0] else {
            panic!("expected PlacementCreated, got {:?}", events[0]);
        };
        assert!((position.y - 0.77).abs() < 1e-6);
        assert_eq!(*rotation, Quaternion::identity());
        let DetectorEvent::ScreenRequested { position: screen, .. } = &events[1] else {
            panic!("expected ScreenRequested, got {:?}", events[1]);
        };
        assert!((screen.y - 1.17).abs() < 1e-5);
        assert!(registry.check_invariants().is_ok());
    }

    #[test]
    fn test_creation_reports_euler_angles() {
        let mut s = surface_at(Vec3::new(0.0, 0.75, -1.0), 0.9);
        // Tilted 30 degrees about x.
        s.normal = Vec3::new(0.0, 30f32.to_radians().cos(), 30f32.to_radians().sin());
        let id = s.id;
        let snapshot = crate::registry::RegistrySnapshot {
            taken_at: 0,
            surfaces: vec![s],
            placements: Vec::new(),
        };
        let mut registry = Registry::from_snapshot(snapshot, 3).unwrap();
        let mut events = Vec::new();
        create_placement(&mut registry, id, 0, &config(), &mut events).unwrap();
        let DetectorEvent::PlacementCreated {
            rotation,
            euler_degrees,
            ..
        } = &events[0]
        else {
            panic!("expected PlacementCreated, got {:?}", events[0]);
        };
        assert_eq!(*euler_degrees, rotation.to_euler_degrees());
        assert!((euler_degrees.x - 30.0).abs() < 1e-3, "got {euler_degrees:?}");
    }

    #[test]
    fn test_capacity_defers_when_all_recent() {
        let positions: Vec<(Vec3, f32)> = (0..4)
            .map(|i| (Vec3::new(i as f32 * 0.6 - 0.9, 0.75, -1.5), 0.9))
            .collect();
        let mut registry = registry_with(&positions);
        let mut events = Vec::new();
        let observer = ObserverPose::new(Vec3::new(0.0, 1.6, 0.0), Vec3::new(0.0, -0.3, -1.0));
        assert_eq!(place_on_surfaces(&mut registry, &observer, 0, &config(), &mut events), 3);
        assert_eq!(place_on_surfaces(&mut registry, &observer, 10_000, &config(), &mut events), 0);
        assert_eq!(registry.placement_count(), 3);
    }

    #[test]
    fn test_capacity_evicts_idle_oldest() {
        let positions: Vec<(Vec3, f32)> = (0..4)
            .map(|i| (Vec3::new(i as f32 * 0.6 - 0.9, 0.75, -1.5), 0.9))
            .collect();
        let mut registry = registry_with(&positions);
        let observer = ObserverPose::new(Vec3::new(0.0, 1.6, 0.0), Vec3::new(0.0, -0.3, -1.0));
        let mut events = Vec::new();
        place_on_surfaces(&mut registry, &observer, 0, &config(), &mut events);
        let first = registry.placements()[0].id;

        events.clear();
        assert_eq!(place_on_surfaces(&mut registry, &observer, 61_000, &config(), &mut events), 1);
        assert_eq!(registry.placement_count(), 3);
        assert!(registry.placement(first).is_none());
        assert!(matches!(
            events[0],
            DetectorEvent::PlacementRemoved {
                reason: RemovalReason::Evicted,
                ..
            }
        ));
        assert!(registry.check_invariants().is_ok());
    }

    #[test]
    fn test_eviction_tie_breaks_by_creation() {
        let mut registry = registry_with(&[
            (Vec3::new(-0.5, 0.75, -1.0), 0.9),
            (Vec3::new(0.5, 0.75, -1.0), 0.9),
        ]);
        let mut events = Vec::new();
        place_on_surfaces(&mut registry, &ahead(), 0, &config(), &mut events);
        let oldest = eviction_candidate(registry.placements()).unwrap();
        assert_eq!(oldest.seq, registry.placements().iter().map(|p| p.seq).min().unwrap());
    }
}
