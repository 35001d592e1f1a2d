//! SurfaceRegistry: the single owner of surfaces and placements.
//!
//! Every mutation that touches both collections goes through a method here,
//! so the cross-links (`Surface::placement_id`, `Placement::surface_id`) and
//! the capacity bound cannot drift apart.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::config::DetectorConfig;
use crate::constants::EPSILON;
use crate::event::{DetectorEvent, RemovalReason};
use crate::placement::{Placement, PlacementId};
use crate::pose::solve_surface_pose;
use crate::surface::{Surface, SurfaceId, SurfaceSource};
use crate::time::{Timestamp, elapsed};

/// What one cluster resolved to during a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Existing(SurfaceId),
    New(SurfaceId),
}

struct Resolved {
    target: Target,
    cluster: Cluster,
    inputs: Vec<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct Registry {
    surfaces: BTreeMap<SurfaceId, Surface>,
    placements: Vec<Placement>,
    next_seq: u64,
}

/// Point-in-time copy of the registry for readers outside the detector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub taken_at: Timestamp,
    pub surfaces: Vec<Surface>,
    pub placements: Vec<Placement>,
}

impl RegistrySnapshot {
    pub fn active_placement(&self) -> Option<&Placement> {
        self.placements.iter().find(|p| p.is_active)
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &Surface> {
        self.surfaces.values()
    }

    pub fn surfaces_by_creation(&self) -> Vec<&Surface> {
        let mut surfaces: Vec<&Surface> = self.surfaces.values().collect();
        surfaces.sort_by_key(|s| s.seq);
        surfaces
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    pub fn placement(&self, id: PlacementId) -> Option<&Placement> {
        self.placements.iter().find(|p| p.id == id)
    }

    /// Placements in creation order.
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub(crate) fn placements_mut(&mut self) -> &mut [Placement] {
        &mut self.placements
    }

    pub fn placement_count(&self) -> usize {
        self.placements.len()
    }

    pub fn active_placement(&self) -> Option<&Placement> {
        self.placements.iter().find(|p| p.is_active)
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty() && self.placements.is_empty()
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Resolve a cluster to the surface it re-detects, or the id it would
    /// get if promoted.
    fn resolve(&self, cluster: &Cluster, config: &DetectorConfig) -> Target {
        let mean = cluster.mean();
        let id = SurfaceId::from_position(mean, config.clustering.id_quantization);
        if self.surfaces.contains_key(&id) {
            return Target::Existing(id);
        }
        let margin = config.clustering.merge_threshold;
        match self
            .surfaces_by_creation()
            .into_iter()
            .find(|s| s.footprint_contains(mean, margin))
        {
            Some(existing) => Target::Existing(existing.id),
            None => Target::New(id),
        }
    }

    /// Apply one clustering pass.
    ///
    /// Returns, per input cluster, whether it produced a registry update
    /// (creation or re-detection). Clusters that resolve to the same surface
    /// are merged first, so a surface gains at most one confidence step per
    /// pass.
    pub fn apply_clusters(
        &mut self,
        clusters: &[Cluster],
        now: Timestamp,
        config: &DetectorConfig,
        events: &mut Vec<DetectorEvent>,
    ) -> Vec<bool> {
        let mut resolved: Vec<Resolved> = Vec::new();
        for (i, cluster) in clusters.iter().enumerate() {
            if cluster.member_count == 0 || !cluster.mean().is_finite() {
                continue;
            }
            let target = self.resolve(cluster, config);
            match resolved.iter_mut().find(|r| r.target == target) {
                Some(r) => {
                    r.cluster.merge(cluster);
                    r.inputs.push(i);
                }
                None => resolved.push(Resolved {
                    target,
                    cluster: cluster.clone(),
                    inputs: vec![i],
                }),
            }
        }

        let mut consumed = vec![false; clusters.len()];
        for r in resolved {
            let applied = match r.target {
                Target::Existing(id) => {
                    self.redetect(id, &r.cluster, now, config, events);
                    true
                }
                Target::New(id) => self.promote(id, &r.cluster, now, config, events),
            };
            if applied {
                for i in r.inputs {
                    consumed[i] = true;
                }
            }
        }
        consumed
    }

    /// Whether an unmatched cluster is solid enough to become a surface.
    pub fn qualifies(cluster: &Cluster, config: &DetectorConfig) -> bool {
        let min_members = match cluster.source {
            SurfaceSource::HitTest => config.clustering.min_cluster_members,
            SurfaceSource::Mesh => 3,
        };
        cluster.member_count >= min_members
            && cluster.area() + EPSILON >= config.clustering.min_surface_area
    }

    fn promote(
        &mut self,
        id: SurfaceId,
        cluster: &Cluster,
        now: Timestamp,
        config: &DetectorConfig,
        events: &mut Vec<DetectorEvent>,
    ) -> bool {
        if !Self::qualifies(cluster, config) {
            return false;
        }
        let confidence = match cluster.source {
            SurfaceSource::HitTest => (cluster.member_count as f32
                / config.confidence.hit_test_full_confidence_members)
                .min(1.0),
            SurfaceSource::Mesh => config.confidence.mesh_initial_confidence,
        };
        let seq = self.take_seq();
        let surface = Surface {
            id,
            source: cluster.source,
            position: cluster.mean(),
            normal: cluster.mean_normal(),
            bbox_min: cluster.bbox_min,
            bbox_max: cluster.bbox_max,
            width: cluster.width(),
            depth: cluster.depth(),
            area: cluster.area(),
            confidence,
            detected_at: now,
            last_seen_at: now,
            last_interaction_at: now,
            detections: 0,
            placement_id: None,
            highlight_progress: 0.0,
            seq,
        };
        tracing::info!(
            "new {} surface {id}: area {:.3} m², confidence {:.2}",
            surface.source.as_str(),
            surface.area,
            surface.confidence
        );
        events.push(DetectorEvent::SurfaceDetected {
            surface_id: id,
            source: surface.source,
            position: surface.position,
            area: surface.area,
            confidence: surface.confidence,
        });
        self.surfaces.insert(id, surface);
        true
    }

    fn redetect(
        &mut self,
        id: SurfaceId,
        cluster: &Cluster,
        now: Timestamp,
        config: &DetectorConfig,
        events: &mut Vec<DetectorEvent>,
    ) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        surface.position = surface.position.midpoint(cluster.mean());
        surface.normal = (surface.normal + cluster.mean_normal())
            .try_normalize()
            .unwrap_or(surface.normal);
        surface.extend_footprint(cluster.bbox_min, cluster.bbox_max);
        surface.bump_confidence(config.confidence.confidence_step);
        surface.last_seen_at = now;
        surface.detections += 1;
        tracing::debug!(
            "re-detected {id}: confidence {:.2} after {} detections",
            surface.confidence,
            surface.detections
        );

        let Some(placement_id) = surface.placement_id else {
            return;
        };
        let pose = solve_surface_pose(
            surface.position,
            surface.normal,
            config.placement.clearance_height,
        );
        let Some(placement) = self.placements.iter_mut().find(|p| p.id == placement_id) else {
            return;
        };
        // Measured against the placement itself so small steps can't accumulate.
        let drift = pose.position.distance(placement.position);
        let turn = pose.orientation.angular_distance(placement.rotation);
        if drift <= config.placement.reposition_threshold
            && turn <= config.placement.reposition_angle_deg.to_radians()
        {
            return;
        }
        placement.position = pose.position;
        placement.rotation = pose.orientation;
        events.push(DetectorEvent::PlacementMoved {
            placement_id,
            position: pose.position,
            rotation: pose.orientation,
            euler_degrees: pose.orientation.to_euler_degrees(),
        });
    }

    /// Remove surfaces unseen for longer than their source's TTL together
    /// with their placements. Returns the number of surfaces removed.
    pub fn sweep(
        &mut self,
        now: Timestamp,
        config: &DetectorConfig,
        events: &mut Vec<DetectorEvent>,
    ) -> usize {
        let expired: Vec<SurfaceId> = self
            .surfaces_by_creation()
            .into_iter()
            .filter(|s| elapsed(now, s.last_seen_at) > config.confidence.ttl_ms(s.source))
            .map(|s| s.id)
            .collect();

        for id in &expired {
            let placement = self.surfaces.get(id).and_then(|s| s.placement_id);
            if let Some(placement_id) = placement {
                self.remove_placement(placement_id, RemovalReason::SurfaceExpired, events);
            }
            self.surfaces.remove(id);
            tracing::info!("surface {id} expired");
            events.push(DetectorEvent::SurfaceLost { surface_id: *id });
        }
        expired.len()
    }

    /// Link a new placement to its surface. `None` if the surface is missing
    /// or already occupied.
    pub(crate) fn attach_placement(
        &mut self,
        mut placement: Placement,
        now: Timestamp,
    ) -> Option<()> {
        if self.surfaces.get(&placement.surface_id)?.placement_id.is_some() {
            return None;
        }
        placement.seq = self.take_seq();
        let surface = self.surfaces.get_mut(&placement.surface_id)?;
        surface.placement_id = Some(placement.id);
        surface.last_interaction_at = now;
        self.placements.push(placement);
        Some(())
    }

    /// Detach and drop a placement, clearing its surface's link.
    pub fn remove_placement(
        &mut self,
        id: PlacementId,
        reason: RemovalReason,
        events: &mut Vec<DetectorEvent>,
    ) -> Option<Placement> {
        let index = self.placements.iter().position(|p| p.id == id)?;
        let placement = self.placements.remove(index);
        if let Some(surface) = self.surfaces.get_mut(&placement.surface_id) {
            surface.placement_id = None;
        }
        tracing::info!("removed placement {id} ({})", reason.as_str());
        events.push(DetectorEvent::PlacementRemoved {
            placement_id: id,
            surface_id: placement.surface_id,
            reason,
        });
        Some(placement)
    }

    /// Record an interaction on a placement and its surface.
    pub fn touch(&mut self, id: PlacementId, now: Timestamp) -> bool {
        let Some(placement) = self.placements.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        placement.last_interaction_at = now;
        if let Some(surface) = self.surfaces.get_mut(&placement.surface_id) {
            surface.last_interaction_at = now;
        }
        true
    }

    /// Advance every surface's debug highlight by `step`, saturating at 1.
    pub fn advance_highlights(&mut self, step: f32) {
        for surface in self.surfaces.values_mut() {
            surface.highlight_progress = (surface.highlight_progress + step).min(1.0);
        }
    }

    /// Drop everything, placements first.
    pub fn clear(&mut self, events: &mut Vec<DetectorEvent>) {
        let ids: Vec<PlacementId> = self.placements.iter().map(|p| p.id).collect();
        for id in ids {
            self.remove_placement(id, RemovalReason::SessionEnded, events);
        }
        for surface in self.surfaces_by_creation() {
            events.push(DetectorEvent::SurfaceLost {
                surface_id: surface.id,
            });
        }
        self.surfaces.clear();
    }

    pub fn snapshot(&self, now: Timestamp) -> RegistrySnapshot {
        RegistrySnapshot {
            taken_at: now,
            surfaces: self.surfaces_by_creation().into_iter().cloned().collect(),
            placements: self.placements.clone(),
        }
    }

    /// Rebuild from a snapshot, re-checking the cross-links.
    pub fn from_snapshot(
        snapshot: RegistrySnapshot,
        max_placements: usize,
    ) -> Result<Self, String> {
        let next_seq = snapshot
            .surfaces
            .iter()
            .map(|s| s.seq)
            .chain(snapshot.placements.iter().map(|p| p.seq))
            .max()
            .map_or(0, |s| s + 1);
        let registry = Self {
            surfaces: snapshot.surfaces.into_iter().map(|s| (s.id, s)).collect(),
            placements: snapshot.placements,
            next_seq,
        };
        registry.check_invariants_with(max_placements)?;
        Ok(registry)
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        self.check_invariants_with(usize::MAX)
    }

    /// Cross-link, capacity and single-active checks.
    pub fn check_invariants_with(&self, max_placements: usize) -> Result<(), String> {
        if self.placements.len() > max_placements {
            return Err(format!(
                "{} placements exceed capacity {max_placements}",
                self.placements.len()
            ));
        }
        let active = self.placements.iter().filter(|p| p.is_active).count();
        if active > 1 {
            return Err(format!("{active} placements are active"));
        }
        for p in &self.placements {
            let surface = self
                .surfaces
                .get(&p.surface_id)
                .ok_or_else(|| format!("placement {} has no surface {}", p.id, p.surface_id))?;
            if surface.placement_id != Some(p.id) {
                return Err(format!("surface {} does not link back to {}", surface.id, p.id));
            }
        }
        for s in self.surfaces.values() {
            if let Some(pid) = s.placement_id {
                if self.placement(pid).is_none() {
                    return Err(format!("surface {} links missing placement {pid}", s.id));
                }
            }
            if !(0.0..=1.0).contains(&s.confidence) {
                return Err(format!("surface {} confidence {} out of range", s.id, s.confidence));
            }
        }
        Ok(())
    }
}
