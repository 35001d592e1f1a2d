//! SurfaceDetector: routes sensor events and ticks through the pipeline.
//!
//! The detector owns the registry, the pending-sample window and the mesh
//! request schedule. It performs no I/O and never reads a clock; callers
//! pass `now` in, which keeps replays and tests deterministic.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cluster::SurfaceClusterer;
use crate::config::{ConfigError, DetectorConfig};
use crate::event::{DetectorEvent, MeshRequest, SensorEvent};
use crate::mesh::{MeshPayload, MeshTicket, grow_regions};
use crate::placement::{PlacementId, place_on_surfaces};
use crate::pose::ObserverPose;
use crate::registry::{Registry, RegistrySnapshot};
use crate::sample::{HitPoint, Sample, SceneGeometry, ingest_hits, raycast_grid};
use crate::time::{Timestamp, elapsed};
use crate::visibility::VisibilityGate;

/// Sensing features the platform reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub hit_test: bool,
    pub mesh: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            hit_test: true,
            mesh: false,
        }
    }
}

/// Rate limiter and ticket issuer for scene-mesh requests.
#[derive(Clone, Debug, Default)]
struct MeshSchedule {
    generation: u32,
    issued: u32,
    last_request_at: Option<Timestamp>,
    outstanding: Option<MeshRequest>,
}

impl MeshSchedule {
    /// Start a new detection session; earlier tickets become stale.
    fn restart(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.issued = 0;
        self.last_request_at = None;
        self.outstanding = None;
    }

    fn poll(&mut self, now: Timestamp, config: &DetectorConfig) -> Option<MeshRequest> {
        if let Some(pending) = self.outstanding {
            if elapsed(now, pending.requested_at) <= config.mesh.request_timeout_ms {
                return None;
            }
            tracing::warn!("mesh request {} timed out", pending.ticket.request);
            self.outstanding = None;
        }
        if self.issued >= config.mesh.max_requests {
            return None;
        }
        if let Some(last) = self.last_request_at {
            if elapsed(now, last) < config.mesh.request_interval_ms {
                return None;
            }
        }
        self.issued += 1;
        let request = MeshRequest {
            ticket: MeshTicket {
                request: self.issued,
                generation: self.generation,
            },
            requested_at: now,
        };
        self.last_request_at = Some(now);
        self.outstanding = Some(request);
        Some(request)
    }

    /// Accept a result if it answers the outstanding request.
    ///
    /// While requests are in use, a result without a ticket can't be told
    /// apart from one issued before a restart and is dropped. Platforms that
    /// push meshes unasked have their pushes held to the request interval
    /// and per-session cap instead.
    fn accept(
        &mut self,
        ticket: Option<MeshTicket>,
        requests: bool,
        now: Timestamp,
        config: &DetectorConfig,
    ) -> bool {
        match ticket {
            Some(ticket) => match self.outstanding {
                Some(pending) if pending.ticket == ticket => {
                    self.outstanding = None;
                    true
                }
                _ => false,
            },
            None if requests => false,
            None => {
                if self.issued >= config.mesh.max_requests {
                    return false;
                }
                if let Some(last) = self.last_request_at
                    && elapsed(now, last) < config.mesh.request_interval_ms
                {
                    return false;
                }
                self.issued += 1;
                self.last_request_at = Some(now);
                true
            }
        }
    }
}

pub struct SurfaceDetector {
    config: DetectorConfig,
    registry: Registry,
    clusterer: SurfaceClusterer,
    pending: Vec<Sample>,
    enabled: bool,
    capabilities: Capabilities,
    observer: ObserverPose,
    scene: Option<Box<dyn SceneGeometry + Send + Sync>>,
    mesh: MeshSchedule,
}

impl SurfaceDetector {
    /// Validate `config` and build an idle detector. Detection starts on the
    /// first `ToggleDetection { enabled: true }`.
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            clusterer: SurfaceClusterer::new(config.clustering.merge_threshold),
            config,
            registry: Registry::new(),
            pending: Vec::new(),
            enabled: false,
            capabilities: Capabilities::default(),
            observer: ObserverPose::default(),
            scene: None,
            mesh: MeshSchedule::default(),
        })
    }

    /// Attach known geometry for the raycast fallback.
    pub fn with_scene(mut self, scene: Box<dyn SceneGeometry + Send + Sync>) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Last observer pose received through an `Observer` event.
    pub fn observer(&self) -> ObserverPose {
        self.observer
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn snapshot(&self, now: Timestamp) -> RegistrySnapshot {
        self.registry.snapshot(now)
    }

    /// Handle one inbound event.
    pub fn handle(&mut self, event: SensorEvent, now: Timestamp) -> Vec<DetectorEvent> {
        let mut events = Vec::new();
        match event {
            SensorEvent::HitTest { hits } => self.on_hits(&hits, now, &mut events),
            SensorEvent::MeshUpdate(payload) => self.on_mesh(&payload, now, &mut events),
            SensorEvent::ToggleDetection { enabled } => self.set_enabled(enabled),
            SensorEvent::Observer { position, forward } => {
                self.observer = ObserverPose::new(position, forward);
            }
            SensorEvent::KeyPress { placement_id, key } => {
                self.on_key(placement_id, &key, now, &mut events)
            }
            SensorEvent::Capabilities { hit_test, mesh } => {
                self.capabilities = Capabilities { hit_test, mesh };
                tracing::info!("capabilities: hit-test {hit_test}, mesh {mesh}");
            }
            SensorEvent::SessionEnded => self.end_session(&mut events),
        }
        events
    }

    /// Start or stop detection. Repeating the current state is a no-op.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.pending.clear();
        self.mesh.restart();
        tracing::info!("surface detection {}", if enabled { "enabled" } else { "disabled" });
    }

    fn on_hits(&mut self, hits: &[HitPoint], now: Timestamp, events: &mut Vec<DetectorEvent>) {
        if !self.enabled {
            return;
        }
        let samples = ingest_hits(hits, now, &self.config.detection);
        if samples.is_empty() {
            return;
        }
        self.pending.extend(samples);
        self.cluster_pending(now, events);
    }

    fn on_mesh(&mut self, payload: &MeshPayload, now: Timestamp, events: &mut Vec<DetectorEvent>) {
        if !self.enabled {
            tracing::debug!("mesh update discarded, detection stopped");
            return;
        }
        let requests = self.capabilities.mesh;
        if !self.mesh.accept(payload.ticket, requests, now, &self.config) {
            tracing::debug!("stale mesh result {:?} discarded", payload.ticket);
            return;
        }
        let vertices = payload.world_vertices(self.config.mesh.max_vertices);
        let clusters = grow_regions(
            &vertices,
            &self.config.mesh,
            self.config.detection.horizontal_normal_threshold,
        );
        self.registry
            .apply_clusters(&clusters, now, &self.config, events);
    }

    fn on_key(
        &mut self,
        placement_id: PlacementId,
        key: &str,
        now: Timestamp,
        events: &mut Vec<DetectorEvent>,
    ) {
        let Some(placement) = self.registry.placement(placement_id) else {
            tracing::debug!("key press for unknown placement {placement_id}");
            return;
        };
        let Some(label) = placement.template.layout().resolve(key) else {
            tracing::debug!("unknown key {key:?} on {placement_id}");
            return;
        };
        self.registry.touch(placement_id, now);
        events.push(DetectorEvent::KeyInput {
            placement_id,
            key: label,
        });
    }

    /// Cluster every pending sample and drop the ones that fed an update.
    fn cluster_pending(&mut self, now: Timestamp, events: &mut Vec<DetectorEvent>) {
        let clusters = self.clusterer.cluster(&self.pending);
        let consumed = self
            .registry
            .apply_clusters(&clusters, now, &self.config, events);

        let mut used = vec![false; self.pending.len()];
        for (cluster, applied) in clusters.iter().zip(consumed) {
            if applied {
                for &i in &cluster.members {
                    used[i] = true;
                }
            }
        }
        let mut flags = used.into_iter();
        self.pending.retain(|_| !flags.next().unwrap_or(false));
    }

    /// One detection tick: expire old samples, run the raycast fallback,
    /// sweep stale surfaces, advance highlights, place keyboards.
    pub fn tick(&mut self, now: Timestamp, observer: &ObserverPose) -> Vec<DetectorEvent> {
        let mut events = Vec::new();
        if !self.enabled {
            return events;
        }

        let retention = self.config.detection.sample_retention_ms;
        self.pending
            .retain(|s| elapsed(now, s.captured_at) <= retention);

        if !self.capabilities.hit_test {
            if let Some(scene) = &self.scene {
                let samples = raycast_grid(
                    scene.as_ref(),
                    observer.position,
                    now,
                    &self.config.raycast,
                    &self.config.detection,
                );
                self.pending.extend(samples);
            }
        }
        if !self.pending.is_empty() {
            self.cluster_pending(now, &mut events);
        }

        self.registry.sweep(now, &self.config, &mut events);

        let step = self.config.detection.detection_interval_ms as f32
            / self.config.detection.highlight_duration_ms.max(1) as f32;
        self.registry.advance_highlights(step);

        place_on_surfaces(&mut self.registry, observer, now, &self.config, &mut events);
        events
    }

    /// One render frame: refresh visibility and the active placement.
    pub fn frame(&mut self, observer: &ObserverPose) -> Vec<DetectorEvent> {
        let mut events = Vec::new();
        VisibilityGate::new(&self.config.visibility).update(
            &mut self.registry,
            observer,
            &mut events,
        );
        events
    }

    /// Next scene-mesh request, if the platform supports meshes and the
    /// schedule allows one.
    pub fn poll_mesh_request(&mut self, now: Timestamp) -> Option<MeshRequest> {
        if !self.enabled || !self.capabilities.mesh {
            return None;
        }
        self.mesh.poll(now, &self.config)
    }

    /// Remove every placement and surface and stop detection.
    pub fn end_session(&mut self, events: &mut Vec<DetectorEvent>) {
        self.registry.clear(events);
        self.set_enabled(false);
        tracing::info!("session ended");
    }
}
