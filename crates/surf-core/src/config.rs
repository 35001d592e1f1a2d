//! Detector configuration, loaded from TOML with defaults for every field.
//!
//! ```toml
//! [clustering]
//! merge_threshold = 0.1      # 10cm
//! min_surface_area = 0.15    # m²
//!
//! [placement]
//! max_placements = 3
//! keyboard_template = "compact"
//!
//! [visibility]
//! hysteresis = 0.05          # widen thresholds for already-visible placements
//! ```
//!
//! Every section may be omitted. [`DetectorConfig::validate`] runs at
//! detector construction, so a detector never holds a nonsensical config.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    HIT_TEST_FULL_CONFIDENCE_MEMBERS, MAX_MESH_VERTICES, MIN_CLUSTER_MEMBERS,
    RAYCAST_GRID_SIZE, RAYCAST_GRID_SPACING, SAMPLE_RETENTION_MS,
};
use crate::keyboard::KeyboardTemplate;
use crate::surface::SurfaceSource;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO error: {msg}"),
            ConfigError::Parse(msg) => write!(f, "parse error: {msg}"),
            ConfigError::Invalid { field, reason } => write!(f, "invalid {field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Sampling cadence and the horizontal filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionSection {
    /// Detection tick period (ms).
    pub detection_interval_ms: u64,
    /// Visibility frame period (ms).
    pub frame_interval_ms: u64,
    /// Pending samples older than this are dropped (ms).
    pub sample_retention_ms: u64,
    /// Keep samples with `|normal·up|` above this.
    pub horizontal_normal_threshold: f32,
    /// Duration of the debug highlight on newly detected surfaces (ms).
    pub highlight_duration_ms: u64,
}

impl Default for DetectionSection {
    fn default() -> Self {
        Self {
            detection_interval_ms: 300,
            frame_interval_ms: 16,
            sample_retention_ms: SAMPLE_RETENTION_MS,
            horizontal_normal_threshold: 0.75,
            highlight_duration_ms: 1_500,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusteringSection {
    /// Max sample-to-centroid distance for cluster membership (m).
    pub merge_threshold: f32,
    /// Members a hit-test cluster needs before promotion.
    pub min_cluster_members: usize,
    /// Minimum footprint for promotion and placement (m²).
    pub min_surface_area: f32,
    /// Bucket size used to derive stable surface ids (m).
    pub id_quantization: f32,
}

impl Default for ClusteringSection {
    fn default() -> Self {
        Self {
            merge_threshold: 0.1,
            min_cluster_members: MIN_CLUSTER_MEMBERS,
            min_surface_area: 0.15,
            id_quantization: 0.01,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfidenceSection {
    /// Hit-test surfaces start at `min(members / this, 1.0)`.
    pub hit_test_full_confidence_members: f32,
    /// Mesh-derived surfaces start here.
    pub mesh_initial_confidence: f32,
    /// Added on every re-detection.
    pub confidence_step: f32,
    pub hit_test_ttl_ms: u64,
    pub mesh_ttl_ms: u64,
}

impl Default for ConfidenceSection {
    fn default() -> Self {
        Self {
            hit_test_full_confidence_members: HIT_TEST_FULL_CONFIDENCE_MEMBERS,
            mesh_initial_confidence: 0.9,
            confidence_step: 0.05,
            hit_test_ttl_ms: 10_000,
            mesh_ttl_ms: 30_000,
        }
    }
}

impl ConfidenceSection {
    pub fn ttl_ms(&self, source: SurfaceSource) -> u64 {
        match source {
            SurfaceSource::HitTest => self.hit_test_ttl_ms,
            SurfaceSource::Mesh => self.mesh_ttl_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlacementSection {
    pub max_placements: usize,
    pub min_confidence: f32,
    /// Surface must satisfy `dot(forward, dir) >` this to receive a placement.
    pub ahead_alignment: f32,
    /// Lift above the surface along its normal (m).
    pub clearance_height: f32,
    /// A placement idle longer than this may be evicted at capacity (ms).
    pub eviction_grace_ms: u64,
    /// Gap between a placement and its surface's solved pose that triggers
    /// a re-pose (m).
    pub reposition_threshold: f32,
    /// Rotation gap that triggers a re-pose (degrees).
    pub reposition_angle_deg: f32,
    /// Height of the companion screen above a placement (m).
    pub screen_offset: f32,
    pub keyboard_template: KeyboardTemplate,
}

impl Default for PlacementSection {
    fn default() -> Self {
        Self {
            max_placements: 3,
            min_confidence: 0.6,
            ahead_alignment: 0.3,
            clearance_height: 0.02,
            eviction_grace_ms: 60_000,
            reposition_threshold: 0.01,
            reposition_angle_deg: 1.0,
            screen_offset: 0.4,
            keyboard_template: KeyboardTemplate::Standard,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisibilitySection {
    pub visible_alignment: f32,
    pub visible_max_distance: f32,
    pub active_alignment: f32,
    /// Threshold slack granted to placements that are already visible/active.
    /// Zero reproduces the plain threshold test.
    pub hysteresis: f32,
}

impl Default for VisibilitySection {
    fn default() -> Self {
        Self {
            visible_alignment: 0.3,
            visible_max_distance: 2.0,
            active_alignment: 0.7,
            hysteresis: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeshSection {
    /// Minimum spacing between mesh requests (ms).
    pub request_interval_ms: u64,
    /// Requests allowed per detection session.
    pub max_requests: u32,
    /// An unanswered request is abandoned after this (ms).
    pub request_timeout_ms: u64,
    /// Max distance from the seed face plane for coplanar absorption (m).
    pub planar_tolerance: f32,
    /// Region growth neighbourhood, also the spatial hash cell size (m).
    pub grow_radius: f32,
    pub max_vertices: usize,
}

impl Default for MeshSection {
    fn default() -> Self {
        Self {
            request_interval_ms: 3_000,
            max_requests: 40,
            request_timeout_ms: 10_000,
            planar_tolerance: 0.02,
            grow_radius: 0.15,
            max_vertices: MAX_MESH_VERTICES,
        }
    }
}

/// Downward ray grid used when native hit-testing is unavailable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RaycastSection {
    pub grid_size: i32,
    pub grid_spacing: f32,
    /// Hits must be this far above the floor (m).
    pub min_height: f32,
    pub floor_height: f32,
}

impl Default for RaycastSection {
    fn default() -> Self {
        Self {
            grid_size: RAYCAST_GRID_SIZE,
            grid_spacing: RAYCAST_GRID_SPACING,
            min_height: 0.1,
            floor_height: 0.0,
        }
    }
}

/// Full detector configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    pub detection: DetectionSection,
    pub clustering: ClusteringSection,
    pub confidence: ConfidenceSection,
    pub placement: PlacementSection,
    pub visibility: VisibilitySection,
    pub mesh: MeshSection,
    pub raycast: RaycastSection,
}

impl DetectorConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        let c = &self.clustering;
        let k = &self.confidence;
        let p = &self.placement;
        let v = &self.visibility;
        let m = &self.mesh;
        let r = &self.raycast;

        positive("detection.detection_interval_ms", d.detection_interval_ms as f32)?;
        positive("detection.frame_interval_ms", d.frame_interval_ms as f32)?;
        positive("detection.sample_retention_ms", d.sample_retention_ms as f32)?;
        unit_interval("detection.horizontal_normal_threshold", d.horizontal_normal_threshold)?;

        positive("clustering.merge_threshold", c.merge_threshold)?;
        positive("clustering.min_cluster_members", c.min_cluster_members as f32)?;
        non_negative("clustering.min_surface_area", c.min_surface_area)?;
        positive("clustering.id_quantization", c.id_quantization)?;

        positive("confidence.hit_test_full_confidence_members", k.hit_test_full_confidence_members)?;
        unit_interval("confidence.mesh_initial_confidence", k.mesh_initial_confidence)?;
        unit_interval("confidence.confidence_step", k.confidence_step)?;
        positive("confidence.hit_test_ttl_ms", k.hit_test_ttl_ms as f32)?;
        positive("confidence.mesh_ttl_ms", k.mesh_ttl_ms as f32)?;

        positive("placement.max_placements", p.max_placements as f32)?;
        unit_interval("placement.min_confidence", p.min_confidence)?;
        alignment("placement.ahead_alignment", p.ahead_alignment)?;
        non_negative("placement.clearance_height", p.clearance_height)?;
        non_negative("placement.reposition_threshold", p.reposition_threshold)?;
        non_negative("placement.reposition_angle_deg", p.reposition_angle_deg)?;
        finite("placement.screen_offset", p.screen_offset)?;

        alignment("visibility.visible_alignment", v.visible_alignment)?;
        alignment("visibility.active_alignment", v.active_alignment)?;
        positive("visibility.visible_max_distance", v.visible_max_distance)?;
        non_negative("visibility.hysteresis", v.hysteresis)?;
        if v.active_alignment < v.visible_alignment {
            return Err(invalid(
                "visibility.active_alignment",
                "must not be below visible_alignment",
            ));
        }

        positive("mesh.request_interval_ms", m.request_interval_ms as f32)?;
        positive("mesh.request_timeout_ms", m.request_timeout_ms as f32)?;
        positive("mesh.planar_tolerance", m.planar_tolerance)?;
        positive("mesh.grow_radius", m.grow_radius)?;
        if m.max_vertices < 3 {
            return Err(invalid("mesh.max_vertices", "must hold at least one triangle"));
        }

        if r.grid_size < 1 {
            return Err(invalid("raycast.grid_size", "must be at least 1"));
        }
        positive("raycast.grid_spacing", r.grid_spacing)?;
        non_negative("raycast.min_height", r.min_height)?;
        finite("raycast.floor_height", r.floor_height)?;
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn finite(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, "must be finite"))
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, &format!("must be > 0, got {value}")))
    }
}

fn non_negative(field: &'static str, value: f32) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, &format!("must be >= 0, got {value}")))
    }
}

fn unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
    finite(field, value)?;
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, &format!("must be in [0, 1], got {value}")))
    }
}

fn alignment(field: &'static str, value: f32) -> Result<(), ConfigError> {
    finite(field, value)?;
    if (-1.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, &format!("must be in [-1, 1], got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = DetectorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clustering.min_surface_area, 0.15);
        assert_eq!(config.detection.detection_interval_ms, 300);
        assert_eq!(config.placement.max_placements, 3);
        assert_eq!(config.confidence.hit_test_ttl_ms, 10_000);
        assert_eq!(config.confidence.mesh_ttl_ms, 30_000);
        assert_eq!(config.placement.eviction_grace_ms, 60_000);
        assert_eq!(config.clustering.merge_threshold, 0.1);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = DetectorConfig::from_toml("").unwrap();
        assert_eq!(config, DetectorConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = DetectorConfig::from_toml(
            "[placement]\nmax_placements = 5\nkeyboard_template = \"compact\"\n",
        )
        .unwrap();
        assert_eq!(config.placement.max_placements, 5);
        assert_eq!(config.placement.keyboard_template, KeyboardTemplate::Compact);
        assert_eq!(config.placement.min_confidence, 0.6);
        assert_eq!(config.clustering, ClusteringSection::default());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = DetectorConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(DetectorConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = DetectorConfig::from_toml("[clustering]\nmerge_treshold = 0.2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = DetectorConfig::default();
        config.placement.max_placements = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("placement.max_placements"), "got {err}");
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = DetectorConfig::default();
        config.detection.horizontal_normal_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = DetectorConfig::default();
        config.clustering.merge_threshold = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_active_below_visible_rejected() {
        let mut config = DetectorConfig::default();
        config.visibility.active_alignment = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ttl_by_source() {
        let k = ConfidenceSection::default();
        assert_eq!(k.ttl_ms(SurfaceSource::HitTest), 10_000);
        assert_eq!(k.ttl_ms(SurfaceSource::Mesh), 30_000);
    }
}
