//! PoseSolver: lays an object flush against a surface.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constants::UP;
use crate::quaternion::Quaternion;
use crate::vec3::Vec3;

/// Position + orientation in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quaternion,
}

impl Pose {
    pub fn new(position: Vec3, orientation: Quaternion) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Map a point from this pose's local frame into world space.
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.orientation.rotate(local) + self.position
    }

    /// Rotate a direction from this pose's local frame into world space.
    pub fn transform_direction(&self, local: Vec3) -> Vec3 {
        self.orientation.rotate(local)
    }
}

/// Tracked headset/camera position and unit forward direction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ObserverPose {
    pub position: Vec3,
    pub forward: Vec3,
}

impl Default for ObserverPose {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.6, 0.0),
            forward: Vec3::new(0.0, 0.0, -1.0),
        }
    }
}

impl ObserverPose {
    pub fn new(position: Vec3, forward: Vec3) -> Self {
        Self {
            position,
            forward: forward.normalize_or_zero(),
        }
    }

    /// Forward direction of a camera with the given orientation (-Z is forward).
    pub fn from_pose(pose: Pose) -> Self {
        Self::new(pose.position, pose.transform_direction(Vec3::new(0.0, 0.0, -1.0)))
    }

    /// Distance to `target` and `dot(forward, normalize(target - position))`.
    ///
    /// Alignment is 0 when `target` coincides with the observer.
    pub fn distance_and_alignment(&self, target: Vec3) -> (f32, f32) {
        let offset = target - self.position;
        let alignment = offset
            .try_normalize()
            .map_or(0.0, |dir| self.forward.dot(dir));
        (offset.length(), alignment)
    }
}

/// Rotation that maps the canonical up axis onto `normal`.
pub fn normal_rotation(normal: Vec3) -> Quaternion {
    match normal.try_normalize() {
        Some(n) => Quaternion::from_unit_vectors(UP, n),
        None => Quaternion::identity(),
    }
}

/// Point raised `clearance` meters off the surface along its normal.
pub fn offset_along_normal(point: Vec3, normal: Vec3, clearance: f32) -> Vec3 {
    point + normal.try_normalize().unwrap_or(UP) * clearance
}

/// Final pose for an object resting on a surface at `point` facing `normal`.
pub fn solve_surface_pose(point: Vec3, normal: Vec3, clearance: f32) -> Pose {
    Pose::new(
        offset_along_normal(point, normal, clearance),
        normal_rotation(normal),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_up_normal_gives_identity() {
        let pose = solve_surface_pose(Vec3::new(0.0, 0.75, -1.0), UP, 0.02);
        assert_eq!(pose.orientation, Quaternion::identity());
        assert_relative_eq!(pose.position.y, 0.77, epsilon = 1e-6);
    }

    #[test]
    fn test_tilted_normal_offsets_along_normal() {
        let normal = Vec3::new(0.0, 1.0, 1.0).normalize_or_zero();
        let pose = solve_surface_pose(Vec3::ZERO, normal, 0.1);
        assert_relative_eq!(pose.position.length(), 0.1, epsilon = 1e-6);
        assert_relative_eq!(pose.position.dot(normal), 0.1, epsilon = 1e-6);
        let mapped = pose.orientation.rotate(UP);
        assert!(mapped.distance(normal) < 1e-5);
    }

    #[test]
    fn test_degenerate_normal_falls_back_to_up() {
        let pose = solve_surface_pose(Vec3::ZERO, Vec3::ZERO, 0.02);
        assert_eq!(pose.orientation, Quaternion::identity());
        assert_relative_eq!(pose.position.y, 0.02, epsilon = 1e-6);
    }

    #[test]
    fn test_alignment_straight_ahead() {
        let observer = ObserverPose::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -2.0));
        let (distance, alignment) = observer.distance_and_alignment(Vec3::new(0.0, 0.0, -1.5));
        assert_relative_eq!(distance, 1.5, epsilon = 1e-6);
        assert_relative_eq!(alignment, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_alignment_coincident_target_is_zero() {
        let observer = ObserverPose::default();
        let (distance, alignment) = observer.distance_and_alignment(observer.position);
        assert_eq!(distance, 0.0);
        assert_eq!(alignment, 0.0);
    }

    #[test]
    fn test_observer_from_pose_looks_down_negative_z() {
        let observer = ObserverPose::from_pose(Pose::default());
        assert!(observer.forward.distance(Vec3::new(0.0, 0.0, -1.0)) < 1e-6);
    }
}
