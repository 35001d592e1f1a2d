use std::ops::Mul;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constants::EPSILON;
use crate::vec3::Vec3;

/// Unit quaternion representing an orientation in world space.
///
/// Always normalized by the constructors. q and -q encode the same rotation,
/// which [`Quaternion::angular_distance`] accounts for via abs(dot).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl PartialEq for Quaternion {
    fn eq(&self, other: &Self) -> bool {
        const TOL: f32 = 1e-6;
        (self.w - other.w).abs() < TOL
            && (self.x - other.x).abs() < TOL
            && (self.y - other.y).abs() < TOL
            && (self.z - other.z).abs() < TOL
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Create a new quaternion, automatically normalized.
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }.normalize()
    }

    /// Identity quaternion (1, 0, 0, 0).
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Rotation of `angle` radians about `axis`. Identity for a zero axis.
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let Some(axis) = axis.try_normalize() else {
            return Self::identity();
        };
        let (sin_half, cos_half) = (angle / 2.0).sin_cos();
        Self::new(cos_half, axis.x * sin_half, axis.y * sin_half, axis.z * sin_half)
    }

    /// Shortest-arc rotation taking unit vector `from` onto unit vector `to`.
    ///
    /// Antiparallel inputs have no unique shortest arc; a half turn about an
    /// axis perpendicular to `from` is returned.
    pub fn from_unit_vectors(from: Vec3, to: Vec3) -> Self {
        let r = from.dot(to) + 1.0;
        if r < EPSILON {
            if from.x.abs() > from.z.abs() {
                return Self::new(0.0, -from.y, from.x, 0.0);
            }
            return Self::new(0.0, 0.0, -from.z, from.y);
        }
        let axis = from.cross(to);
        Self::new(r, axis.x, axis.y, axis.z)
    }

    /// Normalize to unit length. Returns identity if near-zero or non-finite.
    pub fn normalize(self) -> Self {
        let norm = (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if !norm.is_finite() || norm < EPSILON {
            return Self::identity();
        }
        Self {
            w: self.w / norm,
            x: self.x / norm,
            y: self.y / norm,
            z: self.z / norm,
        }
    }

    /// 4D dot product.
    pub fn dot(self, other: Self) -> f32 {
        self.w * other.w + self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Rotation angle between two orientations. Range: [0, π].
    pub fn angular_distance(self, other: Self) -> f32 {
        let d = self.dot(other).abs().clamp(-1.0, 1.0);
        2.0 * d.acos()
    }

    pub fn conjugate(self) -> Self {
        Self {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    /// Rotate a vector by this quaternion.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let t = u.cross(v) * 2.0;
        v + t * self.w + u.cross(t)
    }

    /// Intrinsic XYZ Euler angles in degrees, for renderers that want them.
    pub fn to_euler_degrees(self) -> Vec3 {
        let Self { w, x, y, z } = self;
        let m11 = 1.0 - 2.0 * (y * y + z * z);
        let m12 = 2.0 * (x * y - w * z);
        let m13 = 2.0 * (x * z + w * y);
        let m22 = 1.0 - 2.0 * (x * x + z * z);
        let m23 = 2.0 * (y * z - w * x);
        let m32 = 2.0 * (y * z + w * x);
        let m33 = 1.0 - 2.0 * (x * x + y * y);

        let ey = m13.clamp(-1.0, 1.0).asin();
        let (ex, ez) = if m13.abs() < 0.999_999_9 {
            ((-m23).atan2(m33), (-m12).atan2(m11))
        } else {
            (m32.atan2(m22), 0.0)
        };
        Vec3::new(ex.to_degrees(), ey.to_degrees(), ez.to_degrees())
    }

    /// Convert to [w, x, y, z] array for serialization.
    pub fn to_array(self) -> [f32; 4] {
        [self.w, self.x, self.y, self.z]
    }

    /// Create from [w, x, y, z] array.
    pub fn from_array(arr: [f32; 4]) -> Self {
        Self::new(arr[0], arr[1], arr[2], arr[3])
    }
}

impl std::ops::Neg for Quaternion {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            w: -self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }
}

/// Hamilton product (quaternion multiplication).
impl Mul for Quaternion {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }
}
