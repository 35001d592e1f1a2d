/// Canonical up axis used for horizontal filtering and pose solving.
pub const UP: crate::vec3::Vec3 = crate::vec3::Vec3::new(0.0, 1.0, 0.0);

/// Numerical epsilon for near-zero lengths and threshold comparisons.
pub const EPSILON: f32 = 1e-6;

/// Minimum members a hit-test cluster needs before it can become a surface.
pub const MIN_CLUSTER_MEMBERS: usize = 5;

/// Member count at which a fresh hit-test surface starts fully confident.
pub const HIT_TEST_FULL_CONFIDENCE_MEMBERS: f32 = 20.0;

/// Pending samples older than this are discarded (ms).
pub const SAMPLE_RETENTION_MS: u64 = 5_000;

/// Raycast fallback grid half-size (cells per side = 2n + 1).
pub const RAYCAST_GRID_SIZE: i32 = 3;

/// Raycast fallback grid spacing (m).
pub const RAYCAST_GRID_SPACING: f32 = 0.3;

/// Mesh region growth gives up after this many vertices per update.
pub const MAX_MESH_VERTICES: usize = 4_096;
