//! SurfaceClusterer: single-pass greedy grouping of samples.
//!
//! Each sample joins the first cluster whose centroid lies within
//! `merge_threshold`, otherwise it starts a new one. The centroid is updated
//! as `(centroid + point) / 2`, a running average biased toward the most
//! recent points rather than a true mean. A hit-test cursor sweeping across
//! a table drags the centroid along, so the cluster's bounding box can grow
//! past `merge_threshold`. The true member mean is tracked separately and is
//! what surfaces are built from.

use crate::sample::Sample;
use crate::surface::SurfaceSource;
use crate::vec3::Vec3;

/// Transient grouping of nearby samples inside one clustering pass.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub source: SurfaceSource,
    /// Running-average centroid used for membership tests.
    pub centroid: Vec3,
    pub bbox_min: Vec3,
    pub bbox_max: Vec3,
    pub member_count: usize,
    pub position_sum: Vec3,
    pub normal_sum: Vec3,
    /// Indices of member samples in the pass input. Empty for mesh groups.
    pub members: Vec<usize>,
}

impl Cluster {
    pub fn new(source: SurfaceSource, position: Vec3, normal: Vec3) -> Self {
        Self {
            source,
            centroid: position,
            bbox_min: position,
            bbox_max: position,
            member_count: 1,
            position_sum: position,
            normal_sum: normal,
            members: Vec::new(),
        }
    }

    fn from_sample(index: usize, sample: &Sample) -> Self {
        let mut cluster = Self::new(SurfaceSource::HitTest, sample.position, sample.normal);
        cluster.members.push(index);
        cluster
    }

    /// Add a point. Moves the centroid halfway toward it.
    pub fn absorb(&mut self, position: Vec3, normal: Vec3) {
        self.centroid = self.centroid.midpoint(position);
        self.bbox_min = self.bbox_min.min(position);
        self.bbox_max = self.bbox_max.max(position);
        self.position_sum += position;
        self.normal_sum += normal;
        self.member_count += 1;
    }

    /// Fold another cluster into this one (same physical surface).
    pub fn merge(&mut self, other: &Cluster) {
        self.centroid = self.centroid.midpoint(other.centroid);
        self.bbox_min = self.bbox_min.min(other.bbox_min);
        self.bbox_max = self.bbox_max.max(other.bbox_max);
        self.position_sum += other.position_sum;
        self.normal_sum += other.normal_sum;
        self.member_count += other.member_count;
        self.members.extend_from_slice(&other.members);
    }

    /// True mean of member positions.
    pub fn mean(&self) -> Vec3 {
        self.position_sum / self.member_count.max(1) as f32
    }

    /// Mean member normal, falling back to up when members cancel out.
    pub fn mean_normal(&self) -> Vec3 {
        self.normal_sum
            .try_normalize()
            .unwrap_or(crate::constants::UP)
    }

    pub fn width(&self) -> f32 {
        self.bbox_max.x - self.bbox_min.x
    }

    pub fn depth(&self) -> f32 {
        self.bbox_max.z - self.bbox_min.z
    }

    pub fn area(&self) -> f32 {
        self.width() * self.depth()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SurfaceClusterer {
    pub merge_threshold: f32,
}

impl SurfaceClusterer {
    pub fn new(merge_threshold: f32) -> Self {
        Self { merge_threshold }
    }

    /// Group `samples` in input order. O(samples × clusters).
    pub fn cluster(&self, samples: &[Sample]) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = Vec::new();

        for (i, sample) in samples.iter().enumerate() {
            let found = clusters
                .iter_mut()
                .find(|c| c.centroid.distance(sample.position) < self.merge_threshold);
            match found {
                Some(cluster) => {
                    cluster.absorb(sample.position, sample.normal);
                    cluster.members.push(i);
                }
                None => clusters.push(Cluster::from_sample(i, sample)),
            }
        }

        clusters
    }
}
