//! Property tests for the registry and placement invariants.

use proptest::prelude::*;
use surf_core::{
    DetectorConfig, HitPoint, ObserverPose, Sample, SensorEvent, SurfaceClusterer,
    SurfaceDetector, UP, Vec3,
};

fn started(config: DetectorConfig) -> SurfaceDetector {
    let mut detector = SurfaceDetector::new(config).unwrap();
    detector.handle(SensorEvent::ToggleDetection { enabled: true }, 0);
    detector
}

fn lenient() -> DetectorConfig {
    let mut config = DetectorConfig::default();
    config.clustering.min_surface_area = 0.0;
    config
}

fn hit_batch(points: &[Vec3]) -> SensorEvent {
    SensorEvent::HitTest {
        hits: points
            .iter()
            .map(|p| HitPoint {
                point: *p,
                normal: UP,
            })
            .collect(),
    }
}

/// Twenty tightly packed points: confidence 1.0 on promotion.
fn dense(center: Vec3) -> Vec<Vec3> {
    (0..20)
        .map(|i| center + Vec3::new((i % 5) as f32 * 0.005, 0.0, (i / 5) as f32 * 0.005))
        .collect()
}

fn offsets() -> impl Strategy<Value = Vec<(f32, f32, f32)>> {
    // Inside a 5cm cube every pair is closer than the 10cm merge threshold.
    prop::collection::vec((0.0f32..0.05, 0.0f32..0.05, 0.0f32..0.05), 1..40)
}

proptest! {
    #[test]
    fn close_samples_form_one_cluster_in_any_order(points in offsets().prop_shuffle()) {
        let samples: Vec<Sample> = points
            .iter()
            .map(|(x, y, z)| Sample {
                position: Vec3::new(*x, 0.75 + *y, -1.0 + *z),
                normal: UP,
                captured_at: 0,
            })
            .collect();
        let clusters = SurfaceClusterer::new(0.1).cluster(&samples);
        prop_assert_eq!(clusters.len(), 1);
        prop_assert_eq!(clusters[0].member_count, samples.len());
    }

    #[test]
    fn confidence_never_decreases(steps in prop::collection::vec((-0.03f32..0.03, -0.03f32..0.03), 1..60)) {
        let mut detector = started(lenient());
        let center = Vec3::new(0.0, 0.75, -1.0);
        detector.handle(hit_batch(&[center; 5]), 0);
        let mut last = detector.registry().surfaces().next().unwrap().confidence;

        for (i, (dx, dz)) in steps.iter().enumerate() {
            detector.handle(hit_batch(&[center + Vec3::new(*dx, 0.0, *dz)]), i as u64 * 10);
            prop_assert_eq!(detector.registry().surface_count(), 1);
            let now = detector.registry().surfaces().next().unwrap().confidence;
            prop_assert!(now >= last);
            prop_assert!(now <= 1.0);
            last = now;
        }
    }

    #[test]
    fn placements_never_exceed_capacity(
        count in 1usize..9,
        capacity in 1usize..5,
        idle_gaps in prop::collection::vec(0u64..90_000, 1..6),
    ) {
        let mut config = lenient();
        config.placement.max_placements = capacity;
        config.confidence.hit_test_ttl_ms = 10_000_000;
        let mut detector = started(config);
        let observer = ObserverPose::new(Vec3::new(0.0, 1.6, 0.0), Vec3::new(0.0, -0.4, -1.0));

        for i in 0..count {
            let x = i as f32 * 0.4 - 1.6;
            detector.handle(hit_batch(&dense(Vec3::new(x, 0.75, -2.0))), 0);
        }
        let mut now = 0;
        for gap in idle_gaps {
            now += gap;
            detector.tick(now, &observer);
            prop_assert!(detector.registry().placement_count() <= capacity);
            prop_assert!(
                detector.registry().check_invariants_with(capacity).is_ok(),
                "{:?}",
                detector.registry().check_invariants_with(capacity)
            );
        }
    }

    #[test]
    fn at_most_one_placement_active(
        forwards in prop::collection::vec((-1.0f32..1.0, -1.0f32..0.2, -1.0f32..1.0), 1..30),
    ) {
        let mut detector = started(lenient());
        let eye = Vec3::new(0.0, 1.2, 0.0);
        let setup = ObserverPose::new(eye, Vec3::new(0.0, -0.4, -1.0));
        for x in [-0.5f32, 0.0, 0.5] {
            detector.handle(hit_batch(&dense(Vec3::new(x, 0.75, -1.0))), 0);
        }
        detector.tick(300, &setup);
        prop_assert_eq!(detector.registry().placement_count(), 3);

        for (x, y, z) in forwards {
            let observer = ObserverPose::new(eye, Vec3::new(x, y, z));
            detector.frame(&observer);
            let active = detector
                .registry()
                .placements()
                .iter()
                .filter(|p| p.is_active)
                .count();
            prop_assert!(active <= 1);
            prop_assert!(detector.registry().check_invariants().is_ok());
        }
    }
}
