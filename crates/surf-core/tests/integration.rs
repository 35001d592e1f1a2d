//! Integration tests exercising the full detection pipeline:
//! sensor events → ingestion → clustering → registry → placement → visibility.

use surf_core::{
    DetectorConfig, DetectorEvent, HitPoint, ObserverPose, Quaternion, RemovalReason,
    SensorEvent, SurfaceDetector, SurfaceSource, SyntheticScene, Table, UP, Vec3, export_json,
    import_json,
};

/// Hit-test batches here form a ±2cm jitter cluster (0.0016 m² footprint), far
/// below the default 0.15 m² promotion area.
fn small_area_config() -> DetectorConfig {
    let mut config = DetectorConfig::default();
    config.clustering.min_surface_area = 0.001;
    config
}

fn started(config: DetectorConfig) -> SurfaceDetector {
    let mut detector = SurfaceDetector::new(config).unwrap();
    detector.handle(SensorEvent::ToggleDetection { enabled: true }, 0);
    detector
}

fn hit_at(p: Vec3) -> HitPoint {
    HitPoint {
        point: p,
        normal: UP,
    }
}

fn batch(points: &[Vec3]) -> SensorEvent {
    SensorEvent::HitTest {
        hits: points.iter().map(|p| hit_at(*p)).collect(),
    }
}

/// Five points around `center` spanning ±2cm in x and z.
fn jitter5(center: Vec3) -> Vec<Vec3> {
    [(0.0, 0.0), (0.02, 0.01), (-0.02, -0.02), (0.01, 0.02), (-0.01, -0.01)]
        .iter()
        .map(|(dx, dz)| center + Vec3::new(*dx, 0.0, *dz))
        .collect()
}

/// A 5 × 4 grid of points 1cm apart: twenty members, 0.0012 m².
fn grid20(center: Vec3) -> Vec<Vec3> {
    let mut points = Vec::new();
    for i in 0..5 {
        for k in 0..4 {
            points.push(center + Vec3::new(i as f32 * 0.01 - 0.02, 0.0, k as f32 * 0.01 - 0.015));
        }
    }
    points
}

fn looking_at(target: Vec3) -> ObserverPose {
    let eye = Vec3::new(0.0, 1.6, 0.0);
    ObserverPose::new(eye, target - eye)
}

fn only_surface_confidence(detector: &SurfaceDetector) -> f32 {
    assert_eq!(detector.registry().surface_count(), 1);
    detector.registry().surfaces().next().unwrap().confidence
}

fn created(events: &[DetectorEvent]) -> Vec<&DetectorEvent> {
    events
        .iter()
        .filter(|e| matches!(e, DetectorEvent::PlacementCreated { .. }))
        .collect()
}

const TABLE: Vec3 = Vec3::new(0.0, 0.75, -1.0);

/// Five samples promote at 0.25, four re-detections reach 0.45.
#[test]
fn five_samples_promote_then_redetections_step() {
    let mut detector = started(small_area_config());
    let events = detector.handle(batch(&jitter5(TABLE)), 0);
    assert!(matches!(events[0], DetectorEvent::SurfaceDetected { .. }));
    assert!((only_surface_confidence(&detector) - 0.25).abs() < 1e-6);

    let offsets = [(0.01, 0.0), (-0.015, 0.01), (0.0, -0.018), (0.02, 0.02)];
    for (i, (dx, dz)) in offsets.iter().enumerate() {
        let p = TABLE + Vec3::new(*dx, 0.0, *dz);
        detector.handle(batch(&[p]), 100 * (i as u64 + 1));
    }
    assert!((only_surface_confidence(&detector) - 0.45).abs() < 1e-5);
    assert_eq!(detector.pending_samples(), 0);
}

/// 0.45 is below the placement threshold; reaching 0.6 places a keyboard
/// flush with the table.
#[test]
fn placement_waits_for_confidence() {
    let mut detector = started(small_area_config());
    let observer = looking_at(TABLE);
    detector.handle(batch(&jitter5(TABLE)), 0);
    for i in 0..4 {
        detector.handle(batch(&[TABLE + Vec3::new(0.005 * i as f32, 0.0, 0.0)]), 50);
    }

    let events = detector.tick(300, &observer);
    assert!(created(&events).is_empty());
    assert_eq!(detector.registry().placement_count(), 0);

    for i in 0..3 {
        detector.handle(batch(&[TABLE + Vec3::new(0.0, 0.0, 0.005 * i as f32)]), 400);
    }
    assert!(only_surface_confidence(&detector) >= 0.6 - 1e-5);

    let events = detector.tick(600, &observer);
    let placements = created(&events);
    assert_eq!(placements.len(), 1);
    let DetectorEvent::PlacementCreated {
        rotation, position, ..
    } = placements[0]
    else {
        unreachable!();
    };
    assert_eq!(*rotation, Quaternion::identity());
    assert!((position.y - 0.77).abs() < 1e-5);
    assert!(matches!(
        events.last(),
        Some(DetectorEvent::ScreenRequested { .. })
    ));
}

/// At capacity with every placement recently used, a fourth eligible
/// surface gets nothing.
#[test]
fn capacity_holds_when_all_placements_recent() {
    let mut detector = started(small_area_config());
    let tables: Vec<Vec3> = (0..4)
        .map(|i| Vec3::new(i as f32 * 0.6 - 0.9, 0.75, -1.5))
        .collect();
    let observer = looking_at(Vec3::new(0.0, 0.75, -1.5));

    for t in &tables[..3] {
        detector.handle(batch(&grid20(*t)), 0);
    }
    detector.tick(300, &observer);
    assert_eq!(detector.registry().placement_count(), 3);

    let ids: Vec<_> = detector.registry().placements().iter().map(|p| p.id).collect();
    for id in ids {
        let events = detector.handle(
            SensorEvent::KeyPress {
                placement_id: id,
                key: "k".into(),
            },
            5_000,
        );
        assert_eq!(events.len(), 1);
    }

    detector.handle(batch(&grid20(tables[3])), 8_000);
    assert_eq!(detector.registry().surface_count(), 4);
    let events = detector.tick(9_000, &observer);
    assert!(created(&events).is_empty());
    assert_eq!(detector.registry().placement_count(), 3);
    let fourth = detector
        .registry()
        .surfaces_by_creation()
        .last()
        .map(|s| s.has_placement());
    assert_eq!(fourth, Some(false));
}

/// A surface unseen for 11s disappears with its placement in the same tick.
#[test]
fn expired_surface_takes_placement_with_it() {
    let mut detector = started(small_area_config());
    let observer = looking_at(TABLE);
    detector.handle(batch(&grid20(TABLE)), 0);
    detector.tick(300, &observer);
    assert_eq!(detector.registry().placement_count(), 1);

    let events = detector.tick(11_000, &observer);
    assert!(detector.registry().is_empty());
    let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["placementRemoved", "surfaceLost"]);
    assert!(matches!(
        events[0],
        DetectorEvent::PlacementRemoved {
            reason: RemovalReason::SurfaceExpired,
            ..
        }
    ));
}

/// A cursor sweeping a desk in a serpentine grows one cluster large enough
/// for the default promotion area.
#[test]
fn sweeping_cursor_meets_default_area() {
    let mut detector = started(DetectorConfig::default());
    let observer = looking_at(TABLE);
    for row in 0..11 {
        let z = -1.2 + row as f32 * 0.04;
        let mut points: Vec<Vec3> = (0..21)
            .map(|i| Vec3::new(-0.4 + i as f32 * 0.04, 0.75, z))
            .collect();
        if row % 2 == 1 {
            points.reverse();
        }
        detector.handle(batch(&points), row as u64 * 100);
    }

    assert_eq!(detector.registry().surface_count(), 1);
    let surface = detector.registry().surfaces().next().unwrap();
    assert!(surface.area >= 0.15, "area {}", surface.area);
    assert!((surface.confidence - 1.0).abs() < 1e-6);

    let events = detector.tick(1_200, &observer);
    assert_eq!(created(&events).len(), 1);
}

#[test]
fn office_sweep_places_on_both_tables() {
    let mut detector = started(DetectorConfig::default());
    let mut scene = SyntheticScene::office(11);
    let mut now = 0;
    for table in 0..scene.tables.len() {
        for row in scene.sweep(table, 0.04) {
            detector.handle(SensorEvent::HitTest { hits: row }, now);
            now += 100;
        }
    }
    assert_eq!(detector.registry().surface_count(), 2);
    assert!(detector.registry().surfaces().all(|s| s.area >= 0.15));

    let events = detector.tick(now, &looking_at(TABLE));
    assert_eq!(created(&events).len(), 2);
}

#[test]
fn mesh_table_places_keyboard_with_defaults() {
    let mut detector = started(DetectorConfig::default());
    detector.handle(
        SensorEvent::Capabilities {
            hit_test: false,
            mesh: true,
        },
        0,
    );
    let request = detector.poll_mesh_request(0).unwrap();
    let mut payload = Table::new(TABLE, 1.2, 0.6).mesh(6);
    payload.ticket = Some(request.ticket);
    detector.handle(SensorEvent::MeshUpdate(payload), 200);

    let surface = detector.registry().surfaces().next().unwrap();
    assert_eq!(surface.source, SurfaceSource::Mesh);
    assert!((surface.confidence - 0.9).abs() < 1e-6);
    assert!((surface.area - 0.72).abs() < 1e-3);

    let events = detector.tick(300, &looking_at(TABLE));
    assert_eq!(created(&events).len(), 1);

    // Mesh surfaces outlive hit-test ones.
    assert_eq!(detector.tick(12_000, &looking_at(TABLE)).len(), 0);
    assert_eq!(detector.registry().surface_count(), 1);
}

/// Mesh surfaces last 30s past their last sighting, placement included.
#[test]
fn mesh_surface_expires_after_thirty_seconds() {
    let mut detector = started(DetectorConfig::default());
    detector.handle(
        SensorEvent::Capabilities {
            hit_test: false,
            mesh: true,
        },
        0,
    );
    let request = detector.poll_mesh_request(0).unwrap();
    let mut payload = Table::new(TABLE, 1.2, 0.6).mesh(6);
    payload.ticket = Some(request.ticket);
    detector.handle(SensorEvent::MeshUpdate(payload), 200);
    let observer = looking_at(TABLE);
    assert_eq!(created(&detector.tick(300, &observer)).len(), 1);

    let events = detector.tick(200 + 30_000, &observer);
    assert!(events.iter().all(|e| !matches!(
        e,
        DetectorEvent::PlacementRemoved { .. } | DetectorEvent::SurfaceLost { .. }
    )));
    assert_eq!(detector.registry().surface_count(), 1);

    let events = detector.tick(200 + 30_001, &observer);
    let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, ["placementRemoved", "surfaceLost"]);
    assert_eq!(detector.registry().surface_count(), 0);
    assert_eq!(detector.registry().placement_count(), 0);
}

#[test]
fn frames_activate_the_placement_in_view() {
    let mut detector = started(small_area_config());
    let observer = looking_at(TABLE);
    detector.handle(batch(&grid20(TABLE)), 0);
    detector.tick(300, &observer);

    let events = detector.frame(&observer);
    let active = detector.registry().active_placement().unwrap().id;
    assert!(events.contains(&DetectorEvent::PlacementActiveChanged {
        placement_id: active,
        is_active: true
    }));
    assert!(events.contains(&DetectorEvent::PlacementVisibilityChanged {
        placement_id: active,
        is_visible: true
    }));

    // Steady state: nothing changes.
    assert!(detector.frame(&observer).is_empty());

    let away = ObserverPose::new(observer.position, Vec3::new(0.0, 0.0, 1.0));
    let events = detector.frame(&away);
    assert!(detector.registry().active_placement().is_none());
    assert_eq!(events.len(), 2);
}

#[test]
fn snapshot_survives_export_and_import() {
    let mut detector = started(small_area_config());
    let observer = looking_at(TABLE);
    detector.handle(batch(&grid20(TABLE)), 0);
    detector.tick(300, &observer);
    detector.frame(&observer);

    let snapshot = detector.snapshot(400);
    let json = export_json(&snapshot).unwrap();
    let registry = import_json(&json, detector.config().placement.max_placements).unwrap();
    assert_eq!(registry.surface_count(), 1);
    assert_eq!(registry.placement_count(), 1);
    assert!(registry.active_placement().is_some());
    assert!(registry.check_invariants().is_ok());
}

#[test]
fn session_end_then_restart_starts_clean() {
    let mut detector = started(small_area_config());
    let observer = looking_at(TABLE);
    detector.handle(batch(&grid20(TABLE)), 0);
    detector.tick(300, &observer);
    detector.handle(SensorEvent::SessionEnded, 500);
    assert!(detector.registry().is_empty());

    // Hits are ignored until detection is re-enabled.
    detector.handle(batch(&grid20(TABLE)), 600);
    assert!(detector.registry().is_empty());
    detector.handle(SensorEvent::ToggleDetection { enabled: true }, 700);
    detector.handle(batch(&grid20(TABLE)), 800);
    assert_eq!(detector.registry().surface_count(), 1);
}
