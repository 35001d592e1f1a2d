//! Benchmark appending detector event batches to an in-memory journal.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use surf_core::{DetectorConfig, DetectorEvent, SensorEvent, SurfaceDetector, SyntheticScene};
use surf_store::Journal;

/// Outbound events from a synthetic office sweep, one batch per hit event.
fn office_batches(count: usize) -> Vec<Vec<DetectorEvent>> {
    let mut config = DetectorConfig::default();
    config.clustering.min_surface_area = 0.0;
    let Ok(mut detector) = SurfaceDetector::new(config) else {
        return Vec::new();
    };
    detector.handle(SensorEvent::ToggleDetection { enabled: true }, 0);

    let mut scene = SyntheticScene::office(7);
    (0..count)
        .filter_map(|i| scene.next_event().map(|e| detector.handle(e, i as u64 * 16)))
        .filter(|batch| !batch.is_empty())
        .collect()
}

fn bench_record_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_events");
    let config = DetectorConfig::default();
    for count in [100, 1_000] {
        let batches = office_batches(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &batches, |b, batches| {
            b.iter(|| {
                let journal = Journal::open_in_memory().unwrap();
                let session = journal.begin_session(&config, 0).unwrap();
                for (i, batch) in batches.iter().enumerate() {
                    black_box(journal.record_events(session, i as u64, batch).unwrap());
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_record_events);
criterion_main!(benches);
