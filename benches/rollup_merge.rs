use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kuba_rollup::clock::ManualClock;
use kuba_rollup::engine::{InMemoryMetricStore, MetricStore, WriteRequest};
use kuba_rollup::rollup::{BasicRollup, HistogramRollup, RollupInput, TimerRollup};
use kuba_rollup::services::RollupOrchestrator;
use kuba_rollup::types::Points;
use kuba_rollup::{codec, config::RollupConfig};
use kuba_rollup::{Granularity, Locator, Number, Rollup, RollupCodec, RollupType, Sample};
use std::sync::Arc;

fn create_samples(count: usize, start: i64) -> Points<Number> {
    (0..count)
        .map(|i| (start + i as i64 * 1_000, Number::Double(50.0 + (i % 17) as f64)))
        .collect()
}

/// Twelve 5m rollups of `per_slot` samples each
fn create_slot_rollups<F>(per_slot: usize, build: F) -> Points<Rollup>
where
    F: Fn(&Points<Number>) -> Rollup,
{
    (0..12)
        .map(|slot| {
            let start = slot * 300_000;
            (start, build(&create_samples(per_slot, start)))
        })
        .collect()
}

fn bench_compute_from_raw(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_from_raw");

    for size in [60, 300, 3000].iter() {
        let input = RollupInput::Raw(create_samples(*size, 0));
        for rollup_type in [RollupType::Basic, RollupType::Timer, RollupType::Histogram] {
            group.bench_with_input(
                BenchmarkId::new(rollup_type.name(), size),
                size,
                |b, _| b.iter(|| black_box(rollup_type.compute(Granularity::Full, &input).unwrap())),
            );
        }
    }

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for size in [10, 100].iter() {
        let inputs = [
            ("basic", create_slot_rollups(*size, |s| BasicRollup::from_raw(s).into())),
            ("timer", create_slot_rollups(*size, |s| TimerRollup::from_raw(s).into())),
            ("histogram", create_slot_rollups(*size, |s| HistogramRollup::from_raw(s).into())),
        ];
        for (name, points) in inputs.iter() {
            group.bench_with_input(BenchmarkId::new(*name, size), size, |b, _| {
                b.iter(|| black_box(Rollup::merge_all(points).unwrap()))
            });
        }
    }

    group.finish();
}

fn bench_rollup_interval(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let clock = Arc::new(ManualClock::new(10_000_000));
    let store = Arc::new(InMemoryMetricStore::with_clock(clock.clone()));
    let locator = Locator::new("bench", "host.cpu");

    let batch: Vec<WriteRequest> = (0..3_600)
        .map(|i| {
            let bytes = codec::encode_raw(&Sample::Double(i as f64 * 0.25)).unwrap();
            WriteRequest::new(locator.clone(), Granularity::Full, i * 1_000, bytes, 86_400)
        })
        .collect();
    rt.block_on(store.put(batch)).unwrap();

    let orchestrator = RollupOrchestrator::new(
        store,
        RollupCodec::new(),
        RollupConfig::default(),
        clock,
    );

    c.bench_function("rollup_interval_1h_to_5m", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    orchestrator
                        .rollup_interval(&locator, RollupType::Basic, Granularity::Min5, 0, 3_599_999)
                        .await
                        .unwrap(),
                )
            })
        });
    });
}

criterion_group!(benches, bench_compute_from_raw, bench_merge, bench_rollup_interval);
criterion_main!(benches);
