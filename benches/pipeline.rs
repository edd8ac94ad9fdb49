//! Benchmarks for pipeline throughput.
//!
//! Run with: `cargo bench`
//! View reports in: `target/criterion/report/index.html`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::Duration;

use readpipe::{
    sink_fn, Consumer, IterSource, Pipeline, PipelineConfig, Producer, SlotArray, WakeupMode,
};

/// Push `items` integers through a squaring pipeline and return the sum the
/// sink observed.
fn run_pipeline(items: u64, workers: usize, wakeup: WakeupMode) -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    let total = Arc::new(AtomicU64::new(0));
    let sink_total = Arc::clone(&total);

    let producer = Producer::new(IterSource::new(0..items));
    let consumer = Consumer::new(sink_fn(move |v: u64| {
        sink_total.fetch_add(v, Ordering::Relaxed);
        Ok(())
    }));
    let config = PipelineConfig::new(workers)
        .with_wakeup(wakeup)
        .with_poll_interval(Duration::from_millis(1));
    let mut pipeline =
        Pipeline::new(producer, |v: u64| Ok(v.wrapping_mul(v)), consumer, config);
    pipeline.start();
    pipeline.wait_for_finish().expect("pipeline failed");
    total.load(Ordering::Relaxed)
}

/// Compare wakeup strategies at a fixed item count and worker count.
fn bench_wakeup_modes(c: &mut Criterion) {
    const ITEMS: u64 = 10_000;
    let mut group = c.benchmark_group("wakeup_modes");
    group.throughput(Throughput::Elements(ITEMS));

    for (name, mode) in [("semaphore", WakeupMode::Semaphore), ("poll", WakeupMode::Poll)] {
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| black_box(run_pipeline(ITEMS, 4, mode)));
        });
    }
    group.finish();
}

/// Scaling with worker count (semaphore wakeups).
fn bench_worker_scaling(c: &mut Criterion) {
    const ITEMS: u64 = 10_000;
    let mut group = c.benchmark_group("worker_scaling");
    group.throughput(Throughput::Elements(ITEMS));

    for workers in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter(|| black_box(run_pipeline(ITEMS, workers, WakeupMode::Semaphore)));
        });
    }
    group.finish();
}

/// Raw slot array handoff: publish then withdraw on a single thread.
fn bench_slot_array(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_array");
    group.throughput(Throughput::Elements(1));

    let slots: SlotArray<u64> = SlotArray::new(4);
    group.bench_function("publish_withdraw", |b| {
        b.iter(|| {
            slots.try_publish(Box::new(black_box(42u64))).unwrap();
            black_box(slots.try_withdraw().unwrap());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_wakeup_modes, bench_worker_scaling, bench_slot_array);
criterion_main!(benches);
