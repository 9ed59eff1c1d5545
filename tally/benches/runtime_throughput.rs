//! End-to-end throughput benchmarks for the scheduler.
//!
//! Measures the complete job lifecycle through the runtime:
//! add → dispatch → process → complete

#![allow(missing_docs)]

use std::collections::HashSet;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};
use tally::{
    processor_fn, JobEvent, JobEventPayload, JobId, JobOptionsOverride, JobScheduler,
    SchedulerConfig,
};
use tokio::sync::broadcast;

/// Helper to receive next event with lag handling.
async fn next_event(rx: &mut broadcast::Receiver<JobEvent>) -> Option<JobEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Scheduler configuration tuned for benchmarks.
fn bench_config(workers: usize) -> SchedulerConfig {
    SchedulerConfig::default()
        .with_max_concurrency(workers)
        .with_dispatch_interval_ms(5)
        .with_promote_interval_ms(50)
        .with_event_capacity(100_000)
}

/// Build, start, drain `jobs` no-op jobs, and return the elapsed time.
async fn run_batch(workers: usize, jobs: usize) -> Duration {
    let scheduler = JobScheduler::new(bench_config(workers)).expect("build scheduler");
    scheduler.register(
        "noop",
        processor_fn(|_ctx| async { Ok::<Value, anyhow::Error>(Value::Null) }),
    );
    let mut rx = scheduler.subscribe();
    scheduler.start().await.expect("start scheduler");

    let start_instant = Instant::now();
    let mut expected = HashSet::with_capacity(jobs);
    for idx in 0..jobs {
        let id: JobId = scheduler
            .add("noop", json!({ "n": idx }), JobOptionsOverride::new())
            .expect("add should succeed");
        expected.insert(id);
    }

    let mut completed = HashSet::with_capacity(jobs);
    while completed.len() < expected.len() {
        match next_event(&mut rx).await {
            Some(event) => {
                if let JobEventPayload::Completed { job } = event.payload {
                    completed.insert(job.id);
                }
            }
            None => break,
        }
    }
    let elapsed = start_instant.elapsed();

    scheduler.shutdown().await.expect("shutdown scheduler");
    elapsed
}

/// Benchmark: Jobs per second with varying worker counts.
fn bench_runtime_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");

    let mut group = c.benchmark_group("runtime_throughput");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(20));

    for workers in [1usize, 5, 10] {
        for jobs in [100usize, 500] {
            let bench_id = BenchmarkId::new(format!("{workers}_workers"), format!("{jobs}_jobs"));
            group.throughput(Throughput::Elements(jobs as u64));
            group.bench_with_input(bench_id, &(workers, jobs), |b, &(workers, jobs)| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let mut total = Duration::ZERO;
                    for _ in 0..iters {
                        total += run_batch(workers, jobs).await;
                    }
                    total
                });
            });
        }
    }

    group.finish();
}

/// Benchmark: Latency of a single job from add to completion on an idle
/// scheduler.
fn bench_single_job_latency(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");

    let mut group = c.benchmark_group("single_job_latency");
    group.sample_size(20);

    group.bench_function("add_to_completed", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                total += run_batch(1, 1).await;
            }
            total
        });
    });

    group.finish();
}

criterion_group!(benches, bench_runtime_throughput, bench_single_job_latency);
criterion_main!(benches);
