//! Stress tests for the tally scheduler.
//!
//! Pushes 1000 jobs through 10 workers and checks that every job completes
//! exactly once without the active set ever exceeding the concurrency bound.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tally::{JobEvent, JobEventPayload, JobOptionsOverride, JobScheduler, JobStatus};
use tally_testkit::{fast_config, init_tracing, FlakyProcessor, SlowProcessor};
use tokio::sync::broadcast;
use tokio::time::timeout;

async fn next_event(rx: &mut broadcast::Receiver<JobEvent>) -> Option<JobEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_1000_jobs_with_10_workers() {
    init_tracing();
    let scheduler = JobScheduler::new(
        fast_config()
            .with_max_concurrency(10)
            .with_event_capacity(10_000),
    )
    .unwrap();
    let slow = SlowProcessor::new(Duration::from_millis(1));
    scheduler.register("work", slow.clone());

    let mut rx = scheduler.subscribe();
    scheduler.start().await.expect("start scheduler");

    // Sample the active count while jobs drain.
    let max_active = Arc::new(AtomicUsize::new(0));
    let sampling = Arc::new(AtomicBool::new(true));
    let sampler = tokio::spawn({
        let scheduler = scheduler.clone();
        let max_active = Arc::clone(&max_active);
        let sampling = Arc::clone(&sampling);
        async move {
            while sampling.load(Ordering::SeqCst) {
                let active = scheduler.get_stats().active;
                max_active.fetch_max(active, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
    });

    let mut expected = HashSet::new();
    for idx in 0..1000 {
        let id = scheduler
            .add(
                "work",
                json!({ "n": idx }),
                JobOptionsOverride::new().with_priority(idx % 4),
            )
            .unwrap();
        expected.insert(id);
    }

    let mut completed = HashSet::new();
    let wait = timeout(Duration::from_secs(30), async {
        while completed.len() < expected.len() {
            match next_event(&mut rx).await {
                Some(event) => {
                    if let JobEventPayload::Completed { job } = event.payload {
                        assert!(completed.insert(job.id), "job {} completed twice", job.id);
                    }
                }
                None => break,
            }
        }
    })
    .await;

    sampling.store(false, Ordering::SeqCst);
    sampler.await.unwrap();

    assert!(wait.is_ok(), "timed out waiting for completions");
    assert_eq!(completed, expected);
    assert_eq!(slow.completed(), 1000);
    assert!(slow.max_in_flight() <= 10, "max in flight {}", slow.max_in_flight());
    assert!(max_active.load(Ordering::SeqCst) <= 10);
    assert_eq!(scheduler.get_stats().completed, 1000);

    scheduler.shutdown().await.expect("shutdown scheduler");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_retries_under_contention() {
    init_tracing();
    let scheduler = JobScheduler::new(fast_config().with_max_concurrency(8)).unwrap();
    let flaky = FlakyProcessor::new(2);
    scheduler.register("flaky", flaky.clone());
    scheduler.start().await.unwrap();

    let ids: Vec<_> = (0..200)
        .map(|_| {
            scheduler
                .add("flaky", json!({}), tally_testkit::quick_retries(3))
                .unwrap()
        })
        .collect();

    let jobs = tally_testkit::wait_for_terminal(&scheduler, &ids, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(jobs
        .iter()
        .all(|job| job.status == JobStatus::Completed && job.attempts == 2));
    assert_eq!(flaky.calls(), 400);

    scheduler.shutdown().await.unwrap();
}
