//! Basic scheduler example.
//!
//! Registers a few processors, submits jobs with different priorities,
//! delays and retry policies, and prints lifecycle events as they arrive.
//!
//! Set `TALLY_CONFIG=path/to/tally.toml` to load the scheduler configuration
//! from a file, and `RUST_LOG=tally=debug` for scheduler logs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde_json::{json, Value};
use tally::*;
use tokio::sync::broadcast::error::RecvError;

fn load_config() -> anyhow::Result<SchedulerConfig> {
    match std::env::var("TALLY_CONFIG") {
        Ok(path) => SchedulerConfig::load(&path),
        Err(_) => Ok(SchedulerConfig::default()
            .with_max_concurrency(2)
            .with_promote_interval_ms(100)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tally=info")),
        )
        .init();

    let config = load_config()?;
    println!("Scheduler config: {config:?}");

    let scheduler = JobScheduler::new(config).context("building scheduler")?;

    scheduler.register(
        "email",
        processor_fn(|ctx: JobContext| async move {
            let to = ctx
                .payload()
                .get("to")
                .and_then(Value::as_str)
                .unwrap_or("nobody")
                .to_string();
            for step in [25, 50, 75] {
                ctx.report_progress(step)?;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok::<Value, anyhow::Error>(json!({ "delivered_to": to }))
        }),
    );

    // Fails twice, then succeeds on the third attempt.
    let flaky_calls = Arc::new(AtomicU32::new(0));
    scheduler.register("flaky", {
        let flaky_calls = Arc::clone(&flaky_calls);
        processor_fn(move |ctx: JobContext| {
            let flaky_calls = Arc::clone(&flaky_calls);
            async move {
                flaky_calls.fetch_add(1, Ordering::SeqCst);
                if ctx.attempt() < 3 {
                    return Err(anyhow!("upstream unavailable (attempt {})", ctx.attempt()));
                }
                Ok(Value::from(ctx.attempt()))
            }
        })
    });

    scheduler.register(
        "broken",
        processor_fn(|_ctx: JobContext| async { Err::<Value, _>(anyhow!("Permanent failure")) }),
    );

    let mut rx = scheduler.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let job = event.job();
                    match &event.payload {
                        JobEventPayload::Retrying { delay_ms, .. } => println!(
                            "[EVENT] {:<9} {} ({}) retry in {}ms: {}",
                            event.kind(),
                            job.id,
                            job.job_type,
                            delay_ms,
                            job.error.as_deref().unwrap_or("-"),
                        ),
                        JobEventPayload::Progress { .. } => println!(
                            "[EVENT] {:<9} {} ({}) {}%",
                            event.kind(),
                            job.id,
                            job.job_type,
                            job.progress
                        ),
                        _ => println!("[EVENT] {:<9} {} ({})", event.kind(), job.id, job.job_type),
                    }
                }
                Err(RecvError::Lagged(skipped)) => println!("[EVENT] lagged, skipped {skipped}"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    scheduler.start().await?;

    let mut ids = Vec::new();
    ids.push(scheduler.add(
        "email",
        json!({ "to": "ops@example.com" }),
        JobOptionsOverride::new().with_priority(1),
    )?);
    ids.push(scheduler.add(
        "email",
        json!({ "to": "later@example.com" }),
        JobOptionsOverride::new().with_delay_ms(500),
    )?);
    ids.push(scheduler.add(
        "flaky",
        json!({}),
        JobOptionsOverride::new()
            .with_attempts(3)
            .with_backoff(BackoffStrategy::Exponential, 100),
    )?);
    ids.push(scheduler.add(
        "broken",
        json!({}),
        JobOptionsOverride::new()
            .with_attempts(2)
            .with_backoff(BackoffStrategy::Fixed, 100),
    )?);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let done = ids
            .iter()
            .filter_map(|id| scheduler.get_job(id))
            .all(|job| job.is_terminal());
        if done || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    println!();
    for id in &ids {
        if let Some(job) = scheduler.get_job(id) {
            println!(
                "{} {:<7} status={} attempts={} result={} error={}",
                job.id,
                job.job_type,
                job.status.as_str(),
                job.attempts,
                job.result.as_ref().map(Value::to_string).unwrap_or_default(),
                job.error.as_deref().unwrap_or("-"),
            );
        }
    }
    println!("Flaky processor calls: {}", flaky_calls.load(Ordering::SeqCst));
    println!("Stats: {:?}", scheduler.get_stats());

    scheduler.shutdown().await?;
    printer.abort();
    Ok(())
}
