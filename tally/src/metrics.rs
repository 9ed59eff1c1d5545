//! Prometheus metrics for the tally scheduler.
//!
//! Compiled only with the `metrics` feature.
//!
//! # Metrics
//!
//! ## Counters
//! - `tally_jobs_added_total` - jobs accepted by `add`
//! - `tally_jobs_settled_total` - executions that settled, by outcome
//!
//! ## Gauges
//! - `tally_jobs` - jobs per status as of the last stats snapshot
//!
//! ## Histograms
//! - `tally_job_duration_seconds` - processor execution time
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, GaugeVec, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for tally metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `job_type`.
pub static JOBS_ADDED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("tally_jobs_added_total", "Total number of jobs added");
    CounterVec::new(opts, &["job_type"]).expect("tally_jobs_added_total metric creation failed")
});

/// Labels: `job_type`, `status` (`completed`, `retrying`, `failed`).
pub static JOBS_SETTLED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "tally_jobs_settled_total",
        "Total number of job executions that settled",
    );
    CounterVec::new(opts, &["job_type", "status"])
        .expect("tally_jobs_settled_total metric creation failed")
});

/// Labels: `status`.
pub static JOBS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("tally_jobs", "Number of known jobs per status");
    GaugeVec::new(opts, &["status"]).expect("tally_jobs metric creation failed")
});

/// Labels: `job_type`, `status`.
pub static JOB_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "tally_job_duration_seconds",
        "Job execution duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["job_type", "status"])
        .expect("tally_job_duration_seconds metric creation failed")
});

/// Register every metric with [`REGISTRY`].
///
/// Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_ADDED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_SETTLED_TOTAL.clone()),
        Box::new(JOBS.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_job_added(job_type: &str) {
    JOBS_ADDED_TOTAL.with_label_values(&[job_type]).inc();
}

pub fn record_job_settled(job_type: &str, status: &str) {
    JOBS_SETTLED_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
}

pub fn set_job_gauge(status: &str, count: f64) {
    JOBS.with_label_values(&[status]).set(count);
}

pub fn observe_job_duration(job_type: &str, status: &str, duration_secs: f64) {
    JOB_DURATION_SECONDS
        .with_label_values(&[job_type, status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization_is_idempotent() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization should succeed");
    }

    #[test]
    fn test_recorders_do_not_panic() {
        record_job_added("backup");
        record_job_settled("backup", "completed");
        record_job_settled("backup", "retrying");
        set_job_gauge("waiting", 3.0);
        observe_job_duration("backup", "failed", 0.25);
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        record_job_added("chain-sync");
        record_job_settled("chain-sync", "completed");

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("tally_jobs_added_total"));
        assert!(output.contains("tally_jobs_settled_total"));
    }
}
