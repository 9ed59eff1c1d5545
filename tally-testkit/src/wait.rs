use std::time::Duration;
use tally::{Job, JobId, JobOptions, JobScheduler, JobStatus, SchedulerConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Scheduler configuration with short intervals for tests.
///
/// Ticks every 10ms and retries after 10ms so that retry scenarios finish
/// quickly.
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_promote_interval_ms(10)
        .with_dispatch_interval_ms(10)
        .with_clean_interval_ms(60_000)
        .with_shutdown_timeout_ms(2_000)
        .with_default_options(JobOptions {
            backoff_delay_ms: 10,
            ..JobOptions::default()
        })
}

/// Poll `condition` until it holds or `timeout` elapses. Returns whether it
/// held.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Wait until the job reaches `status` and return its snapshot.
pub async fn wait_for_status(
    scheduler: &JobScheduler,
    id: &JobId,
    status: JobStatus,
    timeout: Duration,
) -> anyhow::Result<Job> {
    let reached = wait_until(timeout, || {
        scheduler
            .get_job(id)
            .is_some_and(|job| job.status == status)
    })
    .await;

    match scheduler.get_job(id) {
        Some(job) if reached && job.status == status => Ok(job),
        Some(job) => anyhow::bail!(
            "job {id} is {} after {timeout:?}, expected {status}",
            job.status
        ),
        None => anyhow::bail!("job {id} not found"),
    }
}

/// Wait until every job in `ids` is terminal.
pub async fn wait_for_terminal(
    scheduler: &JobScheduler,
    ids: &[JobId],
    timeout: Duration,
) -> anyhow::Result<Vec<Job>> {
    let done = wait_until(timeout, || {
        ids.iter().all(|id| {
            scheduler
                .get_job(id)
                .is_some_and(|job| job.is_terminal())
        })
    })
    .await;
    if !done {
        anyhow::bail!("jobs did not settle within {timeout:?}");
    }
    Ok(ids.iter().filter_map(|id| scheduler.get_job(id)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(20), || false).await);
    }

    #[tokio::test]
    async fn test_wait_until_polls_condition() {
        let calls = AtomicU32::new(0);
        let ok = wait_until(Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst) >= 2
        })
        .await;
        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_fast_config_is_valid() {
        let config = fast_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_options.backoff_delay_ms, 10);
    }
}
