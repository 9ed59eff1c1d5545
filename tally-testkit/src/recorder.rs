use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tally::{JobEvent, JobEventKind, JobId, JobScheduler};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Collects every event a scheduler publishes from the moment it is
/// attached.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<JobEvent>>>,
    handle: JoinHandle<()>,
}

impl EventRecorder {
    /// Subscribe to `scheduler` and start recording in a background task.
    pub fn attach(scheduler: &JobScheduler) -> Self {
        let mut rx = scheduler.subscribe();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => sink.lock().push(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("event recorder lagged, skipped {skipped} events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self { events, handle }
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().clone()
    }

    /// Kinds of the events recorded for one job, in publication order.
    pub fn kinds_for(&self, id: &JobId) -> Vec<JobEventKind> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.meta.job_id == *id)
            .map(JobEvent::kind)
            .collect()
    }

    pub fn count(&self, kind: JobEventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }

    /// Wait until an event of `kind` for `id` has been recorded.
    pub async fn wait_for(
        &self,
        id: &JobId,
        kind: JobEventKind,
        timeout: Duration,
    ) -> anyhow::Result<JobEvent> {
        let found = crate::wait::wait_until(timeout, || {
            self.events
                .lock()
                .iter()
                .any(|event| event.meta.job_id == *id && event.kind() == kind)
        })
        .await;
        if !found {
            anyhow::bail!("no {kind} event for job {id} within {timeout:?}");
        }
        self.events
            .lock()
            .iter()
            .find(|event| event.meta.job_id == *id && event.kind() == kind)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("recorded event disappeared"))
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
