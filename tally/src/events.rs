use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::job::{Job, JobId};

/// Metadata envelope attached to every job event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub version: u16,
    pub event_id: Uuid,
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(job_id: JobId) -> Self {
        Self {
            version: 1,
            event_id: Uuid::now_v7(),
            job_id,
            timestamp: Utc::now(),
        }
    }
}

/// Job lifecycle notification with metadata and payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub meta: EventMeta,
    pub payload: JobEventPayload,
}

impl JobEvent {
    pub fn new(payload: JobEventPayload) -> Self {
        Self {
            meta: EventMeta::new(payload.job().id),
            payload,
        }
    }

    pub fn kind(&self) -> JobEventKind {
        self.payload.kind()
    }

    /// Snapshot of the job at the moment the event was produced.
    pub fn job(&self) -> &Job {
        self.payload.job()
    }
}

/// Event payload emitted for job lifecycle transitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
#[non_exhaustive]
pub enum JobEventPayload {
    /// Job was submitted.
    Added { job: Job },
    /// Job was handed to a worker.
    Active { job: Job },
    /// Job completed successfully.
    Completed { job: Job },
    /// Job failed after exhausting its attempts.
    Failed { job: Job },
    /// Job failed and was re-delayed for another attempt.
    Retrying { job: Job, delay_ms: u64 },
    /// Job progress changed.
    Progress { job: Job },
    /// Job was removed by an administrative call.
    Removed { job: Job },
}

impl JobEventPayload {
    pub fn kind(&self) -> JobEventKind {
        match self {
            JobEventPayload::Added { .. } => JobEventKind::Added,
            JobEventPayload::Active { .. } => JobEventKind::Active,
            JobEventPayload::Completed { .. } => JobEventKind::Completed,
            JobEventPayload::Failed { .. } => JobEventKind::Failed,
            JobEventPayload::Retrying { .. } => JobEventKind::Retrying,
            JobEventPayload::Progress { .. } => JobEventKind::Progress,
            JobEventPayload::Removed { .. } => JobEventKind::Removed,
        }
    }

    pub fn job(&self) -> &Job {
        match self {
            JobEventPayload::Added { job }
            | JobEventPayload::Active { job }
            | JobEventPayload::Completed { job }
            | JobEventPayload::Failed { job }
            | JobEventPayload::Retrying { job, .. }
            | JobEventPayload::Progress { job }
            | JobEventPayload::Removed { job } => job,
        }
    }
}

/// Discriminant of [`JobEventPayload`], handy for filtering.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobEventKind {
    Added,
    Active,
    Completed,
    Failed,
    Retrying,
    Progress,
    Removed,
}

impl JobEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventKind::Added => "added",
            JobEventKind::Active => "active",
            JobEventKind::Completed => "completed",
            JobEventKind::Failed => "failed",
            JobEventKind::Retrying => "retrying",
            JobEventKind::Progress => "progress",
            JobEventKind::Removed => "removed",
        }
    }
}

impl Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for publishing job lifecycle events.
///
/// Publishing happens inline with scheduler transitions, so implementations
/// must not block.
pub trait JobEventPublisher: Send + Sync {
    /// Publish a job event.
    fn publish(&self, event: JobEvent) -> anyhow::Result<()>;
    /// Subscribe to job events.
    fn subscribe_jobs(&self) -> broadcast::Receiver<JobEvent>;
}

/// In-process event bus using a tokio broadcast channel.
///
/// `InProcEventBus` is a lightweight, fan-out bus: every subscriber receives
/// every event published after it subscribed. A subscriber that falls behind
/// by more than the capacity receives `RecvError::Lagged` and loses the
/// oldest events, but never blocks the publisher.
///
/// # Example
///
/// ```ignore
/// use tally::{InProcEventBus, JobEventPublisher};
///
/// let bus = InProcEventBus::new(1000);
/// let mut rx1 = bus.subscribe_jobs();
/// let mut rx2 = bus.subscribe_jobs();
/// ```
pub struct InProcEventBus {
    job_sender: broadcast::Sender<JobEvent>,
    job_capacity: usize,
}

impl std::fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("job_capacity", &self.job_capacity)
            .field("job_subscribers", &self.job_sender.receiver_count())
            .finish()
    }
}

impl InProcEventBus {
    /// Create a new event bus buffering up to `capacity` events per
    /// subscriber. A zero capacity is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (job_sender, _) = broadcast::channel(capacity);
        Self {
            job_sender,
            job_capacity: capacity,
        }
    }

    /// Get the number of active job event subscribers.
    pub fn job_subscriber_count(&self) -> usize {
        self.job_sender.receiver_count()
    }

    /// Get the configured capacity for the job event channel.
    pub fn job_capacity(&self) -> usize {
        self.job_capacity
    }

    /// Publish a job event to all subscribers.
    ///
    /// This method is non-blocking. If no subscribers exist, the event
    /// is silently dropped.
    pub fn publish_job(&self, event: JobEvent) -> anyhow::Result<()> {
        let _ = self.job_sender.send(event);
        Ok(())
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe_job_events(&self) -> broadcast::Receiver<JobEvent> {
        self.job_sender.subscribe()
    }
}

impl JobEventPublisher for InProcEventBus {
    fn publish(&self, event: JobEvent) -> anyhow::Result<()> {
        self.publish_job(event)
    }

    fn subscribe_jobs(&self) -> broadcast::Receiver<JobEvent> {
        self.subscribe_job_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn sample_job() -> Job {
        Job::new("echo", json!({"value": 1}), JobOptions::default(), Utc::now())
    }

    #[tokio::test]
    async fn test_event_bus_broadcast_to_multiple_subscribers() {
        let bus = InProcEventBus::new(100);

        let mut rx1 = bus.subscribe_jobs();
        let mut rx2 = bus.subscribe_jobs();
        let mut rx3 = bus.subscribe_jobs();

        for _ in 0..5 {
            let event = JobEvent::new(JobEventPayload::Added { job: sample_job() });
            bus.publish(event).unwrap();
        }

        // All 3 receivers should get all 5 events
        for _ in 0..5 {
            for rx in [&mut rx1, &mut rx2, &mut rx3] {
                let event = timeout(Duration::from_millis(100), rx.recv())
                    .await
                    .expect("event should arrive")
                    .expect("channel open");
                assert_eq!(event.kind(), JobEventKind::Added);
            }
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_doesnt_block_publisher() {
        let bus = InProcEventBus::new(2);
        let mut rx = bus.subscribe_jobs();

        for _ in 0..5 {
            let event = JobEvent::new(JobEventPayload::Progress { job: sample_job() });
            bus.publish(event).unwrap();
        }

        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        match result.expect("recv should not hang") {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert_eq!(skipped, 3),
            Ok(_) => panic!("expected lag notification first"),
            Err(broadcast::error::RecvError::Closed) => {
                panic!("Channel should not be closed");
            }
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = InProcEventBus::new(4);
        let event = JobEvent::new(JobEventPayload::Added { job: sample_job() });
        assert!(bus.publish(event).is_ok());
    }

    #[test]
    fn test_event_meta_tracks_job_id() {
        let job = sample_job();
        let event = JobEvent::new(JobEventPayload::Retrying {
            job: job.clone(),
            delay_ms: 10,
        });
        assert_eq!(event.meta.version, 1);
        assert_eq!(event.meta.job_id, job.id);
        assert_eq!(event.job().id, job.id);
        assert!(event.meta.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_bus_debug_format() {
        let bus = InProcEventBus::new(100);
        let _rx1 = bus.subscribe_jobs();
        let _rx2 = bus.subscribe_jobs();

        let debug_str = format!("{:?}", bus);
        assert!(debug_str.contains("InProcEventBus"));
        assert!(debug_str.contains("job_subscribers: 2"));
        assert!(debug_str.contains("job_capacity: 100"));
    }

    #[test]
    fn test_payload_serializes_with_event_tag() {
        let event = JobEvent::new(JobEventPayload::Removed { job: sample_job() });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["payload"]["event"], "removed");
        assert_eq!(value["payload"]["job"]["type"], "echo");
    }

    #[test]
    fn test_every_kind_has_a_label() {
        let job = sample_job();
        let payloads = vec![
            JobEventPayload::Added { job: job.clone() },
            JobEventPayload::Active { job: job.clone() },
            JobEventPayload::Completed { job: job.clone() },
            JobEventPayload::Failed { job: job.clone() },
            JobEventPayload::Retrying { job: job.clone(), delay_ms: 1 },
            JobEventPayload::Progress { job: job.clone() },
            JobEventPayload::Removed { job },
        ];
        let labels: Vec<_> = payloads.iter().map(|p| p.kind().as_str()).collect();
        assert_eq!(
            labels,
            vec!["added", "active", "completed", "failed", "retrying", "progress", "removed"]
        );
    }
}
