//! The primary job index and every lifecycle transition over it.
//!
//! `JobStore` is synchronous and takes the current time as an argument. The
//! runtime wraps it in a single lock so that all transitions are serialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::error::JobFailure;
use crate::job::{deadline_after, clamp_progress, Job, JobId, JobOptions, JobStatus};
use crate::queue::{Archive, DelayedSet, JobStats, WaitingQueue};
use crate::retry::{decide_retry, RetryDecision};

/// Result of settling a failed execution.
#[derive(Clone, Debug, PartialEq)]
pub enum FailureOutcome {
    /// The job went back to `delayed` and will run again after `delay_ms`.
    Retrying { job: Job, delay_ms: u64 },
    /// The attempts budget is exhausted; the job is now `failed`.
    Failed(Job),
}

impl FailureOutcome {
    pub fn job(&self) -> &Job {
        match self {
            FailureOutcome::Retrying { job, .. } => job,
            FailureOutcome::Failed(job) => job,
        }
    }
}

/// Number of jobs pruned by a clean pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanReport {
    pub completed: usize,
    pub failed: usize,
}

impl CleanReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<JobId, Job>,
    waiting: WaitingQueue,
    delayed: DelayedSet,
    active: HashSet<JobId>,
    completed: Archive,
    failed: Archive,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job and place it in the delayed set or the waiting queue.
    pub fn add(
        &mut self,
        job_type: impl Into<String>,
        payload: Value,
        options: JobOptions,
        now: DateTime<Utc>,
    ) -> Job {
        let job = Job::new(job_type, payload, options, now);
        match job.next_run_at {
            Some(run_at) => self.delayed.push(job.id, run_at),
            None => self.waiting.push(job.id, job.options.priority),
        }
        self.jobs.insert(job.id, job.clone());
        job
    }

    /// Move every delayed job due at `now` into the waiting queue.
    pub fn promote_due(&mut self, now: DateTime<Utc>) -> Vec<Job> {
        let mut promoted = Vec::new();
        for id in self.delayed.take_due(now) {
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            job.status = JobStatus::Waiting;
            job.next_run_at = None;
            self.waiting.push(id, job.options.priority);
            promoted.push(job.clone());
        }
        promoted
    }

    /// Pop the head of the waiting queue and mark it active.
    ///
    /// The caller enforces the concurrency bound.
    pub fn start_next(&mut self, now: DateTime<Utc>) -> Option<Job> {
        while let Some(id) = self.waiting.pop() {
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            job.status = JobStatus::Active;
            job.processed_at = Some(now);
            job.attempts += 1;
            self.active.insert(id);
            return Some(job.clone());
        }
        None
    }

    /// Record a successful execution. Returns `None` when the job is no longer
    /// active, e.g. because it was removed while running.
    pub fn complete(&mut self, id: &JobId, result: Value, now: DateTime<Utc>) -> Option<Job> {
        if !self.active.remove(id) {
            return None;
        }
        let job = self.jobs.get_mut(id)?;
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.completed_at = Some(now);
        job.progress = 100;
        self.completed.push(*id, job.options.remove_on_complete);
        Some(job.clone())
    }

    /// Record a failed execution and either re-delay or fail the job.
    /// Returns `None` when the job is no longer active.
    pub fn fail(
        &mut self,
        id: &JobId,
        failure: &JobFailure,
        now: DateTime<Utc>,
    ) -> Option<FailureOutcome> {
        if !self.active.remove(id) {
            return None;
        }
        let job = self.jobs.get_mut(id)?;
        job.error = Some(failure.to_string());
        job.failed_at = Some(now);

        match decide_retry(job.attempts, &job.options) {
            RetryDecision::Retry { delay_ms } => {
                let run_at = deadline_after(now, delay_ms);
                job.status = JobStatus::Delayed;
                job.next_run_at = Some(run_at);
                self.delayed.push(*id, run_at);
                Some(FailureOutcome::Retrying {
                    job: job.clone(),
                    delay_ms,
                })
            }
            RetryDecision::Exhausted => {
                job.status = JobStatus::Failed;
                job.next_run_at = None;
                self.failed.push(*id, job.options.remove_on_fail);
                Some(FailureOutcome::Failed(job.clone()))
            }
        }
    }

    /// Delete a job from whichever structure holds it and from the index.
    pub fn remove(&mut self, id: &JobId) -> Option<Job> {
        let job = self.jobs.remove(id)?;
        match job.status {
            JobStatus::Waiting => {
                self.waiting.remove(id);
            }
            JobStatus::Delayed => {
                self.delayed.remove(id);
            }
            JobStatus::Active => {
                self.active.remove(id);
            }
            JobStatus::Completed => {
                self.completed.remove(id);
            }
            JobStatus::Failed => {
                self.failed.remove(id);
            }
            JobStatus::Stuck => {}
        }
        Some(job)
    }

    /// Set a job's progress, clamped to `[0, 100]`.
    pub fn update_progress(&mut self, id: &JobId, value: i64) -> Option<Job> {
        let job = self.jobs.get_mut(id)?;
        job.progress = clamp_progress(value);
        Some(job.clone())
    }

    /// Prune both archives to their retention counts, purging the index.
    pub fn clean(&mut self) -> CleanReport {
        let completed = self.completed.prune();
        let failed = self.failed.prune();
        for id in completed.iter().chain(failed.iter()) {
            self.jobs.remove(id);
        }
        CleanReport {
            completed: completed.len(),
            failed: failed.len(),
        }
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Snapshots of jobs with `status`, in that structure's order; every
    /// known job ordered by creation when `status` is `None`.
    pub fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        let ids: Vec<JobId> = match status {
            None => {
                let mut all: Vec<&Job> = self.jobs.values().collect();
                all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
                return all.into_iter().cloned().collect();
            }
            Some(JobStatus::Waiting) => self.waiting.iter().collect(),
            Some(JobStatus::Delayed) => self.delayed.iter().collect(),
            Some(JobStatus::Active) => {
                let mut active: Vec<JobId> = self.active.iter().copied().collect();
                active.sort();
                active
            }
            Some(JobStatus::Completed) => self.completed.iter().collect(),
            Some(JobStatus::Failed) => self.failed.iter().collect(),
            Some(JobStatus::Stuck) => Vec::new(),
        };
        ids.iter()
            .filter_map(|id| self.jobs.get(id))
            .cloned()
            .collect()
    }

    /// Full scan of the index producing per-status counts.
    pub fn stats(&self, now: DateTime<Utc>) -> JobStats {
        let mut stats = JobStats::new(now);
        for job in self.jobs.values() {
            stats.record(job.status);
        }
        stats
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Earliest time a delayed job becomes eligible.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.delayed.next_due()
    }

    /// Number of structures currently holding `id`. Always 1 for a known job.
    #[cfg(test)]
    fn placements(&self, id: &JobId) -> usize {
        [
            self.waiting.contains(id),
            self.delayed.contains(id),
            self.active.contains(id),
            self.completed.contains(id),
            self.failed.contains(id),
        ]
        .into_iter()
        .filter(|held| *held)
        .count()
    }
}
