//! In-memory queue structures that hold jobs between lifecycle transitions.
//!
//! None of these types own job records; they hold [`JobId`]s in the order the
//! scheduler needs them. The [`JobStore`](crate::store::JobStore) keeps the
//! records and guarantees every id lives in exactly one structure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::job::{JobId, JobStatus};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct WaitingKey {
    priority: Reverse<i32>,
    seq: u64,
}

/// Jobs ready for dispatch, ordered by priority (descending) then arrival.
///
/// Every insert takes a fresh arrival sequence, so a job always lands
/// immediately before the first job with strictly lower priority. Promoted
/// and retried jobs get no precedence for having waited before.
#[derive(Debug, Default)]
pub struct WaitingQueue {
    order: BTreeMap<WaitingKey, JobId>,
    keys: HashMap<JobId, WaitingKey>,
    next_seq: u64,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job. Re-inserting an id already queued moves it to the back
    /// of its new priority band.
    pub fn push(&mut self, id: JobId, priority: i32) {
        self.remove(&id);
        let key = WaitingKey {
            priority: Reverse(priority),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.order.insert(key, id);
        self.keys.insert(id, key);
    }

    /// Remove and return the next job to dispatch.
    pub fn pop(&mut self) -> Option<JobId> {
        let (_, id) = self.order.pop_first()?;
        self.keys.remove(&id);
        Some(id)
    }

    pub fn peek(&self) -> Option<JobId> {
        self.order.first_key_value().map(|(_, id)| *id)
    }

    pub fn remove(&mut self, id: &JobId) -> bool {
        match self.keys.remove(id) {
            Some(key) => {
                self.order.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.keys.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = JobId> + '_ {
        self.order.values().copied()
    }
}

/// Jobs deferred until a point in time, ordered by that time.
#[derive(Debug, Default)]
pub struct DelayedSet {
    order: BTreeMap<(DateTime<Utc>, u64), JobId>,
    keys: HashMap<JobId, (DateTime<Utc>, u64)>,
    next_seq: u64,
}

impl DelayedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: JobId, run_at: DateTime<Utc>) {
        self.remove(&id);
        let key = (run_at, self.next_seq);
        self.next_seq += 1;
        self.order.insert(key, id);
        self.keys.insert(id, key);
    }

    /// Remove and return every job due at or before `now`, earliest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<JobId> {
        let mut due = Vec::new();
        while let Some(entry) = self.order.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let id = entry.remove();
            self.keys.remove(&id);
            due.push(id);
        }
        due
    }

    /// Earliest eligibility time, if any job is delayed.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.order.first_key_value().map(|((at, _), _)| *at)
    }

    pub fn remove(&mut self, id: &JobId) -> bool {
        match self.keys.remove(id) {
            Some(key) => {
                self.order.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.keys.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids in eligibility order.
    pub fn iter(&self) -> impl Iterator<Item = JobId> + '_ {
        self.order.values().copied()
    }
}

#[derive(Clone, Copy, Debug)]
struct ArchiveEntry {
    id: JobId,
    retain: usize,
}

/// Terminal jobs in the order they settled, oldest first.
///
/// Each entry remembers its own retention count (`removeOnComplete` or
/// `removeOnFail`). An entry survives pruning while fewer than that many
/// newer entries exist, so with uniform options the archive keeps exactly the
/// newest `retain` jobs.
#[derive(Debug, Default)]
pub struct Archive {
    entries: VecDeque<ArchiveEntry>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: JobId, retain: usize) {
        self.entries.push_back(ArchiveEntry { id, retain });
    }

    pub fn remove(&mut self, id: &JobId) -> bool {
        match self.entries.iter().position(|entry| entry.id == *id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop entries past their retention, returning their ids oldest first.
    pub fn prune(&mut self) -> Vec<JobId> {
        let len = self.entries.len();
        let mut pruned = Vec::new();
        let mut kept = VecDeque::with_capacity(len);
        for (index, entry) in self.entries.drain(..).enumerate() {
            let newer = len - 1 - index;
            if newer < entry.retain {
                kept.push_back(entry);
            } else {
                pruned.push(entry.id);
            }
        }
        self.entries = kept;
        pruned
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.entries.iter().any(|entry| entry.id == *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids oldest first.
    pub fn iter(&self) -> impl Iterator<Item = JobId> + '_ {
        self.entries.iter().map(|entry| entry.id)
    }
}

/// Per-status job counts at a point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    /// Timestamp when the snapshot was taken.
    pub sampled_at: DateTime<Utc>,
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub stuck: usize,
    /// Total number of known jobs.
    pub total: usize,
}

impl JobStats {
    pub fn new(sampled_at: DateTime<Utc>) -> Self {
        Self {
            sampled_at,
            ..Default::default()
        }
    }

    pub fn record(&mut self, status: JobStatus) {
        *self.count_mut(status) += 1;
        self.total += 1;
    }

    pub fn count(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Waiting => self.waiting,
            JobStatus::Delayed => self.delayed,
            JobStatus::Active => self.active,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Stuck => self.stuck,
        }
    }

    fn count_mut(&mut self, status: JobStatus) -> &mut usize {
        match status {
            JobStatus::Waiting => &mut self.waiting,
            JobStatus::Delayed => &mut self.delayed,
            JobStatus::Active => &mut self.active,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Stuck => &mut self.stuck,
        }
    }
}
