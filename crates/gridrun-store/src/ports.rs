//! Interfaces the coordinator consumes from the shared store.
//!
//! All calls are synchronous and block the calling thread.

use serde_json::Value;

use gridrun_core::{DataMap, DependencyKey, JobId, JobRecord, ParameterRecord, WorkerId};

use crate::Result;

/// Durable job queue and source of truth for job status.
pub trait Ledger {
    /// Atomically move the lowest pending job to in-progress for `worker`.
    ///
    /// Returns `None` when nothing is pending. Two callers never receive the
    /// same job.
    fn claim_next(&self, worker: &WorkerId) -> Result<Option<JobRecord>>;

    /// Mark a job held by `worker` as done and store its result.
    fn commit(&self, id: JobId, worker: &WorkerId, result: &Value) -> Result<()>;

    /// Put a job held by `worker` back to pending.
    ///
    /// Returns false if the job was not held by `worker`.
    fn release(&self, id: JobId, worker: &WorkerId) -> Result<bool>;

    /// Move every in-progress job back to pending and return how many moved.
    ///
    /// Cannot tell a crashed worker's job from a live one: only call this
    /// while no coordinator is running.
    fn reset_stuck(&self) -> Result<usize>;

    /// Total number of job records.
    fn count_all(&self) -> Result<u64>;
}

/// Outcome of writing a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This write created the entry.
    Inserted,
    /// Another producer wrote the key first; this write was dropped.
    Conflict,
}

/// Persistent tier of the stage cache.
pub trait CacheStore {
    /// Payload stored for `(stage, key)`, if any.
    fn fetch(&self, stage: &str, key: &DependencyKey) -> Result<Option<DataMap>>;

    /// Store a payload unless the key already exists. Never overwrites.
    fn insert(&self, stage: &str, key: &DependencyKey, payload: &DataMap) -> Result<InsertOutcome>;
}

/// Source the parameter catalog is loaded from.
pub trait ParameterSource {
    /// All records of one category.
    fn load_category(&self, category: &str) -> Result<Vec<ParameterRecord>>;
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub done: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.done
    }
}
