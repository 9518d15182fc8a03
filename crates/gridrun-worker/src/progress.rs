//! Throughput and ETA estimation over a moving window of completed jobs.

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// One progress report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    /// Ordinal of the job just completed.
    pub completed: u64,
    /// Jobs in the ledger.
    pub total: u64,
    /// Jobs this process computed itself during the window.
    pub self_computed: u64,
    /// Jobs covered by the window.
    pub window: u64,
    pub avg_secs_per_job: f64,
    pub remaining_secs: f64,
    pub eta: DateTime<Utc>,
    pub reported_at: DateTime<Utc>,
}

/// Emits a report every `period` completed jobs.
#[derive(Debug)]
pub struct ProgressEstimator {
    period: u64,
    total: u64,
    last_iteration: u64,
    last_time: Instant,
    self_computed: u64,
}

impl ProgressEstimator {
    /// Start a window at iteration 0, now.
    pub fn new(period: u64, total: u64) -> Self {
        Self::starting_at(period, total, Instant::now())
    }

    pub fn starting_at(period: u64, total: u64, start: Instant) -> Self {
        Self {
            period,
            total,
            last_iteration: 0,
            last_time: start,
            self_computed: 0,
        }
    }

    /// Record a completed job and report if the window is full.
    ///
    /// Iterations at or below the last reported one never report.
    pub fn record(&mut self, iteration: u64, computed: bool, now: Instant) -> Option<ProgressReport> {
        if computed {
            self.self_computed += 1;
        }

        let window = iteration.checked_sub(self.last_iteration).filter(|d| *d > 0)?;
        if window < self.period {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.last_time).as_secs_f64();
        let avg_secs_per_job = elapsed / window as f64;
        let remaining_secs = self.total.saturating_sub(iteration) as f64 * avg_secs_per_job;
        let reported_at = Utc::now();
        let eta = reported_at
            .checked_add_signed(Duration::milliseconds((remaining_secs * 1000.0) as i64))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let report = ProgressReport {
            completed: iteration,
            total: self.total,
            self_computed: self.self_computed,
            window,
            avg_secs_per_job,
            remaining_secs,
            eta,
            reported_at,
        };

        self.self_computed = 0;
        self.last_iteration = iteration;
        self.last_time = now;
        Some(report)
    }
}
