//! Worker configuration.

use gridrun_core::WorkerId;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker ID recorded on every claim.
    pub worker_id: WorkerId,

    /// Completed jobs between two progress reports.
    pub report_period: u64,

    /// Run the stuck-job recovery sweep before the first claim.
    ///
    /// Only safe when no other worker is running against the same store.
    pub reset_stuck_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: WorkerId::generate(),
            report_period: 20,
            reset_stuck_on_start: false,
        }
    }
}
