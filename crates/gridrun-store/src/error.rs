//! Store errors.

use gridrun_core::{JobId, ParameterId};
use thiserror::Error;

/// Errors raised by the ledger and the persistent cache tier.
///
/// None of these are retried; a worker that hits one stops.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be reached or rejected the statement.
    #[error("Store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    /// A stored JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Commit or release of a job this worker does not hold.
    #[error("Job {0} is not in progress for this worker")]
    NotClaimed(JobId),

    /// Seeding would change a parameter record that is already stored.
    #[error("Parameter record {category}/{id} is already stored with different attributes")]
    ParameterConflict { category: String, id: ParameterId },

    /// Seeding would change the parameters of a job that is already stored.
    #[error("Job {0} is already stored with different parameters")]
    JobConflict(JobId),

    /// A row violates the schema's expectations.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StoreError>;
