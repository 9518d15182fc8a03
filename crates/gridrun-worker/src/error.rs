//! Worker errors.

use serde_json::Value;
use thiserror::Error;

use gridrun_core::{CoreError, JobId};
use gridrun_store::StoreError;

use crate::stage::StageError;

/// Fatal errors of a coordination run. None of them are retried.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Ledger or cache I/O failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A job selects a parameter record the catalog does not hold.
    #[error("Unknown parameter: category '{category}' has no record {selector}")]
    UnknownParameter { category: String, selector: Value },

    /// The pipeline names a stage tag the registry does not know.
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// A job lacks a parameter a stage needs.
    #[error("Job {job} has no value for parameter '{name}'")]
    MissingJobParameter { job: JobId, name: String },

    /// The finished pipeline did not produce the result field.
    #[error("Pipeline produced no '{0}' field")]
    MissingResultField(String),

    /// A stage rejected its input.
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },

    /// The pipeline definition is invalid.
    #[error("Invalid pipeline definition: {0}")]
    Definition(#[from] CoreError),
}
