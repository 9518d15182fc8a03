//! Core domain errors.

use thiserror::Error;

/// Core domain errors for GridRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Two stages share a name, so their cache scopes would collide.
    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),

    /// A cacheable stage declared an empty dependency key.
    #[error("Stage '{0}' declares an empty cache dependency key")]
    EmptyDependencyKey(String),

    /// A stage consumes a parameter category nobody sweeps.
    #[error("Stage '{stage}' requires parameter category '{category}' which has no sweep")]
    MissingSweep { stage: String, category: String },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
