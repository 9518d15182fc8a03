//! GridRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Storage backends
//! - Stage implementations
//! - Runtime specifics
//!
//! All types here describe jobs on the parameter grid, the parameter records
//! they select, and the pipeline definition every worker executes.

pub mod error;
pub mod ids;
pub mod job;
pub mod key;
pub mod pipeline;
pub mod status;

/// Accumulated pipeline data and partial stage updates.
pub type DataMap = serde_json::Map<String, serde_json::Value>;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{JobId, ParameterId, WorkerId};
pub use job::{JobParameters, JobRecord, ParameterRecord};
pub use key::DependencyKey;
pub use pipeline::{PipelineDefinition, StageDescriptor};
pub use status::JobStatus;
