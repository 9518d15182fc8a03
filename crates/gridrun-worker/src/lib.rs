//! GridRun Worker Library
//!
//! One worker process runs one [`Coordinator`]: it claims jobs from the shared
//! ledger, drives each through the stage pipeline, memoizes cacheable stages
//! in the [`StageCache`], and commits the results. Scale-out is running more
//! processes against the same store.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod grid;
pub mod json_output;
pub mod pipeline;
pub mod progress;
pub mod shutdown;
pub mod stage;
pub mod stages;

pub use cache::StageCache;
pub use catalog::ParameterCatalog;
pub use config::WorkerConfig;
pub use coordinator::{Coordinator, CoordinatorState, RunOutcome, RunReport};
pub use error::CoordinatorError;
pub use grid::{GridPlan, ParameterSweep, SeedSummary, ValueSweep};
pub use pipeline::Pipeline;
pub use progress::{ProgressEstimator, ProgressReport};
pub use shutdown::ShutdownSignal;
pub use stage::{Stage, StageError, StageInput, StageRegistry};
