//! GridRun Store
//!
//! Persistence shared by every worker process:
//! - the job ledger (claim, commit, release, recovery sweep)
//! - the persistent tier of the stage cache
//! - the parameter records the catalog is loaded from
//!
//! The traits in [`ports`] are what the worker depends on; [`SqliteStore`]
//! implements all of them over one SQLite database file.

pub mod config;
pub mod error;
pub mod ports;
pub mod sqlite;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use ports::{CacheStore, InsertOutcome, Ledger, ParameterSource, StatusCounts};
pub use sqlite::SqliteStore;
