//! Store configuration.

use std::path::PathBuf;

/// Where and how to open the shared database.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the SQLite database file shared by all workers.
    pub path: PathBuf,

    /// How long a statement waits for another process's write lock (milliseconds).
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    /// Create a config for the given database file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Builder method to set the busy timeout.
    pub fn with_busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("gridrun.db"),
            busy_timeout_ms: 30_000,
        }
    }
}
