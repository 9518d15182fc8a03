//! Two-tier memoization of cacheable stages.
//!
//! A process-local map sits in front of the persistent tier shared by all
//! workers. Entries are keyed by stage name and dependency key and are never
//! updated once written: when two workers race on the same key the first
//! insert wins and the loser adopts the stored value.

use std::collections::HashMap;

use tracing::debug;

use gridrun_core::{DataMap, DependencyKey};
use gridrun_store::{CacheStore, InsertOutcome, StoreError};

/// Counters describing how lookups were resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub local_hits: u64,
    pub persistent_hits: u64,
    pub misses: u64,
    pub inserted: u64,
    pub conflicts: u64,
}

/// Stage cache owned by one coordinator.
pub struct StageCache<C> {
    store: C,
    local: HashMap<String, HashMap<DependencyKey, DataMap>>,
    pending: Option<(String, DependencyKey)>,
    stats: CacheStats,
}

impl<C: CacheStore> StageCache<C> {
    /// Create a cache backed by `store`.
    pub fn new(store: C) -> Self {
        Self {
            store,
            local: HashMap::new(),
            pending: None,
            stats: CacheStats::default(),
        }
    }

    /// Look up the payload memoized for `(stage, key)`.
    ///
    /// On a miss the key is remembered and the next [`commit`](Self::commit)
    /// stores under it.
    pub fn get(&mut self, stage: &str, key: &DependencyKey) -> Result<Option<DataMap>, StoreError> {
        if let Some(payload) = self.local.get(stage).and_then(|entries| entries.get(key)) {
            self.stats.local_hits += 1;
            return Ok(Some(payload.clone()));
        }

        if let Some(payload) = self.store.fetch(stage, key)? {
            self.stats.persistent_hits += 1;
            self.remember(stage.to_string(), key.clone(), payload.clone());
            return Ok(Some(payload));
        }

        self.stats.misses += 1;
        self.pending = Some((stage.to_string(), key.clone()));
        Ok(None)
    }

    /// Store `payload` under the most recently missed key.
    ///
    /// Returns `None` when there was no pending miss. A conflict means another
    /// producer stored the key first; that value is kept and this one dropped.
    pub fn commit(&mut self, payload: DataMap) -> Result<Option<InsertOutcome>, StoreError> {
        let Some((stage, key)) = self.pending.take() else {
            return Ok(None);
        };

        let outcome = self.store.insert(&stage, &key, &payload)?;
        let stored = match outcome {
            InsertOutcome::Inserted => {
                self.stats.inserted += 1;
                payload
            }
            InsertOutcome::Conflict => {
                self.stats.conflicts += 1;
                debug!(stage = %stage, key = %key, "Cache key already written by another worker");
                self.store.fetch(&stage, &key)?.unwrap_or(payload)
            }
        };
        self.remember(stage, key, stored);
        Ok(Some(outcome))
    }

    /// Locally held payload for `(stage, key)`, without touching the counters.
    pub fn peek(&self, stage: &str, key: &DependencyKey) -> Option<&DataMap> {
        self.local.get(stage).and_then(|entries| entries.get(key))
    }

    fn remember(&mut self, stage: String, key: DependencyKey, payload: DataMap) {
        self.local.entry(stage).or_default().insert(key, payload);
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
