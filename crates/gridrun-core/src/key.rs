//! Memoization keys for cacheable stages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::JobParameters;

/// The job's values for the parameters a cacheable stage depends on.
///
/// Entries are kept sorted by name, so the canonical form does not depend on
/// the order in which a stage lists its keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyKey(BTreeMap<String, Value>);

impl DependencyKey {
    /// Project `parameters` onto `names`.
    ///
    /// Returns the first name the job has no value for as the error.
    pub fn project<'a, I>(names: I, parameters: &JobParameters) -> Result<Self, String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut entries = BTreeMap::new();
        for name in names {
            let value = parameters.get(name).ok_or_else(|| name.clone())?;
            entries.insert(name.clone(), value.clone());
        }
        Ok(Self(entries))
    }

    /// Compact JSON rendering with sorted keys.
    pub fn canonical(&self) -> String {
        // Serializing a map of strings to JSON values cannot fail.
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
