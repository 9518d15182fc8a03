//! Parameter catalog: read-once index of parameter records.

use std::collections::HashMap;

use serde_json::Value;
use tracing::info;

use gridrun_core::{ParameterId, ParameterRecord};
use gridrun_store::ParameterSource;

use crate::CoordinatorError;

/// Parameter records by category and id, loaded once per coordinator.
#[derive(Debug, Default)]
pub struct ParameterCatalog {
    categories: HashMap<String, HashMap<ParameterId, ParameterRecord>>,
}

impl ParameterCatalog {
    /// Load every record of each listed category.
    pub fn load<'a, S, I>(source: &S, categories: I) -> Result<Self, CoordinatorError>
    where
        S: ParameterSource,
        I: IntoIterator<Item = &'a str>,
    {
        let mut catalog = Self::default();
        for category in categories {
            let records = source.load_category(category)?;
            info!(category = %category, records = records.len(), "Loaded parameter category");
            catalog.insert(category, records);
        }
        Ok(catalog)
    }

    /// Add records to a category.
    pub fn insert(&mut self, category: &str, records: Vec<ParameterRecord>) {
        self.categories
            .entry(category.to_string())
            .or_default()
            .extend(records.into_iter().map(|r| (r.id, r)));
    }

    /// Record of `category` selected by `selector`.
    ///
    /// Fails with `UnknownParameter` when the selector is not an id present in
    /// the category.
    pub fn lookup(&self, category: &str, selector: &Value) -> Result<&ParameterRecord, CoordinatorError> {
        selector
            .as_i64()
            .and_then(|id| self.categories.get(category)?.get(&id))
            .ok_or_else(|| CoordinatorError::UnknownParameter {
                category: category.to_string(),
                selector: selector.clone(),
            })
    }
}
