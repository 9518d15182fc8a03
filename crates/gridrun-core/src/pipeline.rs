//! Pipeline definition: the ordered stages every job runs through.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use crate::{CoreError, DataMap};

fn default_result_field() -> String {
    "log".to_string()
}

/// Describes one stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// Unique stage name; also scopes the stage's cache entries.
    pub name: String,

    /// Registry tag of the stage implementation.
    pub stage: String,

    /// Parameter category whose record this stage receives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,

    /// Job-parameter names whose values form the memoization key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_on: Option<Vec<String>>,
}

impl StageDescriptor {
    /// Create a new StageDescriptor.
    pub fn new(name: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            parameter: None,
            cache_on: None,
        }
    }

    /// Builder method to set the required parameter category.
    pub fn with_parameter(mut self, category: impl Into<String>) -> Self {
        self.parameter = Some(category.into());
        self
    }

    /// Builder method to make the stage cacheable on the given keys.
    pub fn cached_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_on = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Returns true if the stage output is memoized.
    pub fn is_cacheable(&self) -> bool {
        self.cache_on.is_some()
    }
}

/// A complete run definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Data every job's pipeline starts from.
    #[serde(default)]
    pub initial: DataMap,

    /// Field of the accumulated data stored as the job result.
    #[serde(default = "default_result_field")]
    pub result_field: String,

    /// Stages in execution order.
    pub stages: Vec<StageDescriptor>,

    /// Values swept per parameter category when seeding the grid.
    #[serde(default)]
    pub sweeps: BTreeMap<String, Vec<Value>>,
}

impl PipelineDefinition {
    /// Create an empty definition storing `result_field` as the result.
    pub fn new(result_field: impl Into<String>) -> Self {
        Self {
            initial: DataMap::new(),
            result_field: result_field.into(),
            stages: Vec::new(),
            sweeps: BTreeMap::new(),
        }
    }

    /// Builder method to append a stage.
    pub fn with_stage(mut self, stage: StageDescriptor) -> Self {
        self.stages.push(stage);
        self
    }

    /// Builder method to add a sweep.
    pub fn with_sweep(mut self, category: impl Into<String>, values: Vec<Value>) -> Self {
        self.sweeps.insert(category.into(), values);
        self
    }

    /// Parse and validate a definition from JSON text.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let definition: Self = serde_json::from_str(text)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Read and validate a definition file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::InvalidInput(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Check the stage list for inconsistencies.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut names = HashSet::new();
        for stage in &self.stages {
            if !names.insert(stage.name.as_str()) {
                return Err(CoreError::DuplicateStage(stage.name.clone()));
            }
            if matches!(&stage.cache_on, Some(keys) if keys.is_empty()) {
                return Err(CoreError::EmptyDependencyKey(stage.name.clone()));
            }
        }
        Ok(())
    }

    /// Check that every consumed category has values to seed from.
    pub fn validate_sweeps(&self) -> Result<(), CoreError> {
        for stage in &self.stages {
            if let Some(category) = &stage.parameter {
                if !self.sweeps.contains_key(category) {
                    return Err(CoreError::MissingSweep {
                        stage: stage.name.clone(),
                        category: category.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Parameter categories referenced by the stages.
    pub fn categories(&self) -> BTreeSet<&str> {
        self.stages
            .iter()
            .filter_map(|s| s.parameter.as_deref())
            .collect()
    }
}
