//! Job and parameter records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{DataMap, JobId, JobStatus, ParameterId};

/// Job parameters: category name to selector (a parameter id or a literal).
pub type JobParameters = BTreeMap<String, Value>;

/// One point of the parameter grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier.
    pub id: JobId,

    /// Selected value per parameter category.
    pub parameters: JobParameters,

    /// Current job status.
    pub status: JobStatus,

    /// Result payload, present only once the job is done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl JobRecord {
    /// Create a new pending job.
    pub fn new(id: JobId, parameters: JobParameters) -> Self {
        Self {
            id,
            parameters,
            status: JobStatus::Pending,
            result: None,
        }
    }

    /// Builder method to add a parameter selection.
    pub fn with_parameter(mut self, name: impl Into<String>, selector: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), selector.into());
        self
    }

    /// Selector this job holds for a parameter name.
    pub fn selector(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }
}

/// A parameter record within one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    /// Identifier within the category.
    pub id: ParameterId,

    /// Attribute payload read by stages.
    pub attributes: DataMap,
}

impl ParameterRecord {
    /// Create a new ParameterRecord.
    pub fn new(id: ParameterId, attributes: DataMap) -> Self {
        Self { id, attributes }
    }

    /// Get a single attribute.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}
