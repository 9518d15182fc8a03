//! Stage contract and the registry resolving stage tags to implementations.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

use gridrun_core::{DataMap, ParameterRecord};

use crate::stages;

/// A stage rejected its input. Fatal: the pipeline is misconfigured.
///
/// Numeric failures are not errors; stages report them as data
/// (`success: false`) and the pipeline carries on.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("missing input field '{0}'")]
    MissingField(String),

    #[error("field '{field}' must be {expected}")]
    InvalidField { field: String, expected: &'static str },

    #[error("stage requires a parameter record")]
    MissingParameters,
}

/// What a stage is called with.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    /// Data accumulated by the previous stages.
    pub data: &'a DataMap,

    /// Record looked up from the stage's parameter category, if it has one.
    pub params: Option<&'a ParameterRecord>,
}

impl<'a> StageInput<'a> {
    /// A data field, or `MissingField`.
    pub fn field(&self, name: &str) -> Result<&'a Value, StageError> {
        self.data
            .get(name)
            .ok_or_else(|| StageError::MissingField(name.to_string()))
    }

    /// The parameter record, or `MissingParameters`.
    pub fn params(&self) -> Result<&'a ParameterRecord, StageError> {
        self.params.ok_or(StageError::MissingParameters)
    }

    /// A parameter attribute, or `MissingField`.
    pub fn param(&self, name: &str) -> Result<&'a Value, StageError> {
        self.params()?
            .get(name)
            .ok_or_else(|| StageError::MissingField(name.to_string()))
    }
}

/// One pipeline step: a pure function of its input returning a partial update.
///
/// Cacheable stages may be invoked zero, one or many times for the same key
/// and must return the same output each time.
pub trait Stage: Send + Sync {
    fn run(&self, input: StageInput<'_>) -> Result<DataMap, StageError>;
}

type Constructor = Box<dyn Fn() -> Box<dyn Stage> + Send + Sync>;

/// Finite map from stage tag to constructor.
pub struct StageRegistry {
    constructors: HashMap<String, Constructor>,
}

impl StageRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register a constructor under `tag`, replacing any previous one.
    pub fn register<F>(&mut self, tag: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Stage> + Send + Sync + 'static,
    {
        self.constructors.insert(tag.into(), Box::new(constructor));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, tag: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn Stage> + Send + Sync + 'static,
    {
        self.register(tag, constructor);
        self
    }

    /// Construct the stage registered under `tag`.
    pub fn create(&self, tag: &str) -> Option<Box<dyn Stage>> {
        self.constructors.get(tag).map(|constructor| constructor())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }
}

impl Default for StageRegistry {
    /// Registry preloaded with the built-in stages.
    fn default() -> Self {
        let mut registry = Self::empty();
        stages::register_builtins(&mut registry);
        registry
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.constructors.keys().collect();
        tags.sort();
        f.debug_struct("StageRegistry").field("tags", &tags).finish()
    }
}
