//! Pipeline resolved against the stage registry.

use gridrun_core::{DataMap, PipelineDefinition, StageDescriptor};

use crate::stage::{Stage, StageRegistry};
use crate::CoordinatorError;

/// A descriptor together with its stage implementation.
pub struct PipelineStage {
    pub descriptor: StageDescriptor,
    pub stage: Box<dyn Stage>,
}

/// Ordered stages plus the data every job starts from.
pub struct Pipeline {
    stages: Vec<PipelineStage>,
    initial: DataMap,
    result_field: String,
}

impl Pipeline {
    /// Validate `definition` and construct each stage from `registry`.
    pub fn build(definition: &PipelineDefinition, registry: &StageRegistry) -> Result<Self, CoordinatorError> {
        definition.validate()?;
        let stages = definition
            .stages
            .iter()
            .map(|descriptor| {
                let stage = registry
                    .create(&descriptor.stage)
                    .ok_or_else(|| CoordinatorError::UnknownStage(descriptor.stage.clone()))?;
                Ok(PipelineStage {
                    descriptor: descriptor.clone(),
                    stage,
                })
            })
            .collect::<Result<Vec<_>, CoordinatorError>>()?;

        Ok(Self {
            stages,
            initial: definition.initial.clone(),
            result_field: definition.result_field.clone(),
        })
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn initial(&self) -> &DataMap {
        &self.initial
    }

    pub fn result_field(&self) -> &str {
        &self.result_field
    }

    /// Parameter categories the stages look records up in.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.stages
            .iter()
            .filter_map(|s| s.descriptor.parameter.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_resolves_tags() {
        let definition = PipelineDefinition::new("log")
            .with_stage(StageDescriptor::new("size", "assign").with_parameter("size"))
            .with_stage(StageDescriptor::new("save", "save"));
        let pipeline = Pipeline::build(&definition, &StageRegistry::default()).unwrap();
        assert_eq!(pipeline.stages().len(), 2);
        assert_eq!(pipeline.categories().collect::<Vec<_>>(), vec!["size"]);
        assert_eq!(pipeline.result_field(), "log");
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let definition =
            PipelineDefinition::new("log").with_stage(StageDescriptor::new("fit", "prony"));
        assert!(matches!(
            Pipeline::build(&definition, &StageRegistry::default()),
            Err(CoordinatorError::UnknownStage(tag)) if tag == "prony"
        ));
    }
}
