//! Parameter sweeps and the job grid they span.
//!
//! Each sweep yields the attribute payloads of one category. The plan numbers
//! them `0..n` within their category and enumerates the Cartesian product of
//! those ids as job parameter maps, numbering jobs from 1.

use serde_json::{json, Value};
use tracing::info;

use gridrun_core::{DataMap, JobId, JobParameters, JobRecord, ParameterRecord, PipelineDefinition};
use gridrun_store::SqliteStore;

use crate::CoordinatorError;

/// A lazy sequence of parameter selections for one category.
pub trait ParameterSweep {
    fn category(&self) -> &str;

    fn selections(&self) -> Box<dyn Iterator<Item = DataMap> + '_>;
}

/// Sweep over an explicit list of values.
///
/// Objects are used as attribute payloads as they are; any other value `v`
/// becomes `{category: v}`.
#[derive(Debug, Clone)]
pub struct ValueSweep {
    category: String,
    values: Vec<Value>,
}

impl ValueSweep {
    pub fn new(category: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            category: category.into(),
            values,
        }
    }
}

impl ParameterSweep for ValueSweep {
    fn category(&self) -> &str {
        &self.category
    }

    fn selections(&self) -> Box<dyn Iterator<Item = DataMap> + '_> {
        Box::new(self.values.iter().map(|value| match value {
            Value::Object(attributes) => attributes.clone(),
            other => {
                let mut attributes = DataMap::new();
                attributes.insert(self.category.clone(), other.clone());
                attributes
            }
        }))
    }
}

/// Rows written by [`GridPlan::seed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub parameters: usize,
    pub jobs: usize,
}

/// Parameter records per category and the job grid over them.
#[derive(Debug, Clone, Default)]
pub struct GridPlan {
    categories: Vec<(String, Vec<ParameterRecord>)>,
}

impl GridPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sweep, replacing an earlier sweep of the same category.
    pub fn with_sweep(mut self, sweep: &dyn ParameterSweep) -> Self {
        let records: Vec<ParameterRecord> = sweep
            .selections()
            .enumerate()
            .map(|(id, attributes)| ParameterRecord::new(id as i64, attributes))
            .collect();
        let category = sweep.category().to_string();
        match self.categories.iter_mut().find(|(name, _)| *name == category) {
            Some((_, existing)) => *existing = records,
            None => self.categories.push((category, records)),
        }
        self
    }

    /// Plan the grid spanned by a definition's sweeps.
    pub fn from_definition(definition: &PipelineDefinition) -> Result<Self, CoordinatorError> {
        definition.validate()?;
        definition.validate_sweeps()?;
        let plan = definition
            .sweeps
            .iter()
            .fold(Self::new(), |plan, (category, values)| {
                plan.with_sweep(&ValueSweep::new(category.as_str(), values.clone()))
            });
        Ok(plan)
    }

    /// Parameter records of every category, in sweep order.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &[ParameterRecord])> {
        self.categories
            .iter()
            .map(|(category, records)| (category.as_str(), records.as_slice()))
    }

    /// Number of jobs in the grid.
    pub fn job_count(&self) -> u64 {
        self.categories
            .iter()
            .map(|(_, records)| records.len() as u64)
            .product()
    }

    /// Enumerate the grid lazily; the last category varies fastest.
    pub fn jobs(&self) -> GridJobs<'_> {
        GridJobs {
            plan: self,
            odometer: vec![0; self.categories.len()],
            next_id: 1,
            exhausted: self.job_count() == 0,
        }
    }

    /// Write the parameter records and pending jobs to the store.
    ///
    /// Everything is written in one transaction. Rows already stored are
    /// kept, so seeding the same plan twice is harmless; seeding a changed
    /// plan over an existing grid fails with a conflict and writes nothing.
    pub fn seed(&self, store: &SqliteStore) -> Result<SeedSummary, CoordinatorError> {
        let (parameters, jobs) = store.insert_grid(self.parameters(), self.jobs())?;
        let summary = SeedSummary { parameters, jobs };
        info!(
            categories = self.categories.len(),
            parameters = summary.parameters,
            jobs = summary.jobs,
            "Seeded job grid"
        );
        Ok(summary)
    }
}

/// Iterator over the jobs of a [`GridPlan`].
pub struct GridJobs<'a> {
    plan: &'a GridPlan,
    odometer: Vec<usize>,
    next_id: i64,
    exhausted: bool,
}

impl Iterator for GridJobs<'_> {
    type Item = JobRecord;

    fn next(&mut self) -> Option<JobRecord> {
        if self.exhausted {
            return None;
        }

        let parameters: JobParameters = self
            .plan
            .categories
            .iter()
            .zip(&self.odometer)
            .map(|((category, records), &i)| (category.clone(), json!(records[i].id)))
            .collect();
        let job = JobRecord::new(JobId::new(self.next_id), parameters);
        self.next_id += 1;

        // Advance the odometer from the last digit.
        self.exhausted = true;
        for (digit, (_, records)) in self
            .odometer
            .iter_mut()
            .zip(&self.plan.categories)
            .rev()
        {
            *digit += 1;
            if *digit < records.len() {
                self.exhausted = false;
                break;
            }
            *digit = 0;
        }

        Some(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridrun_core::{JobStatus, StageDescriptor};
    use gridrun_store::{Ledger, ParameterSource, StoreError};

    fn definition() -> PipelineDefinition {
        PipelineDefinition::new("log")
            .with_stage(StageDescriptor::new("noise", "noise").with_parameter("sigma"))
            .with_stage(StageDescriptor::new("method", "assign").with_parameter("method"))
            .with_sweep("sigma", vec![json!(0.0), json!(0.1)])
            .with_sweep(
                "method",
                vec![
                    json!({"method": "ls"}),
                    json!({"method": "mpm"}),
                    json!({"method": "esprit"}),
                ],
            )
    }

    #[test]
    fn test_value_sweep_wraps_scalars() {
        let sweep = ValueSweep::new("sigma", vec![json!(0.5), json!({"sigma": 1.0, "tag": "x"})]);
        let selections: Vec<DataMap> = sweep.selections().collect();
        assert_eq!(Value::Object(selections[0].clone()), json!({"sigma": 0.5}));
        assert_eq!(Value::Object(selections[1].clone()), json!({"sigma": 1.0, "tag": "x"}));
    }

    #[test]
    fn test_grid_enumerates_product() {
        let plan = GridPlan::from_definition(&definition()).unwrap();
        assert_eq!(plan.job_count(), 6);

        let jobs: Vec<JobRecord> = plan.jobs().collect();
        assert_eq!(jobs.len(), 6);
        assert_eq!(jobs[0].id, JobId::new(1));
        assert_eq!(jobs[5].id, JobId::new(6));
        // Sweeps are keyed by category name, so "sigma" is the last digit.
        assert_eq!(jobs[0].selector("method"), Some(&json!(0)));
        assert_eq!(jobs[0].selector("sigma"), Some(&json!(0)));
        assert_eq!(jobs[1].selector("sigma"), Some(&json!(1)));
        assert_eq!(jobs[2].selector("method"), Some(&json!(1)));
        assert_eq!(jobs[5].selector("method"), Some(&json!(2)));
        assert_eq!(jobs[5].selector("sigma"), Some(&json!(1)));
    }

    #[test]
    fn test_empty_sweep_yields_no_jobs() {
        let plan = GridPlan::new()
            .with_sweep(&ValueSweep::new("a", vec![json!(1)]))
            .with_sweep(&ValueSweep::new("b", vec![]));
        assert_eq!(plan.job_count(), 0);
        assert_eq!(plan.jobs().count(), 0);
    }

    #[test]
    fn test_no_sweeps_is_single_job() {
        let jobs: Vec<JobRecord> = GridPlan::new().jobs().collect();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].parameters.is_empty());
    }

    #[test]
    fn test_missing_sweep_rejected() {
        let definition = definition().with_stage(StageDescriptor::new("dec", "decimate").with_parameter("step"));
        assert!(matches!(
            GridPlan::from_definition(&definition),
            Err(CoordinatorError::Definition(_))
        ));
    }

    #[test]
    fn test_seed_is_repeatable() {
        let store = SqliteStore::in_memory().unwrap();
        let plan = GridPlan::from_definition(&definition()).unwrap();

        let first = plan.seed(&store).unwrap();
        assert_eq!(first, SeedSummary { parameters: 5, jobs: 6 });
        let second = plan.seed(&store).unwrap();
        assert_eq!(second, SeedSummary::default());

        assert_eq!(store.load_category("method").unwrap().len(), 3);
        let job = store.get_job(JobId::new(4)).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.selector("method"), Some(&json!(1)));
        assert_eq!(job.selector("sigma"), Some(&json!(1)));
    }

    #[test]
    fn test_seed_rejects_changed_sweep() {
        let store = SqliteStore::in_memory().unwrap();
        GridPlan::from_definition(&definition()).unwrap().seed(&store).unwrap();

        let changed = definition().with_sweep("sigma", vec![json!(0.5), json!(0.9)]);
        let err = GridPlan::from_definition(&changed).unwrap().seed(&store).unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Store(StoreError::ParameterConflict { category, id: 0 }) if category == "sigma"
        ));

        let stored: Vec<Value> = store
            .load_category("sigma")
            .unwrap()
            .into_iter()
            .map(|r| Value::Object(r.attributes))
            .collect();
        assert_eq!(stored, vec![json!({"sigma": 0.0}), json!({"sigma": 0.1})]);
    }

    #[test]
    fn test_seed_rejects_reshaped_grid() {
        let store = SqliteStore::in_memory().unwrap();
        GridPlan::from_definition(&definition()).unwrap().seed(&store).unwrap();

        // Same records plus one more sigma: the job numbering shifts.
        let grown = definition().with_sweep("sigma", vec![json!(0.0), json!(0.1), json!(0.2)]);
        let err = GridPlan::from_definition(&grown).unwrap().seed(&store).unwrap_err();
        assert!(matches!(err, CoordinatorError::Store(StoreError::JobConflict(_))));
        assert_eq!(store.count_all().unwrap(), 6);
        assert_eq!(store.load_category("sigma").unwrap().len(), 2);
    }
}
