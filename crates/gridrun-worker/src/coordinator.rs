//! Coordinator: the claim -> execute pipeline -> commit loop of one worker.
//!
//! Per job the coordinator moves `Idle -> Claiming -> Executing -> Committing
//! -> Idle`, or `Executing -> Releasing -> Idle` when a stop is requested while
//! the job is held. Ledger failures are fatal and not retried.

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use gridrun_core::{DataMap, DependencyKey, JobId, JobRecord, PipelineDefinition};
use gridrun_store::{CacheStore, InsertOutcome, Ledger, ParameterSource};

use crate::cache::{CacheStats, StageCache};
use crate::catalog::ParameterCatalog;
use crate::json_output;
use crate::pipeline::Pipeline;
use crate::progress::{ProgressEstimator, ProgressReport};
use crate::shutdown::ShutdownSignal;
use crate::stage::{StageInput, StageRegistry};
use crate::{CoordinatorError, WorkerConfig};

/// Where the coordinator is in its per-job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Claiming,
    Executing,
    Committing,
    Releasing,
}

/// How a coordination run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No pending job was left.
    Drained,
    /// A stop was requested; the held job, if any, went back to pending.
    Interrupted { released: Option<JobId> },
}

/// Summary of a coordination run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Jobs this process committed.
    pub committed: u64,
    /// Committed jobs that needed at least one cacheable stage computed here.
    pub self_computed: u64,
    /// Jobs moved back to pending by the start-up recovery sweep.
    pub recovered: usize,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Copy, Default)]
struct JobStats {
    executed: u32,
    cache_hits: u32,
    cache_misses: u32,
}

impl JobStats {
    /// False only when every cacheable stage was served from the cache.
    fn self_computed(&self) -> bool {
        self.cache_misses > 0 || self.cache_hits == 0
    }
}

enum Execution {
    Completed { data: DataMap, stats: JobStats },
    Interrupted,
}

/// Drives jobs from the ledger through the pipeline.
pub struct Coordinator<L, C> {
    config: WorkerConfig,
    ledger: L,
    cache: StageCache<C>,
    catalog: ParameterCatalog,
    pipeline: Pipeline,
    shutdown: ShutdownSignal,
    state: CoordinatorState,
}

impl<S> Coordinator<S, S>
where
    S: Ledger + CacheStore + ParameterSource + Clone,
{
    /// Build the pipeline and load its parameter catalog from one store.
    pub fn from_store(
        config: WorkerConfig,
        definition: &PipelineDefinition,
        registry: &StageRegistry,
        store: S,
    ) -> Result<Self, CoordinatorError> {
        let pipeline = Pipeline::build(definition, registry)?;
        let categories: BTreeSet<&str> = pipeline.categories().collect();
        let catalog = ParameterCatalog::load(&store, categories)?;
        Ok(Self::new(config, pipeline, catalog, store.clone(), store))
    }
}

impl<L, C> Coordinator<L, C>
where
    L: Ledger,
    C: CacheStore,
{
    /// Create a new Coordinator.
    pub fn new(
        config: WorkerConfig,
        pipeline: Pipeline,
        catalog: ParameterCatalog,
        ledger: L,
        cache_store: C,
    ) -> Self {
        Self {
            config,
            ledger,
            cache: StageCache::new(cache_store),
            catalog,
            pipeline,
            shutdown: ShutdownSignal::new(),
            state: CoordinatorState::Idle,
        }
    }

    /// Builder method to observe an external stop signal.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Claim and process jobs until none is pending or a stop is requested.
    pub fn run(&mut self) -> Result<RunReport, CoordinatorError> {
        let worker_id = self.config.worker_id.clone();

        let recovered = if self.config.reset_stuck_on_start {
            let recovered = self.ledger.reset_stuck()?;
            info!(recovered, "Reset stuck jobs to pending");
            recovered
        } else {
            0
        };

        let total = self.ledger.count_all()?;
        let mut progress = ProgressEstimator::new(self.config.report_period, total);
        let mut report = RunReport {
            outcome: RunOutcome::Drained,
            committed: 0,
            self_computed: 0,
            recovered,
            cache: CacheStats::default(),
        };

        info!(
            worker_id = %worker_id,
            total_jobs = total,
            stages = self.pipeline.stages().len(),
            "Starting coordination run"
        );
        json_output::emit_run_started(worker_id.as_str(), total);

        loop {
            if self.shutdown.is_triggered() {
                info!("Stop requested, not claiming further jobs");
                report.outcome = RunOutcome::Interrupted { released: None };
                break;
            }

            self.state = CoordinatorState::Claiming;
            let Some(job) = self.ledger.claim_next(&worker_id)? else {
                info!("No pending jobs left");
                break;
            };
            debug!(job_id = %job.id, "Claimed job");

            self.state = CoordinatorState::Executing;
            match self.process(&job) {
                Ok(Some(stats)) => {
                    report.committed += 1;
                    let computed = stats.self_computed();
                    if computed {
                        report.self_computed += 1;
                    }
                    if let Some(progress_report) =
                        progress.record(job.id.ordinal(), computed, Instant::now())
                    {
                        log_progress(&progress_report);
                    }
                }
                Ok(None) => {
                    report.outcome = RunOutcome::Interrupted {
                        released: Some(job.id),
                    };
                    break;
                }
                Err(e) => {
                    self.release_after_failure(job.id, &e);
                    self.state = CoordinatorState::Idle;
                    return Err(e);
                }
            }
            self.state = CoordinatorState::Idle;
        }

        self.state = CoordinatorState::Idle;
        report.cache = self.cache.stats();
        info!(
            committed = report.committed,
            self_computed = report.self_computed,
            interrupted = matches!(report.outcome, RunOutcome::Interrupted { .. }),
            "Coordination run finished"
        );
        json_output::emit_run_finished(
            report.committed,
            matches!(report.outcome, RunOutcome::Interrupted { .. }),
        );
        Ok(report)
    }

    /// Execute and commit one claimed job.
    ///
    /// Returns `None` when the job was released because of a stop request.
    fn process(&mut self, job: &JobRecord) -> Result<Option<JobStats>, CoordinatorError> {
        let (data, stats) = match self.execute(job)? {
            Execution::Completed { data, stats } => (data, stats),
            Execution::Interrupted => {
                self.state = CoordinatorState::Releasing;
                if self.ledger.release(job.id, &self.config.worker_id)? {
                    info!(job_id = %job.id, "Released job after stop request");
                } else {
                    warn!(job_id = %job.id, "Job was no longer held when releasing");
                }
                json_output::emit_job_released(job.id.get(), "interrupted");
                return Ok(None);
            }
        };

        self.state = CoordinatorState::Committing;
        let field = self.pipeline.result_field();
        let result = data
            .get(field)
            .cloned()
            .ok_or_else(|| CoordinatorError::MissingResultField(field.to_string()))?;
        self.ledger.commit(job.id, &self.config.worker_id, &result)?;

        debug!(
            job_id = %job.id,
            executed = stats.executed,
            cache_hits = stats.cache_hits,
            "Committed job"
        );
        json_output::emit_job_committed(job.id.get(), stats.executed, stats.cache_hits);
        Ok(Some(stats))
    }

    /// Run every stage in order over the job's accumulated data.
    fn execute(&mut self, job: &JobRecord) -> Result<Execution, CoordinatorError> {
        let mut data = self.pipeline.initial().clone();
        let mut stats = JobStats::default();

        for entry in self.pipeline.stages() {
            if self.shutdown.is_triggered() {
                return Ok(Execution::Interrupted);
            }
            let descriptor = &entry.descriptor;

            let key = descriptor
                .cache_on
                .as_ref()
                .map(|names| {
                    DependencyKey::project(names, &job.parameters).map_err(|name| {
                        CoordinatorError::MissingJobParameter { job: job.id, name }
                    })
                })
                .transpose()?;

            if let Some(key) = &key {
                if let Some(cached) = self.cache.get(&descriptor.name, key)? {
                    debug!(job_id = %job.id, stage = %descriptor.name, "Stage served from cache");
                    stats.cache_hits += 1;
                    data.extend(cached);
                    continue;
                }
                stats.cache_misses += 1;
            }

            let params = match &descriptor.parameter {
                Some(category) => {
                    let selector = job.selector(category).ok_or_else(|| {
                        CoordinatorError::MissingJobParameter {
                            job: job.id,
                            name: category.clone(),
                        }
                    })?;
                    Some(self.catalog.lookup(category, selector)?)
                }
                None => None,
            };

            let output = entry
                .stage
                .run(StageInput { data: &data, params })
                .map_err(|source| CoordinatorError::Stage {
                    stage: descriptor.name.clone(),
                    source,
                })?;
            stats.executed += 1;

            let output = match &key {
                Some(key) => match self.cache.commit(output.clone())? {
                    // Another worker stored this key first; adopt its value.
                    Some(InsertOutcome::Conflict) => self
                        .cache
                        .peek(&descriptor.name, key)
                        .cloned()
                        .unwrap_or(output),
                    _ => output,
                },
                None => output,
            };
            data.extend(output);
        }

        Ok(Execution::Completed { data, stats })
    }

    /// Best-effort release of a job held when a fatal error occurred.
    fn release_after_failure(&mut self, id: JobId, cause: &CoordinatorError) {
        self.state = CoordinatorState::Releasing;
        match self.ledger.release(id, &self.config.worker_id) {
            Ok(true) => warn!(job_id = %id, error = %cause, "Released job after failure"),
            Ok(false) => {}
            Err(e) => error!(job_id = %id, error = %e, "Could not release job after failure"),
        }
        json_output::emit_error(&cause.to_string());
    }
}

fn log_progress(report: &ProgressReport) {
    info!(
        completed = report.completed,
        total = report.total,
        self_computed = report.self_computed,
        window = report.window,
        avg_secs = report.avg_secs_per_job,
        eta = %report.eta.with_timezone(&chrono::Local).format("%d %b %H:%M"),
        "Progress"
    );
    json_output::emit_progress(report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use serde_json::{json, Value};

    use gridrun_core::{JobParameters, JobStatus, ParameterRecord, StageDescriptor, WorkerId};
    use gridrun_store::SqliteStore;

    use crate::stage::{Stage, StageError};

    fn attrs(value: Value) -> DataMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn config(worker: &str) -> WorkerConfig {
        WorkerConfig {
            worker_id: WorkerId::new(worker),
            report_period: 1,
            reset_stuck_on_start: false,
        }
    }

    /// Stands in for an expensive upstream computation and counts its calls.
    struct Expensive {
        calls: Arc<AtomicUsize>,
    }

    impl Stage for Expensive {
        fn run(&self, input: StageInput<'_>) -> Result<DataMap, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let sigma = input.param("sigma")?.as_f64().unwrap_or_default();
            Ok(attrs(json!({"noisy": sigma * 10.0})))
        }
    }

    /// Builds the stored log from the accumulated data.
    struct Report;

    impl Stage for Report {
        fn run(&self, input: StageInput<'_>) -> Result<DataMap, StageError> {
            Ok(attrs(json!({
                "log": {"noisy": input.field("noisy")?, "method": input.field("method")?}
            })))
        }
    }

    /// A solver that never converges.
    struct Diverging;

    impl Stage for Diverging {
        fn run(&self, _input: StageInput<'_>) -> Result<DataMap, StageError> {
            Ok(attrs(json!({"success": false, "result": null})))
        }
    }

    fn registry(calls: &Arc<AtomicUsize>) -> StageRegistry {
        let calls = calls.clone();
        StageRegistry::default()
            .with("expensive", move || Box::new(Expensive { calls: calls.clone() }))
            .with("report", || Box::new(Report))
            .with("diverging", || Box::new(Diverging))
    }

    fn sweep_definition() -> PipelineDefinition {
        PipelineDefinition::new("log")
            .with_stage(
                StageDescriptor::new("noise", "expensive")
                    .with_parameter("sigma")
                    .cached_on(["sigma"]),
            )
            .with_stage(StageDescriptor::new("method", "assign").with_parameter("method"))
            .with_stage(StageDescriptor::new("report", "report"))
    }

    /// Seed sigma {0: 0.1, 1: 0.2}, three methods, and one job per pair
    /// with `sigmas` selecting the sigma ids in job order.
    fn seeded_store(store: &SqliteStore, sigmas: &[i64]) {
        store
            .insert_parameters(
                "sigma",
                &[
                    ParameterRecord::new(0, attrs(json!({"sigma": 0.1}))),
                    ParameterRecord::new(1, attrs(json!({"sigma": 0.2}))),
                ],
            )
            .unwrap();
        let methods: Vec<_> = ["ls", "mpm", "esprit"]
            .iter()
            .enumerate()
            .map(|(i, m)| ParameterRecord::new(i as i64, attrs(json!({"method": m}))))
            .collect();
        store.insert_parameters("method", &methods).unwrap();

        let jobs = sigmas.iter().enumerate().map(|(i, sigma)| {
            JobRecord::new(JobId::new(i as i64 + 1), JobParameters::new())
                .with_parameter("sigma", *sigma)
                .with_parameter("method", (i % 3) as i64)
        });
        store.insert_jobs(jobs).unwrap();
    }

    #[test]
    fn test_shared_sigma_computed_once() {
        let store = SqliteStore::in_memory().unwrap();
        seeded_store(&store, &[0, 0, 0]);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut coordinator =
            Coordinator::from_store(config("w1"), &sweep_definition(), &registry(&calls), store.clone())
                .unwrap();
        let report = coordinator.run().unwrap();

        assert_eq!(report.outcome, RunOutcome::Drained);
        assert_eq!(report.committed, 3);
        assert_eq!(report.self_computed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.cache.local_hits, 2);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);

        for (id, method) in [(1, "ls"), (2, "mpm"), (3, "esprit")] {
            let job = store.get_job(JobId::new(id)).unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Done);
            assert_eq!(job.result, Some(json!({"noisy": 1.0, "method": method})));
        }
    }

    #[test]
    fn test_cache_persists_across_workers() {
        let store = SqliteStore::in_memory().unwrap();
        seeded_store(&store, &[0, 1, 0, 1]);
        let calls = Arc::new(AtomicUsize::new(0));

        Coordinator::from_store(config("w1"), &sweep_definition(), &registry(&calls), store.clone())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // A fresh worker starts with an empty local tier but finds the
        // persisted entries.
        store
            .insert_jobs([JobRecord::new(JobId::new(5), JobParameters::new())
                .with_parameter("sigma", 1)
                .with_parameter("method", 0)])
            .unwrap();
        let mut second =
            Coordinator::from_store(config("w2"), &sweep_definition(), &registry(&calls), store.clone())
                .unwrap();
        let report = second.run().unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(report.self_computed, 0);
        assert_eq!(report.cache.persistent_hits, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Captures the data each job carries when the stage is reached.
    struct Recorder {
        seen: Arc<Mutex<Vec<DataMap>>>,
    }

    impl Stage for Recorder {
        fn run(&self, input: StageInput<'_>) -> Result<DataMap, StageError> {
            self.seen.lock().unwrap().push(input.data.clone());
            Ok(DataMap::new())
        }
    }

    #[test]
    fn test_numeric_failure_is_data() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_jobs([JobRecord::new(JobId::new(1), JobParameters::new())])
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry(&calls).with("record", move || {
            Box::new(Recorder {
                seen: recorded.clone(),
            })
        });
        let definition = PipelineDefinition::new("log")
            .with_stage(StageDescriptor::new("solve", "diverging"))
            .with_stage(StageDescriptor::new("after_solve", "record"))
            .with_stage(StageDescriptor::new("epsilon", "epsilon"))
            .with_stage(StageDescriptor::new("after_epsilon", "record"))
            .with_stage(StageDescriptor::new("save", "save"));

        let report = Coordinator::from_store(config("w1"), &definition, &registry, store.clone())
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(report.committed, 1);
        let failed = json!({"success": false, "result": null});
        let seen: Vec<Value> = seen.lock().unwrap().iter().cloned().map(Value::Object).collect();
        assert_eq!(seen, vec![failed.clone(), failed]);

        let job = store.get_job(JobId::new(1)).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.result, Some(Value::Null));
    }

    #[test]
    fn test_overflowing_builtin_stage_still_completes_job() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_parameters("sigma", &[ParameterRecord::new(0, attrs(json!({"sigma": 0.1})))])
            .unwrap();
        store
            .insert_jobs([JobRecord::new(JobId::new(1), JobParameters::new()).with_parameter("sigma", 0)])
            .unwrap();
        let definition = PipelineDefinition {
            initial: attrs(json!({
                "range": [0.0, 1.0],
                "size": 8,
                "components": [{"frequency": 3.0, "damping": -1000.0}]
            })),
            ..PipelineDefinition::new("log")
                .with_stage(StageDescriptor::new("source", "signal"))
                .with_stage(StageDescriptor::new("noise", "noise").with_parameter("sigma"))
                .with_stage(StageDescriptor::new("epsilon", "epsilon"))
                .with_stage(StageDescriptor::new("save", "save"))
        };
        let calls = Arc::new(AtomicUsize::new(0));

        let report = Coordinator::from_store(config("w1"), &definition, &registry(&calls), store.clone())
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(report.committed, 1);
        let job = store.get_job(JobId::new(1)).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.result, Some(Value::Null));
    }

    #[test]
    fn test_interrupt_releases_job_and_resume_completes_once() {
        let store = SqliteStore::in_memory().unwrap();
        seeded_store(&store, &[0, 1, 0]);
        let calls = Arc::new(AtomicUsize::new(0));

        let shutdown = ShutdownSignal::new();
        let fired = Arc::new(AtomicBool::new(false));
        let (signal, once) = (shutdown.clone(), fired.clone());
        let registry = registry(&calls).with("interrupt", move || {
            Box::new(InterruptOnce {
                signal: signal.clone(),
                fired: once.clone(),
            })
        });
        let definition = sweep_definition().with_stage(StageDescriptor::new("stop", "interrupt"));
        // Move the interrupting stage first so the job is mid-pipeline when
        // the stop arrives.
        let mut stages = definition.stages.clone();
        stages.rotate_right(1);
        let definition = PipelineDefinition { stages, ..definition };

        let report = Coordinator::from_store(config("w1"), &definition, &registry, store.clone())
            .unwrap()
            .with_shutdown(shutdown)
            .run()
            .unwrap();
        assert_eq!(
            report.outcome,
            RunOutcome::Interrupted {
                released: Some(JobId::new(1))
            }
        );
        assert_eq!(report.committed, 0);
        let released = store.get_job(JobId::new(1)).unwrap().unwrap();
        assert_eq!(released.status, JobStatus::Pending);
        assert!(released.result.is_none());

        let resumed = Coordinator::from_store(config("w2"), &definition, &registry, store.clone())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(resumed.outcome, RunOutcome::Drained);
        assert_eq!(resumed.committed, 3);
        let counts = store.status_counts().unwrap();
        assert_eq!((counts.done, counts.pending, counts.in_progress), (3, 0, 0));
    }

    struct InterruptOnce {
        signal: ShutdownSignal,
        fired: Arc<AtomicBool>,
    }

    impl Stage for InterruptOnce {
        fn run(&self, _input: StageInput<'_>) -> Result<DataMap, StageError> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                self.signal.trigger();
            }
            Ok(DataMap::new())
        }
    }

    #[test]
    fn test_stop_before_claim_leaves_jobs_pending() {
        let store = SqliteStore::in_memory().unwrap();
        seeded_store(&store, &[0, 1]);
        let calls = Arc::new(AtomicUsize::new(0));
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let report = Coordinator::from_store(config("w1"), &sweep_definition(), &registry(&calls), store.clone())
            .unwrap()
            .with_shutdown(shutdown)
            .run()
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Interrupted { released: None });
        assert_eq!(store.status_counts().unwrap().pending, 2);
    }

    #[test]
    fn test_unknown_parameter_is_fatal_and_releases_job() {
        let store = SqliteStore::in_memory().unwrap();
        seeded_store(&store, &[9]);
        let calls = Arc::new(AtomicUsize::new(0));

        let err = Coordinator::from_store(config("w1"), &sweep_definition(), &registry(&calls), store.clone())
            .unwrap()
            .run()
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::UnknownParameter { category, selector } if category == "sigma" && selector == json!(9)
        ));
        assert_eq!(store.get_job(JobId::new(1)).unwrap().unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_missing_result_field_is_fatal() {
        let store = SqliteStore::in_memory().unwrap();
        seeded_store(&store, &[0]);
        let calls = Arc::new(AtomicUsize::new(0));
        let definition = PipelineDefinition {
            result_field: "missing".to_string(),
            ..sweep_definition()
        };

        let err = Coordinator::from_store(config("w1"), &definition, &registry(&calls), store.clone())
            .unwrap()
            .run()
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::MissingResultField(f) if f == "missing"));
        assert_eq!(store.status_counts().unwrap().pending, 1);
    }

    #[test]
    fn test_reset_on_start_recovers_crashed_claims() {
        let store = SqliteStore::in_memory().unwrap();
        seeded_store(&store, &[0, 1]);
        // A worker that died holding job 1.
        store.claim_next(&WorkerId::new("crashed")).unwrap().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut config = config("w1");
        config.reset_stuck_on_start = true;
        let report = Coordinator::from_store(config, &sweep_definition(), &registry(&calls), store.clone())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.committed, 2);
        assert_eq!(store.status_counts().unwrap().done, 2);
    }

    #[test]
    fn test_concurrent_coordinators_complete_each_job_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.db");
        let store = SqliteStore::open_path(&path).unwrap();
        let sigmas: Vec<i64> = (0..60).map(|i| i % 2).collect();
        seeded_store(&store, &sigmas);
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|w| {
                let path = path.clone();
                let calls = calls.clone();
                thread::spawn(move || {
                    let store = SqliteStore::open_path(&path).unwrap();
                    Coordinator::from_store(
                        config(&format!("w{w}")),
                        &sweep_definition(),
                        &registry(&calls),
                        store,
                    )
                    .unwrap()
                    .run()
                    .unwrap()
                })
            })
            .collect();

        let committed: u64 = handles.into_iter().map(|h| h.join().unwrap().committed).sum();
        assert_eq!(committed, 60);
        assert_eq!(store.status_counts().unwrap().done, 60);
        // At most one computation per worker and key; at least one per key.
        let calls = calls.load(Ordering::SeqCst);
        assert!((2..=8).contains(&calls), "expensive stage ran {calls} times");
    }
}
