//! GridRun Worker
//!
//! Seeds a job grid into the shared database and runs coordinators against it.
//! Start as many `run` processes as there are cores to share.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gridrun_core::{PipelineDefinition, WorkerId};
use gridrun_store::{Ledger, SqliteStore, StoreConfig};
use gridrun_worker::json_output;
use gridrun_worker::{
    Coordinator, GridPlan, RunOutcome, ShutdownSignal, StageRegistry, WorkerConfig,
};

/// GridRun worker - parameter sweeps over a shared job ledger
#[derive(Parser, Debug)]
#[command(name = "gridrun-worker", about = "Run parameter-sweep jobs from a shared SQLite ledger")]
struct Cli {
    /// Path of the shared database file
    #[arg(long, global = true, default_value = "gridrun.db")]
    db: PathBuf,

    /// How long to wait for another process's write lock (milliseconds)
    #[arg(long, global = true, default_value = "30000")]
    busy_timeout_ms: u64,

    /// Emit JSON lines on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the parameter records and job grid of a definition file
    Seed {
        /// Pipeline definition (JSON)
        #[arg(short, long)]
        definition: PathBuf,
    },

    /// Move every in-progress job back to pending
    ///
    /// Only run this while no worker is active.
    Reset,

    /// Show job counts by status
    Status,

    /// Claim and process jobs until none is pending
    Run {
        /// Pipeline definition (JSON)
        #[arg(short, long)]
        definition: PathBuf,

        /// Worker ID recorded on claims (generated if not set)
        #[arg(long)]
        worker_id: Option<String>,

        /// Completed jobs between progress reports
        #[arg(long, default_value = "20")]
        report_period: u64,

        /// Reset stuck jobs before the first claim
        #[arg(long)]
        reset_stuck: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for JSON lines.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("gridrun_worker=info".parse()?)
                .add_directive("gridrun_store=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.json {
        json_output::enable_json_mode();
    }

    let store_config = StoreConfig::new(cli.db).with_busy_timeout_ms(cli.busy_timeout_ms);
    let store = SqliteStore::open(&store_config)?;

    match cli.command {
        Commands::Seed { definition } => {
            let definition = PipelineDefinition::from_file(&definition)?;
            let plan = GridPlan::from_definition(&definition)?;
            let summary = plan.seed(&store)?;
            println!(
                "Seeded {} parameter records and {} jobs (grid of {})",
                summary.parameters,
                summary.jobs,
                plan.job_count()
            );
        }
        Commands::Reset => {
            let recovered = store.reset_stuck()?;
            println!("Reset {} stuck jobs to pending", recovered);
        }
        Commands::Status => {
            let counts = store.status_counts()?;
            println!("Pending:     {}", counts.pending);
            println!("In progress: {}", counts.in_progress);
            println!("Done:        {}", counts.done);
            println!("Total:       {}", counts.total());
        }
        Commands::Run {
            definition,
            worker_id,
            report_period,
            reset_stuck,
        } => {
            let definition = PipelineDefinition::from_file(&definition)?;
            let config = WorkerConfig {
                worker_id: worker_id.map(WorkerId::new).unwrap_or_else(WorkerId::generate),
                report_period,
                reset_stuck_on_start: reset_stuck,
            };

            let shutdown = ShutdownSignal::new();
            shutdown.install_handler()?;

            info!(
                worker_id = %config.worker_id,
                db = %store_config.path.display(),
                "Starting GridRun worker"
            );

            let registry = StageRegistry::default();
            let mut coordinator = Coordinator::from_store(config, &definition, &registry, store)?
                .with_shutdown(shutdown);
            let report = coordinator.run()?;

            match report.outcome {
                RunOutcome::Drained => info!(
                    committed = report.committed,
                    self_computed = report.self_computed,
                    "All jobs done"
                ),
                RunOutcome::Interrupted { released } => warn!(
                    committed = report.committed,
                    released = ?released.map(|id| id.get()),
                    "Stopped before the ledger was drained"
                ),
            }
        }
    }

    Ok(())
}
