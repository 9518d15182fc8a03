//! JSON lines on stdout describing what a worker does, for scripts watching a
//! sweep. Off unless the binary is started with `--json`.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde_json::Value;

use crate::progress::ProgressReport;

static JSON_MODE_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn enable_json_mode() {
    JSON_MODE_ENABLED.store(true, Ordering::SeqCst);
}

pub fn is_json_mode() -> bool {
    JSON_MODE_ENABLED.load(Ordering::SeqCst)
}

/// Events a worker reports, tagged by `event`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent<'a> {
    RunStarted {
        worker_id: &'a str,
        total_jobs: u64,
    },
    JobCommitted {
        job_id: i64,
        executed_stages: u32,
        cache_hits: u32,
    },
    JobReleased {
        job_id: i64,
        reason: &'a str,
    },
    Progress(&'a ProgressReport),
    RunFinished {
        committed: u64,
        interrupted: bool,
    },
    Error {
        message: &'a str,
    },
}

impl WorkerEvent<'_> {
    /// The event as one JSON line, stamped with the current time.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut value {
            fields.insert(
                "timestamp".to_string(),
                Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        serde_json::to_string(&value)
    }

    /// Write the event to stdout when JSON mode is on.
    pub fn emit(&self) {
        if !is_json_mode() {
            return;
        }
        if let Ok(line) = self.to_line() {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", line);
            let _ = stdout.flush();
        }
    }
}

pub fn emit_run_started(worker_id: &str, total_jobs: u64) {
    WorkerEvent::RunStarted {
        worker_id,
        total_jobs,
    }
    .emit();
}

pub fn emit_job_committed(job_id: i64, executed_stages: u32, cache_hits: u32) {
    WorkerEvent::JobCommitted {
        job_id,
        executed_stages,
        cache_hits,
    }
    .emit();
}

pub fn emit_job_released(job_id: i64, reason: &str) {
    WorkerEvent::JobReleased { job_id, reason }.emit();
}

pub fn emit_progress(report: &ProgressReport) {
    WorkerEvent::Progress(report).emit();
}

pub fn emit_run_finished(committed: u64, interrupted: bool) {
    WorkerEvent::RunFinished {
        committed,
        interrupted,
    }
    .emit();
}

pub fn emit_error(message: &str) {
    WorkerEvent::Error { message }.emit();
}
