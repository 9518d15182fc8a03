//! SQLite-backed store.
//!
//! One database file is shared by every worker process; each process opens its
//! own connection. Every ledger transition is a single UPDATE statement, which
//! SQLite runs under its one-writer lock, so no two workers can observe and
//! claim the same pending row.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use gridrun_core::{
    DataMap, DependencyKey, JobId, JobParameters, JobRecord, JobStatus, ParameterRecord, WorkerId,
};

use crate::ports::{CacheStore, InsertOutcome, Ledger, ParameterSource, StatusCounts};
use crate::{Result, StoreConfig, StoreError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY,
        parameters TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'in_progress', 'done')),
        claimed_by TEXT,
        claimed_at INTEGER,
        finished_at INTEGER,
        result TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, id);

    CREATE TABLE IF NOT EXISTS parameters (
        category TEXT NOT NULL,
        id INTEGER NOT NULL,
        attributes TEXT NOT NULL,
        PRIMARY KEY (category, id)
    );

    CREATE TABLE IF NOT EXISTS stage_cache (
        stage TEXT NOT NULL,
        key_digest TEXT NOT NULL,
        dependency_key TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (stage, key_digest)
    );
";

/// Hex SHA-256 of the key's canonical form.
pub fn key_digest(key: &DependencyKey) -> String {
    hex::encode(Sha256::digest(key.canonical().as_bytes()))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// SQLite implementation of the ledger, cache tier and parameter source.
///
/// Clones share one connection; the connection closes when the last clone
/// is dropped.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and create if needed) the database described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!(path = %config.path.display(), journal_mode = %mode, "Opened store");
        Self::with_connection(conn)
    }

    /// Open the database file at `path` with default settings.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&StoreConfig::new(path.as_ref()))
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the guard cannot leave SQLite mid-statement.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert parameter records for a category.
    ///
    /// Records already stored with the same attributes are kept. A stored
    /// record with different attributes fails the whole batch with
    /// `ParameterConflict`: jobs and cache entries select records by id, so
    /// an id must never change meaning.
    pub fn insert_parameters(&self, category: &str, records: &[ParameterRecord]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let inserted = insert_parameters_in(&tx, category, records)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Insert pending jobs.
    ///
    /// Jobs already stored with the same parameters are kept, so seeding is
    /// repeatable. A stored job with different parameters fails the whole
    /// batch with `JobConflict`.
    pub fn insert_jobs<I>(&self, jobs: I) -> Result<usize>
    where
        I: IntoIterator<Item = JobRecord>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let inserted = insert_jobs_in(&tx, jobs)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Insert a whole grid, parameter records and jobs, in one transaction.
    ///
    /// Returns the number of parameter records and jobs inserted. On a
    /// conflict nothing is written.
    pub fn insert_grid<'a, P, I>(&self, parameters: P, jobs: I) -> Result<(usize, usize)>
    where
        P: IntoIterator<Item = (&'a str, &'a [ParameterRecord])>,
        I: IntoIterator<Item = JobRecord>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut records = 0;
        for (category, batch) in parameters {
            records += insert_parameters_in(&tx, category, batch)?;
        }
        let jobs = insert_jobs_in(&tx, jobs)?;
        tx.commit()?;
        Ok((records, jobs))
    }

    /// Fetch a single job record.
    pub fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        let row = self
            .conn()
            .query_row(
                "SELECT parameters, status, result FROM jobs WHERE id = ?1",
                params![id.get()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((parameters, status, result)) = row else {
            return Ok(None);
        };
        let status = status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::Corrupt(format!("job {id}: {e}")))?;
        Ok(Some(JobRecord {
            id,
            parameters: serde_json::from_str(&parameters)?,
            status,
            result: result.map(|r| serde_json::from_str(&r)).transpose()?,
        }))
    }

    /// Count jobs per status.
    pub fn status_counts(&self) -> Result<StatusCounts> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            match status
                .parse::<JobStatus>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?
            {
                JobStatus::Pending => counts.pending = count,
                JobStatus::InProgress => counts.in_progress = count,
                JobStatus::Done => counts.done = count,
            }
        }
        Ok(counts)
    }
}

fn insert_parameters_in(
    tx: &Transaction<'_>,
    category: &str,
    records: &[ParameterRecord],
) -> Result<usize> {
    let mut existing =
        tx.prepare("SELECT attributes FROM parameters WHERE category = ?1 AND id = ?2")?;
    let mut insert =
        tx.prepare("INSERT INTO parameters (category, id, attributes) VALUES (?1, ?2, ?3)")?;
    let mut inserted = 0;
    for record in records {
        let stored = existing
            .query_row(params![category, record.id], |row| row.get::<_, String>(0))
            .optional()?;
        match stored {
            Some(stored) => {
                let stored: DataMap = serde_json::from_str(&stored)?;
                if stored != record.attributes {
                    return Err(StoreError::ParameterConflict {
                        category: category.to_string(),
                        id: record.id,
                    });
                }
            }
            None => {
                let attributes = serde_json::to_string(&record.attributes)?;
                inserted += insert.execute(params![category, record.id, attributes])?;
            }
        }
    }
    debug!(category = %category, inserted, "Inserted parameter records");
    Ok(inserted)
}

fn insert_jobs_in<I>(tx: &Transaction<'_>, jobs: I) -> Result<usize>
where
    I: IntoIterator<Item = JobRecord>,
{
    let mut existing = tx.prepare("SELECT parameters FROM jobs WHERE id = ?1")?;
    let mut insert =
        tx.prepare("INSERT INTO jobs (id, parameters, status) VALUES (?1, ?2, 'pending')")?;
    let mut inserted = 0;
    for job in jobs {
        let stored = existing
            .query_row(params![job.id.get()], |row| row.get::<_, String>(0))
            .optional()?;
        match stored {
            Some(stored) => {
                let stored: JobParameters = serde_json::from_str(&stored)?;
                if stored != job.parameters {
                    return Err(StoreError::JobConflict(job.id));
                }
            }
            None => {
                let parameters = serde_json::to_string(&job.parameters)?;
                inserted += insert.execute(params![job.id.get(), parameters])?;
            }
        }
    }
    info!(inserted, "Inserted jobs");
    Ok(inserted)
}

impl Ledger for SqliteStore {
    fn claim_next(&self, worker: &WorkerId) -> Result<Option<JobRecord>> {
        let claimed = self
            .conn()
            .query_row(
                "UPDATE jobs SET status = 'in_progress', claimed_by = ?1, claimed_at = ?2
                 WHERE id = (SELECT id FROM jobs WHERE status = 'pending' ORDER BY id LIMIT 1)
                 RETURNING id, parameters",
                params![worker.as_str(), now_ms()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((id, parameters)) = claimed else {
            return Ok(None);
        };
        let parameters: JobParameters = serde_json::from_str(&parameters)?;
        Ok(Some(JobRecord {
            id: JobId::new(id),
            parameters,
            status: JobStatus::InProgress,
            result: None,
        }))
    }

    fn commit(&self, id: JobId, worker: &WorkerId, result: &Value) -> Result<()> {
        let result = serde_json::to_string(result)?;
        let changed = self.conn().execute(
            "UPDATE jobs SET status = 'done', result = ?3, finished_at = ?4
             WHERE id = ?1 AND status = 'in_progress' AND claimed_by = ?2",
            params![id.get(), worker.as_str(), result, now_ms()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotClaimed(id));
        }
        Ok(())
    }

    fn release(&self, id: JobId, worker: &WorkerId) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE jobs SET status = 'pending', claimed_by = NULL, claimed_at = NULL
             WHERE id = ?1 AND status = 'in_progress' AND claimed_by = ?2",
            params![id.get(), worker.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn reset_stuck(&self) -> Result<usize> {
        let changed = self.conn().execute(
            "UPDATE jobs SET status = 'pending', claimed_by = NULL, claimed_at = NULL
             WHERE status = 'in_progress'",
            [],
        )?;
        Ok(changed)
    }

    fn count_all(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl CacheStore for SqliteStore {
    fn fetch(&self, stage: &str, key: &DependencyKey) -> Result<Option<DataMap>> {
        let payload = self
            .conn()
            .query_row(
                "SELECT payload FROM stage_cache WHERE stage = ?1 AND key_digest = ?2",
                params![stage, key_digest(key)],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    fn insert(&self, stage: &str, key: &DependencyKey, payload: &DataMap) -> Result<InsertOutcome> {
        let encoded = serde_json::to_string(payload)?;
        let outcome = self.conn().execute(
            "INSERT INTO stage_cache (stage, key_digest, dependency_key, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![stage, key_digest(key), key.canonical(), encoded, now_ms()],
        );
        match outcome {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Ok(InsertOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl ParameterSource for SqliteStore {
    fn load_category(&self, category: &str) -> Result<Vec<ParameterRecord>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, attributes FROM parameters WHERE category = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![category], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, attributes)| -> Result<ParameterRecord> {
                Ok(ParameterRecord::new(id, serde_json::from_str(&attributes)?))
            })
            .collect()
    }
}
