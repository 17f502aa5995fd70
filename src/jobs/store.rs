//! Durable job records.
//!
//! All status changes go through a conditional update so that two writers
//! racing on the same job cannot both succeed.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::{ReportError, Result};
use crate::jobs::types::{JobStatus, ReportJob};

/// Storage for report jobs.
pub trait JobStore: Send + Sync {
    /// Fails with [`ReportError::InvalidInput`] if the id is taken.
    fn insert(&self, job: &ReportJob) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<ReportJob>>;

    /// Jobs for one user, newest first.
    fn list_for_user(&self, user_id: &str) -> Result<Vec<ReportJob>>;

    /// Returns whether a job was removed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Moves `pending` to `generating`.
    fn mark_generating(&self, id: &str) -> Result<ReportJob>;

    /// Moves `generating` to `completed`.
    fn mark_completed(&self, id: &str, file_path: &Path) -> Result<ReportJob>;

    /// Moves `generating` to `failed`.
    fn mark_failed(&self, id: &str, message: &str) -> Result<ReportJob>;

    /// Fails every job that has been `generating` since before `cutoff`.
    fn fail_stale(&self, cutoff: DateTime<Utc>, message: &str) -> Result<usize>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS report_jobs (
    id            TEXT PRIMARY KEY,
    user_id       TEXT NOT NULL,
    title         TEXT NOT NULL,
    format        TEXT NOT NULL,
    start_date    TEXT,
    end_date      TEXT,
    device_ids    TEXT,
    status        TEXT NOT NULL,
    file_path     TEXT,
    error_message TEXT,
    created       TEXT NOT NULL,
    updated       TEXT NOT NULL,
    completed     TEXT
);
CREATE INDEX IF NOT EXISTS idx_report_jobs_user ON report_jobs (user_id, created);
CREATE INDEX IF NOT EXISTS idx_report_jobs_status ON report_jobs (status, updated);
";

const COLUMNS: &str = "id, user_id, title, format, start_date, end_date, device_ids, status, \
                       file_path, error_message, created, updated, completed";

/// Fixed-width UTC timestamps so text comparison matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ReportJob> {
    let format: String = row.get(3)?;
    let device_ids: Option<String> = row.get(6)?;
    let status: String = row.get(7)?;
    let file_path: Option<String> = row.get(8)?;
    let created: String = row.get(10)?;
    let updated: String = row.get(11)?;
    let completed: Option<String> = row.get(12)?;

    Ok(ReportJob {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        format: format.parse().map_err(|e| conversion(3, e))?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        device_ids: device_ids
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| conversion(6, e))?,
        status: status.parse().map_err(|e| conversion(7, e))?,
        file_path: file_path.map(PathBuf::from),
        error_message: row.get(9)?,
        created: parse_time(10, &created)?,
        updated: parse_time(11, &updated)?,
        completed: completed.as_deref().map(|c| parse_time(12, c)).transpose()?,
    })
}

fn select_job(conn: &Connection, id: &str) -> rusqlite::Result<Option<ReportJob>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM report_jobs WHERE id = ?1"),
        [id],
        job_from_row,
    )
    .optional()
}

/// SQLite-backed [`JobStore`].
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Opens (or creates) the database at `path`, including parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "Opening job store");
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `expected -> next` only if the job is still in `expected`.
    fn transition(
        &self,
        id: &str,
        expected: JobStatus,
        next: JobStatus,
        file_path: Option<&Path>,
        error_message: Option<&str>,
    ) -> Result<ReportJob> {
        let conn = self.lock();
        let now = timestamp(Utc::now());
        let completed = next.is_terminal().then(|| now.clone());
        let file_path = file_path.map(|p| p.to_string_lossy().into_owned());

        let changed = conn.execute(
            "UPDATE report_jobs
             SET status = ?3,
                 updated = ?4,
                 completed = COALESCE(?5, completed),
                 file_path = COALESCE(?6, file_path),
                 error_message = COALESCE(?7, error_message)
             WHERE id = ?1 AND status = ?2",
            params![
                id,
                expected.as_str(),
                next.as_str(),
                now,
                completed,
                file_path,
                error_message
            ],
        )?;

        let job = select_job(&conn, id)?.ok_or_else(|| ReportError::NotFound(id.to_string()))?;
        if changed == 0 {
            return Err(ReportError::Concurrency {
                job_id: id.to_string(),
                current: job.status,
                requested: next,
            });
        }

        debug!(job_id = id, from = %expected, to = %next, "Job status changed");
        Ok(job)
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, job: &ReportJob) -> Result<()> {
        let conn = self.lock();
        let device_ids = job
            .device_ids
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO report_jobs ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                job.id,
                job.user_id,
                job.title,
                job.format.as_str(),
                job.start_date,
                job.end_date,
                device_ids,
                job.status.as_str(),
                job.file_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                job.error_message,
                timestamp(job.created),
                timestamp(job.updated),
                job.completed.map(timestamp),
            ],
        )?;

        if inserted == 0 {
            return Err(ReportError::invalid(format!("job id {} already exists", job.id)));
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<ReportJob>> {
        Ok(select_job(&self.lock(), id)?)
    }

    fn list_for_user(&self, user_id: &str) -> Result<Vec<ReportJob>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM report_jobs
             WHERE user_id = ?1
             ORDER BY created DESC, rowid DESC"
        ))?;
        let jobs = stmt
            .query_map([user_id], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let removed = self
            .lock()
            .execute("DELETE FROM report_jobs WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    fn mark_generating(&self, id: &str) -> Result<ReportJob> {
        self.transition(id, JobStatus::Pending, JobStatus::Generating, None, None)
    }

    fn mark_completed(&self, id: &str, file_path: &Path) -> Result<ReportJob> {
        self.transition(
            id,
            JobStatus::Generating,
            JobStatus::Completed,
            Some(file_path),
            None,
        )
    }

    fn mark_failed(&self, id: &str, message: &str) -> Result<ReportJob> {
        self.transition(
            id,
            JobStatus::Generating,
            JobStatus::Failed,
            None,
            Some(message),
        )
    }

    fn fail_stale(&self, cutoff: DateTime<Utc>, message: &str) -> Result<usize> {
        let now = timestamp(Utc::now());
        let failed = self.lock().execute(
            "UPDATE report_jobs
             SET status = 'failed', error_message = ?2, updated = ?3, completed = ?3
             WHERE status = 'generating' AND updated < ?1",
            params![timestamp(cutoff), message, now],
        )?;
        Ok(failed)
    }
}
