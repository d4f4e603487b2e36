// crates/airline-etl-core/src/job.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbPool;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job name must not be empty")]
    EmptyJobName,
    #[error("job ledger query failed: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named arguments the job was launched with. `job_name` is the only required one.
#[derive(Debug, Clone, Serialize)]
pub struct JobArgs {
    pub job_name: String,
    pub arguments: BTreeMap<String, String>,
}

impl JobArgs {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRunRecord {
    pub run_id: Uuid,
    pub job_name: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub arguments: Value,
    pub summary: Option<Value>,
    pub error: Option<String>,
}

/// Persists the lifecycle of job runs.
#[async_trait]
pub trait JobLedger: Send + Sync {
    async fn record_start(&self, record: &JobRunRecord) -> Result<(), JobError>;
    async fn record_finish(&self, record: &JobRunRecord) -> Result<(), JobError>;
}

/// Handle for one job run, opened by [`JobRun::init`].
///
/// Callers must finish it with [`JobRun::commit`] or [`JobRun::abort`]; a handle
/// dropped while still running is logged.
pub struct JobRun {
    ledger: Arc<dyn JobLedger>,
    record: JobRunRecord,
    finished: bool,
}

impl fmt::Debug for JobRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRun")
            .field("record", &self.record)
            .field("finished", &self.finished)
            .finish()
    }
}

impl JobRun {
    pub async fn init(ledger: Arc<dyn JobLedger>, args: &JobArgs) -> Result<Self, JobError> {
        if args.job_name.trim().is_empty() {
            return Err(JobError::EmptyJobName);
        }

        let record = JobRunRecord {
            run_id: Uuid::new_v4(),
            job_name: args.job_name.clone(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            arguments: serde_json::to_value(&args.arguments)?,
            summary: None,
            error: None,
        };
        ledger.record_start(&record).await?;
        info!(job = %record.job_name, run_id = %record.run_id, "Job run started");

        Ok(Self {
            ledger,
            record,
            finished: false,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.record.run_id
    }

    pub fn job_name(&self) -> &str {
        &self.record.job_name
    }

    pub async fn commit<S: Serialize>(mut self, summary: &S) -> Result<JobRunRecord, JobError> {
        self.record.summary = Some(serde_json::to_value(summary)?);
        self.finish(JobStatus::Succeeded).await
    }

    pub async fn abort(mut self, message: &str) -> Result<JobRunRecord, JobError> {
        self.record.error = Some(message.to_string());
        self.finish(JobStatus::Failed).await
    }

    async fn finish(&mut self, status: JobStatus) -> Result<JobRunRecord, JobError> {
        self.finished = true;
        self.record.status = status;
        self.record.finished_at = Some(Utc::now());
        self.ledger.record_finish(&self.record).await?;
        info!(
            job = %self.record.job_name,
            run_id = %self.record.run_id,
            status = %status,
            "Job run finished"
        );
        Ok(self.record.clone())
    }
}

impl Drop for JobRun {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                job = %self.record.job_name,
                run_id = %self.record.run_id,
                "Job run dropped without commit or abort"
            );
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryJobLedger {
    records: Mutex<Vec<JobRunRecord>>,
}

impl InMemoryJobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<JobRunRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl JobLedger for InMemoryJobLedger {
    async fn record_start(&self, record: &JobRunRecord) -> Result<(), JobError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }

    async fn record_finish(&self, record: &JobRunRecord) -> Result<(), JobError> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match records.iter_mut().find(|row| row.run_id == record.run_id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }
}

/// Ledger stored in the `etl_job_runs` table next to the warehouse data.
///
/// Column types stay within what both Postgres and Redshift accept, so ids and
/// JSON payloads are stored as text.
#[derive(Debug, Clone)]
pub struct PostgresJobLedger {
    pool: DbPool,
}

impl PostgresJobLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), JobError> {
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS etl_job_runs (
                    run_id VARCHAR(36) PRIMARY KEY,
                    job_name VARCHAR(256) NOT NULL,
                    status VARCHAR(16) NOT NULL,
                    started_at TIMESTAMPTZ NOT NULL,
                    finished_at TIMESTAMPTZ,
                    arguments VARCHAR(65535),
                    summary VARCHAR(65535),
                    error VARCHAR(65535)
                )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobLedger for PostgresJobLedger {
    async fn record_start(&self, record: &JobRunRecord) -> Result<(), JobError> {
        sqlx::query(
            r#"
                INSERT INTO etl_job_runs (run_id, job_name, status, started_at, arguments)
                VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.run_id.to_string())
        .bind(&record.job_name)
        .bind(record.status.as_str())
        .bind(record.started_at)
        .bind(record.arguments.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_finish(&self, record: &JobRunRecord) -> Result<(), JobError> {
        sqlx::query(
            r#"
                UPDATE etl_job_runs
                SET status = $2, finished_at = $3, summary = $4, error = $5
                WHERE run_id = $1
            "#,
        )
        .bind(record.run_id.to_string())
        .bind(record.status.as_str())
        .bind(record.finished_at)
        .bind(record.summary.as_ref().map(Value::to_string))
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
