//! Job store abstraction
//!
//! The poller, submitter and handlers all read and write job rows through
//! this trait so the core logic can be exercised without a database. The
//! Postgres implementation delegates to `db::queries::job`; the in-memory
//! implementation backs tests and mock-mode runs.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::PgPool;

use crate::db::queries;
use crate::types::{JobRecord, JobState, ValuationRequest};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a pending job row. Creating an id that already exists returns
    /// the existing row unchanged.
    async fn create(&self, job_id: &str, request: &ValuationRequest) -> Result<JobRecord>;

    /// Read a job row by id
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// Write the completion payload and view link. Returns `true` only when
    /// the row newly transitioned to completed; a terminal row is left
    /// untouched (idempotent duplicate delivery).
    async fn complete(&self, job_id: &str, payload: &Value, view_url: &str) -> Result<bool>;

    /// Record an externally-reported failure. Same idempotency contract as
    /// `complete`.
    async fn fail(&self, job_id: &str, error: &str) -> Result<bool>;

    fn name(&self) -> &'static str;
}

// ==========================================================================
// Postgres implementation
// ==========================================================================

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job_id: &str, request: &ValuationRequest) -> Result<JobRecord> {
        queries::job::create_job(&self.pool, job_id, request).await
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        queries::job::get_job(&self.pool, job_id).await
    }

    async fn complete(&self, job_id: &str, payload: &Value, view_url: &str) -> Result<bool> {
        queries::job::complete_job(&self.pool, job_id, payload, view_url).await
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<bool> {
        queries::job::fail_job(&self.pool, job_id, error).await
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

// ==========================================================================
// In-memory implementation
// ==========================================================================

/// In-memory job store for tests and mock-mode runs
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a row directly (test setup)
    pub fn put(&self, record: JobRecord) {
        self.jobs.lock().insert(record.id.clone(), record);
    }

    /// Build a row in a given state (test setup)
    pub fn record(job_id: &str, state: JobState, response_payload: Option<Value>) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            id: job_id.to_string(),
            status: state.as_str().to_string(),
            request_payload: Value::Object(serde_json::Map::new()),
            response_payload,
            error: None,
            view_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job_id: &str, request: &ValuationRequest) -> Result<JobRecord> {
        let mut jobs = self.jobs.lock();
        if let Some(existing) = jobs.get(job_id) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let record = JobRecord {
            id: job_id.to_string(),
            status: JobState::Pending.as_str().to_string(),
            request_payload: serde_json::to_value(request)?,
            response_payload: None,
            error: None,
            view_url: None,
            created_at: now,
            updated_at: now,
        };
        jobs.insert(job_id.to_string(), record.clone());
        Ok(record)
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.jobs.lock().get(job_id).cloned())
    }

    async fn complete(&self, job_id: &str, payload: &Value, view_url: &str) -> Result<bool> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(job_id) {
            Some(record) if !record.state().is_terminal() => {
                record.status = JobState::Completed.as_str().to_string();
                record.response_payload = Some(payload.clone());
                record.view_url = Some(view_url.to_string());
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<bool> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(job_id) {
            Some(record) if !record.state().is_terminal() => {
                record.status = JobState::Failed.as_str().to_string();
                record.error = Some(error.to_string());
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
