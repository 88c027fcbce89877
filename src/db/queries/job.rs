//! Valuation job queries
//!
//! The terminal transition is guarded in SQL: `complete_job` and `fail_job`
//! only touch rows that are not already terminal, so a duplicate callback
//! delivery is a no-op at the database level, not just in process memory.

use anyhow::Result;
use serde_json::Value;
use sqlx::PgPool;

use crate::types::{JobRecord, ValuationRequest};

const JOB_COLUMNS: &str = "id, status, request_payload, response_payload, error, view_url, created_at, updated_at";

/// Create a pending job row; an existing id is returned unchanged
pub async fn create_job(
    pool: &PgPool,
    job_id: &str,
    request: &ValuationRequest,
) -> Result<JobRecord> {
    let request_payload = serde_json::to_value(request)?;

    let inserted = sqlx::query_as::<_, JobRecord>(&format!(
        r#"
        INSERT INTO valuation_jobs (id, status, request_payload, created_at, updated_at)
        VALUES ($1, 'pending', $2, NOW(), NOW())
        ON CONFLICT (id) DO NOTHING
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(&request_payload)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(record) => Ok(record),
        // Conflict path: the row already existed
        None => get_job(pool, job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {} vanished during insert", job_id)),
    }
}

/// Get a job by id
pub async fn get_job(pool: &PgPool, job_id: &str) -> Result<Option<JobRecord>> {
    let record = sqlx::query_as::<_, JobRecord>(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM valuation_jobs
        WHERE id = $1
        "#
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Write completion payload and view link. Returns true when the row newly
/// transitioned; already-terminal rows are untouched.
pub async fn complete_job(
    pool: &PgPool,
    job_id: &str,
    payload: &Value,
    view_url: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE valuation_jobs
        SET status = 'completed', response_payload = $2, view_url = $3, updated_at = NOW()
        WHERE id = $1 AND status NOT IN ('completed', 'failed', 'error')
        "#,
    )
    .bind(job_id)
    .bind(payload)
    .bind(view_url)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record an externally-reported failure. Same idempotency contract as
/// `complete_job`.
pub async fn fail_job(pool: &PgPool, job_id: &str, error: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE valuation_jobs
        SET status = 'failed', error = $2, updated_at = NOW()
        WHERE id = $1 AND status NOT IN ('completed', 'failed', 'error')
        "#,
    )
    .bind(job_id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
