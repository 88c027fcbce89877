//! Valuation job types
//!
//! A job row is created when the external automation system answers a
//! submission with a `{jobId}` handle instead of a full report. The external
//! system's callback later writes the result into the same row; the poller
//! and the client-side status path both read it by id.
//!
//! Job ids are opaque strings issued by the external system, not UUIDs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::report::{NormalizedReport, ReportData};

// ==========================================================================
// Tests First (TDD)
// ==========================================================================


// ==========================================================================
// Implementation
// ==========================================================================

/// Job lifecycle states, stored as text in the `valuation_jobs` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Failure recorded on our side (as opposed to reported by the producer)
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Error => "error",
        }
    }

    /// Lenient parse: unknown values read as `Pending` so a newer producer
    /// cannot crash an older worker.
    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => JobState::Processing,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            "error" => JobState::Error,
            _ => JobState::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Error
        )
    }
}

/// One row of the `valuation_jobs` table
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Opaque id issued by the external automation system
    pub id: String,
    pub status: String,
    /// Snapshot of the submitted `ValuationRequest`
    pub request_payload: serde_json::Value,
    /// External-shaped result, written by the callback handler
    pub response_payload: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Human-shareable report link, stored at completion time
    pub view_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn state(&self) -> JobState {
        JobState::parse(&self.status)
    }
}

/// Result of submitting a valuation request to the external system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SubmitOutcome {
    /// The external system answered inline with a full report
    #[serde(rename_all = "camelCase")]
    Immediate { report: NormalizedReport },
    /// The external system will answer asynchronously; poll the job
    #[serde(rename_all = "camelCase")]
    Queued { job_id: String },
    /// Usage cap hit; must not be retried
    #[serde(rename_all = "camelCase")]
    TrialLimitReached { display_name: String },
}

/// Status of a valuation job as reported to the frontend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ValuationJobStatus {
    #[serde(rename_all = "camelCase")]
    Pending,
    #[serde(rename_all = "camelCase")]
    Processing,
    #[serde(rename_all = "camelCase")]
    Completed { report: NormalizedReport },
    #[serde(rename_all = "camelCase")]
    Failed { error: String },
    #[serde(rename_all = "camelCase")]
    TimedOut,
}

/// A status update message published to the job status subject
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusUpdate {
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: ValuationJobStatus,
}

impl JobStatusUpdate {
    pub fn new(job_id: String, status: ValuationJobStatus) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            status,
        }
    }
}

/// Completion delivery from the external automation system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationCallback {
    pub job_id: String,
    #[serde(default)]
    pub response_payload: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Acknowledgement returned to the callback bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAck {
    pub job_id: String,
    /// False when the job was already terminal (duplicate delivery)
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_url: Option<String>,
}

/// Request to read a job's current status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusRequest {
    pub job_id: String,
}

/// Request to view an existing report by its shareable link id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewReportRequest {
    pub job_id: String,
}

/// Reply for the view-link flow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewReportResponse {
    pub job_id: String,
    pub status: String,
    /// Where `/report/view/{jobId}` sends the browser; the report page
    /// reads `jobId` from this URL's query string
    pub redirect_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
