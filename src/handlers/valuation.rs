//! Valuation flow handlers
//!
//! Four subjects make up the flow:
//! - `nestimate.valuation.submit`: forward a confirmed request; on the
//!   asynchronous route this also starts the worker-side poller, which
//!   publishes `nestimate.job.status.{id}` updates as the job progresses
//! - `nestimate.valuation.status`: client-side polling of the job row
//! - `nestimate.valuation.callback`: the external system's completion
//!   delivery; idempotent row transition + shareable-link storage
//! - `nestimate.report.view`: re-entry from a shareable link; reads the row
//!   once and returns the assembled report without any submission call

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use chrono::Utc;
use futures::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ValuationError;
use crate::services::assembler;
use crate::services::job_history::VALUATION_HISTORY;
use crate::services::map_key::MAP_KEY;
use crate::services::normalizer;
use crate::services::poller::{JobPoller, PollOutcome};
use crate::services::store::JobStore;
use crate::services::submitter::JobSubmitter;
use crate::types::{
    CallbackAck, ErrorResponse, JobRecord, JobState, JobStatusRequest, JobStatusUpdate, Request,
    SubmitOutcome, SuccessResponse, ValuationCallback, ValuationJobStatus, ValuationRequest,
    ViewReportRequest, ViewReportResponse,
};

const SUBJECT_STATUS_PREFIX: &str = "nestimate.job.status";

/// Shareable report link stored on the job row
pub fn share_link(base_url: &str, job_id: &str) -> String {
    format!("{}/report/view/{}", base_url.trim_end_matches('/'), job_id)
}

/// Where the share link redirects; the report page reads `jobId` from here
pub fn redirect_target(base_url: &str, job_id: &str) -> String {
    format!("{}/?jobId={}", base_url.trim_end_matches('/'), job_id)
}

/// Publish a status update on the job's status subject
pub async fn publish_status(client: &Client, update: &JobStatusUpdate) -> Result<()> {
    let subject = format!("{}.{}", SUBJECT_STATUS_PREFIX, update.job_id);
    let payload = serde_json::to_vec(update)?;
    client.publish(subject, payload.into()).await?;
    Ok(())
}

/// Map a job row to the status reported to the frontend
fn status_of(job: &JobRecord) -> ValuationJobStatus {
    if let Some(payload) = job.response_payload.as_ref().filter(|p| !p.is_null()) {
        return ValuationJobStatus::Completed {
            report: normalizer::normalize(payload),
        };
    }
    match job.state() {
        JobState::Failed | JobState::Error => ValuationJobStatus::Failed {
            error: job
                .error
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| crate::error::GENERIC_FAILURE_MESSAGE.to_string()),
        },
        JobState::Processing => ValuationJobStatus::Processing,
        _ => ValuationJobStatus::Pending,
    }
}

/// Build the view-link reply from a job row. Read-only: normalization and
/// assembly only, never a submission.
fn resolve_view(job: &JobRecord, base_url: &str) -> ViewReportResponse {
    let request: ValuationRequest =
        serde_json::from_value(job.request_payload.clone()).unwrap_or_default();

    if let Some(payload) = job.response_payload.as_ref().filter(|p| !p.is_null()) {
        let normalized = normalizer::normalize(payload);
        let mut report = assembler::assemble(&normalized, &request.address, &request.edited_fields);
        report.view_url = job
            .view_url
            .clone()
            .or_else(|| Some(share_link(base_url, &job.id)));
        return ViewReportResponse {
            job_id: job.id.clone(),
            status: JobState::Completed.as_str().to_string(),
            redirect_url: redirect_target(base_url, &job.id),
            report: Some(report),
            error: None,
        };
    }

    let state = job.state();
    ViewReportResponse {
        job_id: job.id.clone(),
        status: state.as_str().to_string(),
        redirect_url: redirect_target(base_url, &job.id),
        report: None,
        error: match state {
            JobState::Failed | JobState::Error => Some(
                job.error
                    .clone()
                    .unwrap_or_else(|| crate::error::GENERIC_FAILURE_MESSAGE.to_string()),
            ),
            _ => None,
        },
    }
}

// ==========================================================================
// Submit
// ==========================================================================

/// Handle valuation.submit requests
pub async fn handle_submit(
    client: Client,
    mut subscriber: Subscriber,
    submitter: Arc<JobSubmitter>,
    poller: Arc<JobPoller>,
    base_url: String,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<ValuationRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse valuation submit request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match submitter.submit(&request.payload).await {
            Ok(outcome) => {
                if let SubmitOutcome::Queued { job_id } = &outcome {
                    start_status_polling(
                        &client,
                        &poller,
                        job_id,
                        request.payload.address.display(),
                        &base_url,
                    );
                }
                let success = SuccessResponse::new(request.id, outcome);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            // Business rejection, not an error reply; the frontend shows
            // its trial modal off this outcome
            Err(ValuationError::TrialLimit { display_name }) => {
                let outcome = SubmitOutcome::TrialLimitReached { display_name };
                let success = SuccessResponse::new(request.id, outcome);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                warn!("Valuation submit failed: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Wire the poller's terminal callback to status publishing and history
fn start_status_polling(
    client: &Client,
    poller: &Arc<JobPoller>,
    job_id: &str,
    address: String,
    base_url: &str,
) {
    let client = client.clone();
    let job_id_owned = job_id.to_string();
    let view_url = share_link(base_url, job_id);
    let started_at = Utc::now();

    poller.start_polling(job_id, Box::new(move |outcome| {
        let address = if address.is_empty() { None } else { Some(address) };
        let status = match outcome {
            PollOutcome::Completed(report) => {
                VALUATION_HISTORY.record_completed(
                    &job_id_owned,
                    address,
                    started_at,
                    Some(view_url),
                );
                ValuationJobStatus::Completed { report }
            }
            PollOutcome::Failed(ValuationError::Timeout) => {
                VALUATION_HISTORY.record_timed_out(&job_id_owned, address, started_at);
                ValuationJobStatus::TimedOut
            }
            PollOutcome::Failed(error) => {
                // Surface the producer's own text when there is one
                let message = match error {
                    ValuationError::JobFailed(message) => message,
                    other => other.to_string(),
                };
                VALUATION_HISTORY.record_failed(&job_id_owned, address, started_at, message.clone());
                ValuationJobStatus::Failed { error: message }
            }
        };

        let update = JobStatusUpdate::new(job_id_owned, status);
        tokio::spawn(async move {
            if let Err(e) = publish_status(&client, &update).await {
                warn!("Failed to publish status for job {}: {}", update.job_id, e);
            }
        });
    }));
}

// ==========================================================================
// Status (client-side polling path)
// ==========================================================================

/// Handle valuation.status requests
pub async fn handle_status(
    client: Client,
    mut subscriber: Subscriber,
    store: Arc<dyn JobStore>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<JobStatusRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse job status request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let job_id = &request.payload.job_id;
        match store.get(job_id).await {
            Ok(Some(job)) => {
                let update = JobStatusUpdate::new(job.id.clone(), status_of(&job));
                let success = SuccessResponse::new(request.id, update);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Ok(None) => {
                let error = ErrorResponse::new(
                    request.id,
                    "NOT_FOUND",
                    format!("No valuation job with id {}", job_id),
                );
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
            Err(e) => {
                error!("Failed to read job {}: {}", job_id, e);
                let error = ErrorResponse::new(request.id, "TRANSPORT_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

// ==========================================================================
// Callback (completion delivery from the external system)
// ==========================================================================

/// Handle valuation.callback deliveries. Idempotent: a second delivery for an
/// already-terminal job acknowledges with `updated: false` and changes
/// nothing.
pub async fn handle_callback(
    client: Client,
    mut subscriber: Subscriber,
    store: Arc<dyn JobStore>,
    base_url: String,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<ValuationCallback> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse valuation callback: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let callback = request.payload;
        let job_id = callback.job_id.clone();

        let result = if let Some(error_text) = callback.error.filter(|m| !m.trim().is_empty()) {
            store.fail(&job_id, &error_text).await.map(|updated| CallbackAck {
                job_id: job_id.clone(),
                updated,
                view_url: None,
            })
        } else if let Some(payload) = callback.response_payload.filter(|p| !p.is_null()) {
            let view_url = share_link(&base_url, &job_id);
            store
                .complete(&job_id, &payload, &view_url)
                .await
                .map(|updated| CallbackAck {
                    job_id: job_id.clone(),
                    updated,
                    view_url: Some(view_url),
                })
        } else {
            let error = ErrorResponse::new(
                request.id,
                "INVALID_REQUEST",
                "Callback carried neither a response payload nor an error",
            );
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        };

        match result {
            Ok(ack) => {
                if ack.updated {
                    info!("Job {} transitioned via callback", job_id);
                } else {
                    info!("Duplicate callback for job {} ignored", job_id);
                }
                let success = SuccessResponse::new(request.id, ack);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Failed to record callback for job {}: {}", job_id, e);
                let error = ErrorResponse::new(request.id, "TRANSPORT_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

// ==========================================================================
// View (shareable link re-entry)
// ==========================================================================

/// Handle report.view requests
pub async fn handle_view(
    client: Client,
    mut subscriber: Subscriber,
    store: Arc<dyn JobStore>,
    base_url: String,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<ViewReportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse view report request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let job_id = &request.payload.job_id;
        match store.get(job_id).await {
            Ok(Some(job)) => {
                let response = resolve_view(&job, &base_url);
                let success = SuccessResponse::new(request.id, response);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Ok(None) => {
                let error = ErrorResponse::new(
                    request.id,
                    "NOT_FOUND",
                    format!("No valuation job with id {}", job_id),
                );
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
            Err(e) => {
                error!("Failed to read job {}: {}", job_id, e);
                let error = ErrorResponse::new(request.id, "TRANSPORT_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

// ==========================================================================
// Map key (server-side secret lookup)
// ==========================================================================

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct MapKeyResponse {
    api_key: String,
}

/// Handle config.mapkey requests
pub async fn handle_map_key(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request_id = extract_request_id(&msg.payload);
        match MAP_KEY.get_or_fetch() {
            Ok(api_key) => {
                let success = SuccessResponse::new(request_id, MapKeyResponse { api_key });
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Map key lookup failed: {}", e);
                let error = ErrorResponse::new(request_id, "CONFIG_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

fn extract_request_id(payload: &[u8]) -> Uuid {
    if let Ok(v) = serde_json::from_slice::<serde_json::Value>(payload) {
        if let Some(id_str) = v.get("id").and_then(|id| id.as_str()) {
            if let Ok(uuid) = Uuid::parse_str(id_str) {
                return uuid;
            }
        }
    }
    Uuid::new_v4()
}

// ==========================================================================
// Tests
// ==========================================================================
