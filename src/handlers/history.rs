//! Valuation history handler

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::error;
use uuid::Uuid;

use crate::services::job_history::VALUATION_HISTORY;
use crate::types::{ErrorResponse, Request, SuccessResponse};

/// Request to list recent valuations
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListHistoryRequest {
    pub limit: Option<usize>,
    pub status: Option<String>,
}

/// Handle jobs.history requests
pub async fn handle_history(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<ListHistoryRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse history request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let limit = request.payload.limit.unwrap_or(50);
        let history = match &request.payload.status {
            Some(status) => VALUATION_HISTORY.get_by_status(status, limit),
            None => VALUATION_HISTORY.get_recent(limit),
        };

        let success = SuccessResponse::new(request.id, history);
        let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
    }

    Ok(())
}
