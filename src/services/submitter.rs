//! Job submission
//!
//! Sends a confirmed valuation request to the external system and classifies
//! the immediate reply: a full inline report, an asynchronous job handle, or
//! a trial-limit rejection (`ValuationError::TrialLimit`, which the handler
//! surfaces as its own outcome, never as a transport failure). Exactly
//! one pending job row is created on the asynchronous route. Transport
//! failures are surfaced, never retried automatically; the caller decides.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::ValuationError;
use crate::services::normalizer;
use crate::services::store::JobStore;
use crate::services::webhook::ValuationBackend;
use crate::types::{SubmitOutcome, ValuationRequest};

pub struct JobSubmitter {
    backend: Arc<dyn ValuationBackend>,
    store: Arc<dyn JobStore>,
}

impl JobSubmitter {
    pub fn new(backend: Arc<dyn ValuationBackend>, store: Arc<dyn JobStore>) -> Self {
        Self { backend, store }
    }

    /// Submit a confirmed request. Address validation happened upstream;
    /// this does not re-validate.
    pub async fn submit(&self, request: &ValuationRequest) -> Result<SubmitOutcome, ValuationError> {
        let body = self.backend.submit(request).await?;

        // Trial-limit replies are plain text; check before any JSON parse.
        // This is a business rejection, not a transport failure.
        if normalizer::detect_trial_limit(&body) {
            let display_name = request.contact.display_name();
            info!("Trial limit reached for '{}'", display_name);
            return Err(ValuationError::TrialLimit { display_name });
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            warn!("Valuation service reply was neither JSON nor a trial notice: {}", e);
            ValuationError::Transport("valuation service returned an unreadable reply".to_string())
        })?;

        if let Some(job_id) = extract_job_id(&value) {
            self.store
                .create(&job_id, request)
                .await
                .map_err(|e| ValuationError::Transport(format!("could not record job: {}", e)))?;
            info!("Valuation queued as job {}", job_id);
            return Ok(SubmitOutcome::Queued { job_id });
        }

        // Inline answer: normalize and hand back directly
        Ok(SubmitOutcome::Immediate {
            report: normalizer::normalize(&value),
        })
    }
}

/// Pull an async job handle out of the reply, tolerating the array envelope
fn extract_job_id(value: &Value) -> Option<String> {
    let obj = match value {
        Value::Object(obj) => obj,
        Value::Array(items) => items.first()?.as_object()?,
        _ => return None,
    };
    obj.get("jobId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::services::store::MemoryJobStore;
    use crate::types::{ContactInfo, JobState};

    /// Backend replying with a canned body, counting calls
    struct CannedBackend {
        body: Result<String, String>,
        calls: AtomicU32,
    }

    impl CannedBackend {
        fn ok(body: &str) -> Self {
            Self {
                body: Ok(body.to_string()),
                calls: AtomicU32::new(0),
            }
        }

        fn transport_error(message: &str) -> Self {
            Self {
                body: Err(message.to_string()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ValuationBackend for CannedBackend {
        async fn submit(&self, _request: &ValuationRequest) -> Result<String, ValuationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.body {
                Ok(body) => Ok(body.clone()),
                Err(message) => Err(ValuationError::Transport(message.clone())),
            }
        }

        fn name(&self) -> &'static str {
            "canned"
        }
    }

    fn request_from(first_name: &str) -> ValuationRequest {
        ValuationRequest {
            contact: ContactInfo {
                first_name: Some(first_name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn submitter(backend: Arc<CannedBackend>) -> (JobSubmitter, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::new());
        (
            JobSubmitter::new(backend, Arc::clone(&store) as Arc<dyn JobStore>),
            store,
        )
    }

    #[tokio::test]
    async fn submit_full_body_yields_immediate_report() {
        let backend = Arc::new(CannedBackend::ok(
            r#"{"activeListings":[{"address":"1 Ash Ct"}],"recentSales":[]}"#,
        ));
        let (submitter, store) = submitter(Arc::clone(&backend));

        let outcome = submitter.submit(&request_from("Dana")).await.unwrap();

        match outcome {
            SubmitOutcome::Immediate { report } => {
                assert!(report.success);
                assert_eq!(report.active_listings.len(), 1);
            }
            other => panic!("expected Immediate, got {:?}", other),
        }
        // No job row for inline answers
        assert!(store.get("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn submit_job_handle_creates_pending_row() {
        let backend = Arc::new(CannedBackend::ok(r#"{"jobId":"abc"}"#));
        let (submitter, store) = submitter(backend);

        let outcome = submitter.submit(&request_from("Dana")).await.unwrap();

        match outcome {
            SubmitOutcome::Queued { job_id } => assert_eq!(job_id, "abc"),
            other => panic!("expected Queued, got {:?}", other),
        }
        let row = store.get("abc").await.unwrap().unwrap();
        assert_eq!(row.state(), JobState::Pending);
    }

    #[tokio::test]
    async fn submit_trial_limit_text_is_not_a_parse_error() {
        let backend = Arc::new(CannedBackend::ok(
            "Sorry, you have reached your free trial limit of 3 reports.",
        ));
        let (submitter, _store) = submitter(backend);

        let err = submitter.submit(&request_from("Dana")).await.unwrap_err();

        match err {
            ValuationError::TrialLimit { display_name } => {
                assert_eq!(display_name, "Dana");
            }
            other => panic!("expected TrialLimit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn submit_transport_error_is_not_retried() {
        let backend = Arc::new(CannedBackend::transport_error("connection refused"));
        let (submitter, _store) = submitter(Arc::clone(&backend));

        let err = submitter.submit(&request_from("Dana")).await.unwrap_err();

        assert!(matches!(err, ValuationError::Transport(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn submit_unreadable_reply_is_transport_error() {
        let backend = Arc::new(CannedBackend::ok("<html>502 Bad Gateway</html>"));
        let (submitter, _store) = submitter(backend);

        let err = submitter.submit(&request_from("Dana")).await.unwrap_err();
        assert!(matches!(err, ValuationError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn queued_submission_polls_to_completion() {
        use crate::services::poller::{JobPoller, PollOutcome, PollerConfig};
        use std::time::Duration;

        let backend = Arc::new(CannedBackend::ok(r#"{"jobId":"abc"}"#));
        let store = Arc::new(MemoryJobStore::new());
        let submitter = JobSubmitter::new(
            Arc::clone(&backend) as Arc<dyn ValuationBackend>,
            Arc::clone(&store) as Arc<dyn JobStore>,
        );

        let job_id = match submitter.submit(&request_from("Dana")).await.unwrap() {
            SubmitOutcome::Queued { job_id } => job_id,
            other => panic!("expected Queued, got {:?}", other),
        };

        let poller = Arc::new(JobPoller::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            PollerConfig::default(),
        ));
        let (tx, rx) = tokio::sync::oneshot::channel();
        poller.start_polling(&job_id, Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));

        // The external callback lands while the poller is waiting
        tokio::time::sleep(Duration::from_secs(3)).await;
        let payload = serde_json::json!({
            "activeListings": [ { "address": "1 Ash Ct" } ],
            "recentSales": [],
        });
        assert!(store
            .complete(&job_id, &payload, "https://nestimate.io/report/view/abc")
            .await
            .unwrap());

        match rx.await.unwrap() {
            PollOutcome::Completed(report) => assert_eq!(report.active_listings.len(), 1),
            other => panic!("expected Completed, got {:?}", other),
        }
        // Completion never re-submits
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn extract_job_id_tolerates_array_envelope() {
        let value: Value = serde_json::from_str(r#"[{"jobId":"xyz"}]"#).unwrap();
        assert_eq!(extract_job_id(&value).as_deref(), Some("xyz"));

        let value: Value = serde_json::from_str(r#"{"jobId":""}"#).unwrap();
        assert_eq!(extract_job_id(&value), None);
    }
}
