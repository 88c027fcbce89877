//! Valuation backend abstraction
//!
//! The external automation system is an opaque collaborator reached over
//! HTTP. Behind this trait so the submit flow can be exercised without the
//! network:
//! - `WebhookBackend` posts to the real endpoint (production)
//! - `MockBackend` answers deterministically (tests, local development)
//!
//! Configuration via VALUATION_BACKEND env variable:
//! - "mock" → MockBackend
//! - "webhook" → WebhookBackend (requires WEBHOOK_URL)

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::defaults::WEBHOOK_TIMEOUT_SECS;
use crate::error::ValuationError;
use crate::types::ValuationRequest;

/// One raw reply from the external system. The body may be a full report, a
/// `{jobId}` handle, or a plain-text trial-limit message; the submitter
/// decides which.
#[async_trait]
pub trait ValuationBackend: Send + Sync {
    async fn submit(&self, request: &ValuationRequest) -> Result<String, ValuationError>;

    /// Get the name of this backend implementation
    fn name(&self) -> &'static str;
}

// ==========================================================================
// WebhookBackend Implementation
// ==========================================================================

/// HTTP backend posting to the external automation webhook
pub struct WebhookBackend {
    url: String,
    client: reqwest::Client,
}

impl WebhookBackend {
    pub fn new(url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Nestimate/1.0 (https://nestimate.io)")
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            url: url.to_string(),
            client,
        }
    }
}

#[async_trait]
impl ValuationBackend for WebhookBackend {
    async fn submit(&self, request: &ValuationRequest) -> Result<String, ValuationError> {
        let response = self.client.post(&self.url).json(request).send().await?;

        let status = response.status();
        let body = response.text().await?;

        // Trial-limit rejections have shipped with non-2xx codes; let the
        // submitter classify the body before treating this as transport.
        if !status.is_success() && !crate::services::normalizer::detect_trial_limit(&body) {
            return Err(ValuationError::Transport(format!(
                "valuation service returned HTTP {}",
                status.as_u16()
            )));
        }

        Ok(body)
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

// ==========================================================================
// MockBackend Implementation
// ==========================================================================

/// Deterministic backend for tests and offline development. Every request
/// gets an inline report with one comparable derived from the address, so
/// the full submit path works without the external system.
pub struct MockBackend;

impl MockBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValuationBackend for MockBackend {
    async fn submit(&self, request: &ValuationRequest) -> Result<String, ValuationError> {
        let address = &request.address;
        let body = json!({
            "success": true,
            "subjectProperty": {
                "address": address.street,
                "city": address.city,
                "state": address.state,
                "zip": address.zip,
            },
            "activeListings": [
                { "address": format!("Near {}", address.display()), "price": 495_000, "beds": 3, "baths": 2 },
            ],
            "recentSales": [],
            "editFields3": { "medianListPrice": 495_000, "averageDaysOnMarket": 28 },
            "pricingStrategy": { "PricingStrategy": [
                { "name": "Market", "price": 495_000, "pros": ["Typical time on market"], "cons": [] },
            ]},
        });
        Ok(body.to_string())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ==========================================================================
// Factory function
// ==========================================================================

/// Create a backend based on the VALUATION_BACKEND environment variable,
/// falling back to the mock when no webhook URL is configured.
pub fn create_backend(webhook_url: Option<&str>) -> Box<dyn ValuationBackend> {
    let backend = std::env::var("VALUATION_BACKEND").unwrap_or_default();

    match (backend.as_str(), webhook_url) {
        ("mock", _) => {
            tracing::info!("Using MockBackend");
            Box::new(MockBackend::new())
        }
        (_, Some(url)) => {
            tracing::info!("Using WebhookBackend at {}", url);
            Box::new(WebhookBackend::new(url))
        }
        (_, None) => {
            tracing::warn!("WEBHOOK_URL not configured, using MockBackend");
            Box::new(MockBackend::new())
        }
    }
}
