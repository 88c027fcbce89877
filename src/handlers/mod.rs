//! NATS message handlers

pub mod history;
pub mod ping;
pub mod valuation;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use sqlx::PgPool;
use tokio::select;
use tracing::{error, info};

use crate::config::Config;
use crate::services::poller::{JobPoller, PollerConfig};
use crate::services::store::{JobStore, PgJobStore};
use crate::services::submitter::JobSubmitter;
use crate::services::webhook::{create_backend, ValuationBackend};

/// Start all message handlers
pub async fn start_handlers(client: Client, pool: PgPool, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    // Shared core services
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));
    let backend: Arc<dyn ValuationBackend> =
        Arc::from(create_backend(config.webhook_url.as_deref()));
    info!("Valuation backend initialized: {}", backend.name());

    let submitter = Arc::new(JobSubmitter::new(backend, Arc::clone(&store)));
    let poller = Arc::new(JobPoller::new(Arc::clone(&store), PollerConfig::default()));
    let poller_shutdown = Arc::clone(&poller);

    // Subscribe to all subjects
    let ping_sub = client.subscribe("nestimate.ping").await?;
    let submit_sub = client.subscribe("nestimate.valuation.submit").await?;
    let status_sub = client.subscribe("nestimate.valuation.status").await?;
    let callback_sub = client.subscribe("nestimate.valuation.callback").await?;
    let view_sub = client.subscribe("nestimate.report.view").await?;
    let map_key_sub = client.subscribe("nestimate.config.mapkey").await?;
    let history_sub = client.subscribe("nestimate.jobs.history").await?;

    info!("Subscribed to NATS subjects");

    // Clone for each handler
    let client_ping = client.clone();
    let client_submit = client.clone();
    let client_status = client.clone();
    let client_callback = client.clone();
    let client_view = client.clone();
    let client_map_key = client.clone();
    let client_history = client.clone();

    let store_status = Arc::clone(&store);
    let store_callback = Arc::clone(&store);
    let store_view = Arc::clone(&store);

    let base_url_submit = config.public_base_url.clone();
    let base_url_callback = config.public_base_url.clone();
    let base_url_view = config.public_base_url.clone();

    // Spawn handlers
    let ping_handle = tokio::spawn(async move {
        ping::handle_ping(client_ping, ping_sub).await
    });

    let submit_handle = tokio::spawn(async move {
        valuation::handle_submit(client_submit, submit_sub, submitter, poller, base_url_submit).await
    });

    let status_handle = tokio::spawn(async move {
        valuation::handle_status(client_status, status_sub, store_status).await
    });

    let callback_handle = tokio::spawn(async move {
        valuation::handle_callback(client_callback, callback_sub, store_callback, base_url_callback).await
    });

    let view_handle = tokio::spawn(async move {
        valuation::handle_view(client_view, view_sub, store_view, base_url_view).await
    });

    let map_key_handle = tokio::spawn(async move {
        valuation::handle_map_key(client_map_key, map_key_sub).await
    });

    let history_handle = tokio::spawn(async move {
        history::handle_history(client_history, history_sub).await
    });

    info!("All handlers started, waiting for messages...");

    // Wait for any handler to finish (which means an error occurred)
    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = submit_handle => {
            error!("Valuation submit handler finished: {:?}", result);
        }
        result = status_handle => {
            error!("Valuation status handler finished: {:?}", result);
        }
        result = callback_handle => {
            error!("Valuation callback handler finished: {:?}", result);
        }
        result = view_handle => {
            error!("Report view handler finished: {:?}", result);
        }
        result = map_key_handle => {
            error!("Map key handler finished: {:?}", result);
        }
        result = history_handle => {
            error!("History handler finished: {:?}", result);
        }
    }

    // Tearing down; no poll may fire a callback after this point
    poller_shutdown.stop_all();

    Ok(())
}
