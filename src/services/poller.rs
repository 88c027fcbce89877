//! Job polling state machine
//!
//! One poll per job id: `Idle → Polling → {Completed, Failed, TimedOut,
//! Stopped}`. The poller owns every piece of shared mutable state in the
//! async flow: the per-job timer task, a generation counter that discards
//! stale in-flight results after cancellation, and the terminal-status cache
//! that makes duplicate terminal observations a no-op.
//!
//! Checks run on `tokio::time`, so tests drive the whole machine under
//! `start_paused` simulated time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::defaults::{POLL_CEILING_SECS, POLL_INITIAL_DELAY_SECS, POLL_INTERVAL_SECS};
use crate::error::ValuationError;
use crate::services::normalizer;
use crate::services::store::JobStore;
use crate::types::{JobState, NormalizedReport};

// ==========================================================================
// Tests First (TDD)
// ==========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    use crate::services::store::MemoryJobStore;
    use crate::types::{JobRecord, ValuationRequest};

    /// Store serving a fixed sequence of snapshots, repeating the last one.
    /// Counts reads so tests can assert polling actually stopped.
    struct ScriptedStore {
        snapshots: Vec<JobRecord>,
        reads: AtomicU32,
    }

    impl ScriptedStore {
        fn new(snapshots: Vec<JobRecord>) -> Self {
            Self {
                snapshots,
                reads: AtomicU32::new(0),
            }
        }

        fn reads(&self) -> u32 {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobStore for ScriptedStore {
        async fn create(&self, job_id: &str, _request: &ValuationRequest) -> anyhow::Result<JobRecord> {
            Ok(MemoryJobStore::record(job_id, JobState::Pending, None))
        }

        async fn get(&self, _job_id: &str) -> anyhow::Result<Option<JobRecord>> {
            let index = self.reads.fetch_add(1, Ordering::SeqCst) as usize;
            let index = index.min(self.snapshots.len().saturating_sub(1));
            Ok(self.snapshots.get(index).cloned())
        }

        async fn complete(&self, _job_id: &str, _payload: &serde_json::Value, _view_url: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn fail(&self, _job_id: &str, _error: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn poller_with(store: Arc<dyn JobStore>) -> Arc<JobPoller> {
        Arc::new(JobPoller::new(store, PollerConfig::default()))
    }

    fn counting_callback(fired: &Arc<AtomicU32>) -> PollCallback {
        let fired = Arc::clone(fired);
        Box::new(move |_outcome| {
            fired.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn completed_job_fires_callback_with_report() {
        let payload = json!({ "activeListings": [ { "address": "1 Ash Ct" } ] });
        let store = Arc::new(ScriptedStore::new(vec![MemoryJobStore::record(
            "abc",
            JobState::Completed,
            Some(payload),
        )]));
        let poller = poller_with(Arc::clone(&store) as Arc<dyn JobStore>);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let started = Instant::now();
        poller.start_polling("abc", Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));

        match rx.await.unwrap() {
            PollOutcome::Completed(report) => assert_eq!(report.active_listings.len(), 1),
            other => panic!("expected Completed, got {:?}", other),
        }
        // First check happens after the short initial delay
        assert_eq!(started.elapsed().as_secs(), POLL_INITIAL_DELAY_SECS);
        assert!(!poller.is_polling("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_then_poll_end_to_end_timing() {
        // First poll (~2s): still processing, no payload. Second (~7s): done.
        let payload = json!({
            "activeListings": [ { "address": "1 Ash Ct" }, { "address": "2 Ash Ct" } ],
            "recentSales": [],
            "pricingStrategy": { "PricingStrategy": [ { "name": "Market" } ] },
        });
        let store = Arc::new(ScriptedStore::new(vec![
            MemoryJobStore::record("abc", JobState::Processing, None),
            MemoryJobStore::record("abc", JobState::Completed, Some(payload)),
        ]));
        let poller = poller_with(Arc::clone(&store) as Arc<dyn JobStore>);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let started = Instant::now();
        poller.start_polling("abc", Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));

        match rx.await.unwrap() {
            PollOutcome::Completed(report) => assert_eq!(report.active_listings.len(), 2),
            other => panic!("expected Completed, got {:?}", other),
        }
        assert_eq!(store.reads(), 2);
        assert_eq!(
            started.elapsed().as_secs(),
            POLL_INITIAL_DELAY_SECS + POLL_INTERVAL_SECS
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_fires_error_with_producer_message() {
        let mut record = MemoryJobStore::record("abc", JobState::Failed, None);
        record.error = Some("No comparables in this area".to_string());
        let store = Arc::new(ScriptedStore::new(vec![record]));
        let poller = poller_with(store as Arc<dyn JobStore>);

        let (tx, rx) = tokio::sync::oneshot::channel();
        poller.start_polling("abc", Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));

        match rx.await.unwrap() {
            PollOutcome::Failed(ValuationError::JobFailed(message)) => {
                assert!(message.contains("No comparables"));
            }
            other => panic!("expected JobFailed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_without_message_uses_generic_text() {
        let store = Arc::new(ScriptedStore::new(vec![MemoryJobStore::record(
            "abc",
            JobState::Error,
            None,
        )]));
        let poller = poller_with(store as Arc<dyn JobStore>);

        let (tx, rx) = tokio::sync::oneshot::channel();
        poller.start_polling("abc", Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));

        match rx.await.unwrap() {
            PollOutcome::Failed(ValuationError::JobFailed(message)) => {
                assert_eq!(message, crate::error::GENERIC_FAILURE_MESSAGE);
            }
            other => panic!("expected JobFailed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_job_times_out_and_polling_ceases() {
        let store = Arc::new(ScriptedStore::new(vec![MemoryJobStore::record(
            "abc",
            JobState::Processing,
            None,
        )]));
        let poller = poller_with(Arc::clone(&store) as Arc<dyn JobStore>);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let started = Instant::now();
        poller.start_polling("abc", Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));

        assert!(matches!(
            rx.await.unwrap(),
            PollOutcome::Failed(ValuationError::Timeout)
        ));
        assert!(started.elapsed() >= Duration::from_secs(POLL_CEILING_SECS));

        // No further status reads once the timeout has fired
        let reads_at_timeout = store.reads();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(store.reads(), reads_at_timeout);
        assert!(!poller.is_polling("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_polling_silences_all_callbacks() {
        let store = Arc::new(ScriptedStore::new(vec![MemoryJobStore::record(
            "abc",
            JobState::Processing,
            None,
        )]));
        let poller = poller_with(Arc::clone(&store) as Arc<dyn JobStore>);

        let fired = Arc::new(AtomicU32::new(0));
        poller.start_polling("abc", counting_callback(&fired));

        // Let the first check happen, then stop
        sleep(Duration::from_secs(3)).await;
        assert_eq!(store.reads(), 1);
        poller.stop_polling("abc");

        // Advance well past the ceiling: nothing may fire, nothing may poll
        sleep(Duration::from_secs(700)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(store.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_terminal_observation_fires_exactly_once() {
        let payload = json!({ "activeListings": [] });
        let store = Arc::new(MemoryJobStore::new());
        store.put(MemoryJobStore::record("abc", JobState::Completed, Some(payload)));
        let poller = poller_with(Arc::clone(&store) as Arc<dyn JobStore>);

        let fired = Arc::new(AtomicU32::new(0));
        poller.start_polling("abc", counting_callback(&fired));
        sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Duplicate delivery: same job id reaches a terminal state again
        poller.start_polling("abc", counting_callback(&fired));
        sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_cancels_existing_timer_for_same_job() {
        let store = Arc::new(MemoryJobStore::new());
        store.put(MemoryJobStore::record("abc", JobState::Processing, None));
        let poller = poller_with(Arc::clone(&store) as Arc<dyn JobStore>);

        let fired = Arc::new(AtomicU32::new(0));
        poller.start_polling("abc", counting_callback(&fired));
        poller.start_polling("abc", counting_callback(&fired));

        sleep(Duration::from_secs(1)).await;
        store.put(MemoryJobStore::record(
            "abc",
            JobState::Completed,
            Some(json!({ "activeListings": [] })),
        ));
        sleep(Duration::from_secs(10)).await;

        // Only the second poll's callback may fire
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!poller.is_polling("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_poll_does_not_poison_idempotency_cache() {
        let store = Arc::new(MemoryJobStore::new());
        store.put(MemoryJobStore::record("abc", JobState::Processing, None));
        let poller = poller_with(Arc::clone(&store) as Arc<dyn JobStore>);

        let fired = Arc::new(AtomicU32::new(0));
        poller.start_polling("abc", counting_callback(&fired));
        sleep(Duration::from_secs(3)).await;
        poller.stop_polling("abc");

        // A fresh poll after Stopped must still be able to complete
        store.put(MemoryJobStore::record(
            "abc",
            JobState::Completed,
            Some(json!({ "activeListings": [] })),
        ));
        poller.start_polling("abc", counting_callback(&fired));
        sleep(Duration::from_secs(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_row_keeps_polling_until_it_appears() {
        let store = Arc::new(MemoryJobStore::new());
        let poller = poller_with(Arc::clone(&store) as Arc<dyn JobStore>);

        let (tx, rx) = tokio::sync::oneshot::channel();
        poller.start_polling("abc", Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));

        // Callback row lands late, after a few empty reads
        sleep(Duration::from_secs(15)).await;
        store.put(MemoryJobStore::record(
            "abc",
            JobState::Completed,
            Some(json!({ "activeListings": [] })),
        ));

        assert!(matches!(rx.await.unwrap(), PollOutcome::Completed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_status_with_null_payload_keeps_polling() {
        let store = Arc::new(MemoryJobStore::new());
        store.put(MemoryJobStore::record(
            "abc",
            JobState::Completed,
            Some(serde_json::Value::Null),
        ));
        let poller = poller_with(Arc::clone(&store) as Arc<dyn JobStore>);

        let fired = Arc::new(AtomicU32::new(0));
        poller.start_polling("abc", counting_callback(&fired));
        sleep(Duration::from_secs(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(poller.is_polling("abc"));
        poller.stop_all();
    }
}

// ==========================================================================
// Implementation
// ==========================================================================

/// Terminal result delivered to the registered callback, exactly once.
/// Timeouts arrive as `Failed(ValuationError::Timeout)`.
#[derive(Debug)]
pub enum PollOutcome {
    Completed(NormalizedReport),
    Failed(ValuationError),
}

/// Callback invoked on the terminal transition. Runs inside the poll task;
/// anything async (status publishes) should be spawned from it.
pub type PollCallback = Box<dyn FnOnce(PollOutcome) + Send + 'static>;

/// Which terminal state already fired for a job id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminalKind {
    Completed,
    Failed,
    TimedOut,
}

/// Poll cadence and ceiling
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// First check delay; covers near-immediate completions
    pub initial_delay: Duration,
    /// Fixed cadence of subsequent checks
    pub interval: Duration,
    /// Wall-clock ceiling before the job is declared timed out
    pub ceiling: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(POLL_INITIAL_DELAY_SECS),
            interval: Duration::from_secs(POLL_INTERVAL_SECS),
            ceiling: Duration::from_secs(POLL_CEILING_SECS),
        }
    }
}

struct ActivePoll {
    generation: u64,
    token: CancellationToken,
}

/// Owns all polling state: one timer task per job id, the generation counter
/// guarding stale results, and the terminal-status idempotency cache.
pub struct JobPoller {
    store: Arc<dyn JobStore>,
    config: PollerConfig,
    active: Mutex<HashMap<String, ActivePoll>>,
    fired: Mutex<HashMap<String, TerminalKind>>,
    generation: AtomicU64,
}

impl JobPoller {
    pub fn new(store: Arc<dyn JobStore>, config: PollerConfig) -> Self {
        Self {
            store,
            config,
            active: Mutex::new(HashMap::new()),
            fired: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Begin polling a job. Any existing timer for the same id is cancelled
    /// first; no two pollers for one job id run concurrently.
    pub fn start_polling(self: &Arc<Self>, job_id: &str, callback: PollCallback) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();

        {
            let mut active = self.active.lock();
            if let Some(previous) = active.insert(
                job_id.to_string(),
                ActivePoll {
                    generation,
                    token: token.clone(),
                },
            ) {
                debug!("Replacing active poll for job {}", job_id);
                previous.token.cancel();
            }
        }

        info!("Polling job {} (generation {})", job_id, generation);
        let poller = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            poller.run(job_id, generation, token, callback).await;
        });
    }

    /// Force the `Stopped` state from any non-terminal state. No further
    /// callbacks fire for this poll.
    pub fn stop_polling(&self, job_id: &str) {
        if let Some(active) = self.active.lock().remove(job_id) {
            active.token.cancel();
            info!("Stopped polling job {}", job_id);
        }
    }

    /// Cancel every active poll (flow reset / teardown)
    pub fn stop_all(&self) {
        let mut active = self.active.lock();
        for (job_id, poll) in active.drain() {
            poll.token.cancel();
            debug!("Stopped polling job {} during shutdown", job_id);
        }
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        self.active.lock().contains_key(job_id)
    }

    async fn run(
        self: Arc<Self>,
        job_id: String,
        generation: u64,
        token: CancellationToken,
        callback: PollCallback,
    ) {
        let started = Instant::now();
        let mut callback = Some(callback);

        if !wait(&token, self.config.initial_delay).await {
            return;
        }

        loop {
            if !self.is_current(&job_id, generation) {
                return;
            }

            match self.store.get(&job_id).await {
                Ok(Some(job)) => {
                    // Payload first: a non-null result completes the job
                    // regardless of what the status column says.
                    if let Some(payload) =
                        job.response_payload.clone().filter(|p| !p.is_null())
                    {
                        self.finish(&job_id, generation, TerminalKind::Completed, &mut callback, move || {
                            PollOutcome::Completed(normalizer::normalize(&payload))
                        });
                        return;
                    }

                    if matches!(job.state(), JobState::Failed | JobState::Error) {
                        let error = ValuationError::job_failed(job.error.clone());
                        self.finish(&job_id, generation, TerminalKind::Failed, &mut callback, move || {
                            PollOutcome::Failed(error)
                        });
                        return;
                    }
                }
                // The callback row can land after the handle; keep polling
                Ok(None) => debug!("Job {} not visible yet", job_id),
                // Transient read failures are retried on the next tick
                Err(e) => warn!("Status read for job {} failed: {}", job_id, e),
            }

            if started.elapsed() >= self.config.ceiling {
                warn!(
                    "Job {} still not terminal after {:?}, timing out",
                    job_id, self.config.ceiling
                );
                self.finish(&job_id, generation, TerminalKind::TimedOut, &mut callback, || {
                    PollOutcome::Failed(ValuationError::Timeout)
                });
                return;
            }

            if !wait(&token, self.config.interval).await {
                return;
            }
        }
    }

    /// Run the terminal transition: discard if this poll is stale, suppress
    /// if this job already fired, otherwise invoke the callback exactly once.
    fn finish(
        &self,
        job_id: &str,
        generation: u64,
        kind: TerminalKind,
        callback: &mut Option<PollCallback>,
        outcome: impl FnOnce() -> PollOutcome,
    ) {
        if !self.clear_if_current(job_id, generation) {
            debug!("Discarding stale {:?} result for job {}", kind, job_id);
            return;
        }
        if !self.mark_fired(job_id, kind) {
            debug!("Job {} already reached a terminal state, suppressing {:?}", job_id, kind);
            return;
        }
        info!("Job {} reached terminal state {:?}", job_id, kind);
        if let Some(callback) = callback.take() {
            callback(outcome());
        }
    }

    fn is_current(&self, job_id: &str, generation: u64) -> bool {
        self.active
            .lock()
            .get(job_id)
            .map_or(false, |poll| poll.generation == generation)
    }

    /// Remove this poll's active entry, only if it is still the current one
    fn clear_if_current(&self, job_id: &str, generation: u64) -> bool {
        let mut active = self.active.lock();
        match active.get(job_id) {
            Some(poll) if poll.generation == generation => {
                active.remove(job_id);
                true
            }
            _ => false,
        }
    }

    /// Terminal-status cache check. True exactly once per job id.
    fn mark_fired(&self, job_id: &str, kind: TerminalKind) -> bool {
        let mut fired = self.fired.lock();
        if fired.contains_key(job_id) {
            return false;
        }
        fired.insert(job_id.to_string(), kind);
        true
    }
}

/// Cancellable sleep; false when the token fired first
async fn wait(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = sleep(duration) => true,
    }
}
