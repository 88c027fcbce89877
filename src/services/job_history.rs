//! Valuation history service
//!
//! Stores recent valuation outcomes in memory with file-backed persistence
//! so the "previous reports" list survives worker restarts.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

const MAX_HISTORY_SIZE: usize = 100;
const HISTORY_FILE: &str = "logs/valuation-history.json";

/// One finished valuation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Opaque job id (empty for inline results)
    pub job_id: String,
    pub status: String,
    /// Display address the report was about
    pub address: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Shareable link, when one exists
    pub view_url: Option<String>,
}

/// Response for listing valuation history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub entries: Vec<HistoryEntry>,
    pub total: usize,
}

/// History storage backed by an in-memory deque + JSON file on disk
pub struct ValuationHistory {
    entries: Arc<RwLock<VecDeque<HistoryEntry>>>,
}

impl ValuationHistory {
    pub fn new() -> Self {
        let mut deque = VecDeque::with_capacity(MAX_HISTORY_SIZE);
        if let Some(loaded) = Self::load_from_disk() {
            deque.extend(loaded);
        }
        Self {
            entries: Arc::new(RwLock::new(deque)),
        }
    }

    pub fn record_completed(
        &self,
        job_id: &str,
        address: Option<String>,
        started_at: DateTime<Utc>,
        view_url: Option<String>,
    ) {
        self.add_entry(Self::entry(job_id, "completed", address, started_at, None, view_url));
    }

    pub fn record_failed(
        &self,
        job_id: &str,
        address: Option<String>,
        started_at: DateTime<Utc>,
        error: String,
    ) {
        self.add_entry(Self::entry(job_id, "failed", address, started_at, Some(error), None));
    }

    pub fn record_timed_out(
        &self,
        job_id: &str,
        address: Option<String>,
        started_at: DateTime<Utc>,
    ) {
        self.add_entry(Self::entry(job_id, "timedOut", address, started_at, None, None));
    }

    fn entry(
        job_id: &str,
        status: &str,
        address: Option<String>,
        started_at: DateTime<Utc>,
        error: Option<String>,
        view_url: Option<String>,
    ) -> HistoryEntry {
        let finished_at = Utc::now();
        HistoryEntry {
            job_id: job_id.to_string(),
            status: status.to_string(),
            address,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            error,
            view_url,
        }
    }

    fn add_entry(&self, entry: HistoryEntry) {
        let mut entries = self.entries.write();
        if entries.len() >= MAX_HISTORY_SIZE {
            entries.pop_back();
        }
        entries.push_front(entry);
        Self::save_to_disk(&entries);
    }

    /// Most recent outcomes, newest first
    pub fn get_recent(&self, limit: usize) -> HistoryResponse {
        let entries = self.entries.read();
        let items: Vec<HistoryEntry> = entries.iter().take(limit).cloned().collect();
        HistoryResponse {
            total: entries.len(),
            entries: items,
        }
    }

    pub fn get_by_status(&self, status: &str, limit: usize) -> HistoryResponse {
        let entries = self.entries.read();
        let items: Vec<HistoryEntry> = entries
            .iter()
            .filter(|e| e.status == status)
            .take(limit)
            .cloned()
            .collect();
        HistoryResponse {
            total: items.len(),
            entries: items,
        }
    }

    fn load_from_disk() -> Option<Vec<HistoryEntry>> {
        let path = Path::new(HISTORY_FILE);
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => Some(entries),
                Err(e) => {
                    warn!("Failed to parse valuation history file: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read valuation history file: {}", e);
                None
            }
        }
    }

    fn save_to_disk(entries: &VecDeque<HistoryEntry>) {
        let path = Path::new(HISTORY_FILE);
        if let Some(dir) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("Failed to create valuation history directory: {}", e);
                return;
            }
        }
        let items: Vec<&HistoryEntry> = entries.iter().collect();
        match serde_json::to_string_pretty(&items) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!("Failed to write valuation history file: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize valuation history: {}", e),
        }
    }
}

impl Default for ValuationHistory {
    fn default() -> Self {
        Self::new()
    }
}

// Global instance for easy access
lazy_static::lazy_static! {
    pub static ref VALUATION_HISTORY: ValuationHistory = ValuationHistory::new();
}
