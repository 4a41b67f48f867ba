//! Narrative history consulted by the growth tracker and anomaly monitor.
//!
//! Only narratives that passed the pipeline are recorded.

use crate::error::{MeaningError, MeaningResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

const TREE_NAME: &str = "narratives";

/// Records kept by a history store unless configured otherwise.
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeRecord {
    pub recorded_at: DateTime<Utc>,
    pub best_id: Option<String>,
    pub score: f64,
    pub intent_text: String,
    pub growth_text: String,
}

pub trait NarrativeHistory: Send + Sync {
    /// Up to `limit` records, newest first.
    fn recent(&self, limit: usize) -> MeaningResult<Vec<NarrativeRecord>>;

    fn record(&self, entry: &NarrativeRecord) -> MeaningResult<()>;
}

/// Bounded in-process history.
#[derive(Debug)]
pub struct InMemoryHistory {
    entries: Mutex<VecDeque<NarrativeRecord>>,
    capacity: usize,
}

impl InMemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl NarrativeHistory for InMemoryHistory {
    fn recent(&self, limit: usize) -> MeaningResult<Vec<NarrativeRecord>> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    fn record(&self, entry: &NarrativeRecord) -> MeaningResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.push_back(entry.clone());
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        Ok(())
    }
}

/// Sled-backed history. Keys are a zero-padded millisecond timestamp followed by a uuid,
/// so lexical order is chronological; values are JSON. The oldest records are pruned once
/// the tree holds more than `capacity`.
pub struct SledHistory {
    tree: sled::Tree,
    capacity: usize,
}

impl SledHistory {
    pub fn open<P: AsRef<Path>>(path: P) -> MeaningResult<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self {
            tree,
            capacity: DEFAULT_HISTORY_CAPACITY,
        })
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn prune(&self) -> MeaningResult<usize> {
        let excess = self.tree.len().saturating_sub(self.capacity);
        for _ in 0..excess {
            self.tree.pop_min()?;
        }
        Ok(excess)
    }

    fn key_for(entry: &NarrativeRecord) -> String {
        format!(
            "{:020}/{}",
            entry.recorded_at.timestamp_millis().max(0),
            Uuid::new_v4()
        )
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl NarrativeHistory for SledHistory {
    fn recent(&self, limit: usize) -> MeaningResult<Vec<NarrativeRecord>> {
        let mut out = Vec::with_capacity(limit.min(self.tree.len()));
        for item in self.tree.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (key, value) = item?;
            match serde_json::from_slice::<NarrativeRecord>(&value) {
                Ok(r) => out.push(r),
                Err(e) => {
                    warn!(
                        target: "meaning::history",
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "Skipping unreadable history record"
                    );
                }
            }
        }
        Ok(out)
    }

    fn record(&self, entry: &NarrativeRecord) -> MeaningResult<()> {
        let value =
            serde_json::to_vec(entry).map_err(|e| MeaningError::History(e.to_string()))?;
        let key = Self::key_for(entry);
        self.tree.insert(key.as_bytes(), value)?;
        let pruned = self.prune()?;
        self.tree.flush()?;
        debug!(target: "meaning::history", key = %key, pruned, "Recorded narrative");
        Ok(())
    }
}
