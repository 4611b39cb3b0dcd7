//! Append-only record of failed rounds.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One failed round of a repair loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugHistoryEntry {
    /// Function (or artifact) being debugged.
    pub function: String,
    /// 1-based round index.
    pub round: u32,
    /// Failure evidence captured in that round.
    pub diagnostic: String,
    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl DebugHistoryEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(function: impl Into<String>, round: u32, diagnostic: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            round,
            diagnostic: diagnostic.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Debug history keyed by (task, function). Entries are never modified.
#[derive(Debug, Clone, Default)]
pub struct DebugLedger {
    entries: HashMap<(String, String), Vec<DebugHistoryEntry>>,
}

impl DebugLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry for `task`.
    pub fn record(&mut self, task: &str, entry: DebugHistoryEntry) {
        self.entries
            .entry((task.to_string(), entry.function.clone()))
            .or_default()
            .push(entry);
    }

    /// Entries for one (task, function), oldest first.
    pub fn history(&self, task: &str, function: &str) -> &[DebugHistoryEntry] {
        self.entries
            .get(&(task.to_string(), function.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Returns true when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
