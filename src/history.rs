//! Navigation history with browser semantics.
//!
//! Records are immutable once pushed. Pushing after going back discards the
//! forward branch. Every mutation writes the whole state to the store; a
//! failed write is logged and the in-memory state stays authoritative.

use crate::metrics::Metrics;
use crate::store::{self, KeyValueStore, HISTORY_KEY};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationRecord {
    pub topic: String,
    /// Sanitized article HTML.
    pub content: String,
    #[serde(default)]
    pub metrics: Option<Metrics>,
}

impl NavigationRecord {
    pub fn new(topic: impl Into<String>, content: impl Into<String>, metrics: Option<Metrics>) -> Self {
        Self {
            topic: topic.into(),
            content: content.into(),
            metrics,
        }
    }
}

/// `{records, cursor}`; the cursor is stored as `-1` when there is no
/// current record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryState {
    pub records: Vec<NavigationRecord>,
    #[serde(serialize_with = "serialize_cursor", deserialize_with = "deserialize_cursor")]
    pub cursor: Option<usize>,
}

fn serialize_cursor<S: Serializer>(cursor: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error> {
    match cursor {
        Some(index) => serializer.serialize_i64(*index as i64),
        None => serializer.serialize_i64(-1),
    }
}

fn deserialize_cursor<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
    let raw = i64::deserialize(deserializer)?;
    if raw == -1 {
        return Ok(None);
    }
    usize::try_from(raw)
        .map(Some)
        .map_err(|_| serde::de::Error::custom(format!("invalid history cursor {}", raw)))
}

impl HistoryState {
    /// `-1 <= cursor < len`, and an empty sequence has no cursor.
    pub fn is_consistent(&self) -> bool {
        match self.cursor {
            None => true,
            Some(index) => index < self.records.len(),
        }
    }

    pub fn current(&self) -> Option<&NavigationRecord> {
        self.cursor.and_then(|i| self.records.get(i))
    }

    pub fn can_go_back(&self) -> bool {
        self.cursor.is_some_and(|i| i > 0)
    }

    pub fn can_go_forward(&self) -> bool {
        match self.cursor {
            Some(i) => i + 1 < self.records.len(),
            None => false,
        }
    }

    /// Topics from the first record up to and including the cursor.
    pub fn path_topics(&self) -> Vec<String> {
        match self.cursor {
            Some(i) => self.records[..=i].iter().map(|r| r.topic.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Cursor as the persisted integer form.
    pub fn cursor_index(&self) -> i64 {
        self.cursor.map_or(-1, |i| i as i64)
    }
}

pub struct History {
    state: HistoryState,
    store: Arc<dyn KeyValueStore>,
}

impl History {
    /// Restore from the store. Absent, corrupt or inconsistent state starts
    /// empty.
    pub fn restore(store: Arc<dyn KeyValueStore>) -> Self {
        let state = match store::load_json_or_warn::<HistoryState>(store.as_ref(), HISTORY_KEY) {
            Some(state) if state.is_consistent() => state,
            Some(state) => {
                tracing::warn!(
                    "Discarding inconsistent history: cursor={}, records={}",
                    state.cursor_index(),
                    state.records.len()
                );
                HistoryState::default()
            }
            None => HistoryState::default(),
        };
        tracing::debug!(
            "History restored: records={}, cursor={}",
            state.records.len(),
            state.cursor_index()
        );
        Self { state, store }
    }

    pub fn state(&self) -> &HistoryState {
        &self.state
    }

    pub fn current(&self) -> Option<&NavigationRecord> {
        self.state.current()
    }

    pub fn records(&self) -> &[NavigationRecord] {
        &self.state.records
    }

    pub fn can_go_back(&self) -> bool {
        self.state.can_go_back()
    }

    pub fn can_go_forward(&self) -> bool {
        self.state.can_go_forward()
    }

    pub fn path_topics(&self) -> Vec<String> {
        self.state.path_topics()
    }

    pub fn push(&mut self, record: NavigationRecord) {
        let keep = self.state.cursor.map_or(0, |i| i + 1);
        let dropped = self.state.records.len().saturating_sub(keep);
        self.state.records.truncate(keep);
        self.state.records.push(record);
        self.state.cursor = Some(self.state.records.len() - 1);
        tracing::debug!(
            "History push: records={}, cursor={}, dropped_forward={}",
            self.state.records.len(),
            self.state.cursor_index(),
            dropped
        );
        self.persist();
    }

    /// Returns whether the cursor moved.
    pub fn back(&mut self) -> bool {
        if !self.state.can_go_back() {
            return false;
        }
        self.state.cursor = self.state.cursor.map(|i| i - 1);
        tracing::debug!("History back: cursor={}", self.state.cursor_index());
        self.persist();
        true
    }

    /// Returns whether the cursor moved.
    pub fn forward(&mut self) -> bool {
        if !self.state.can_go_forward() {
            return false;
        }
        self.state.cursor = self.state.cursor.map(|i| i + 1);
        tracing::debug!("History forward: cursor={}", self.state.cursor_index());
        self.persist();
        true
    }

    /// Empties the history and returns the records it held.
    pub fn clear(&mut self) -> Vec<NavigationRecord> {
        let records = std::mem::take(&mut self.state.records);
        self.state.cursor = None;
        tracing::debug!("History cleared: dropped={}", records.len());
        self.persist();
        records
    }

    fn persist(&self) {
        if let Err(e) = store::save_json(self.store.as_ref(), HISTORY_KEY, &self.state) {
            tracing::warn!("Failed to persist history: {}", e);
        }
    }
}
