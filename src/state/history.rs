//! Undo/Redo History
//!
//! Linear, snapshot-based history. Each entry stores the complete document as
//! it was right after a captured mutation. A bounded ring buffer keeps the
//! most recent entries; the snapshot of the last evicted entry becomes the
//! baseline that the oldest remaining entry undoes to.
//!
//! Debounced captures coalesce: a capture inside the window of a pending one
//! with the same label restarts its timer, and only the document at commit
//! time is recorded.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::DEFAULT_HISTORY_CAP;
use crate::error::{BoardkitError, Result};
use crate::state::document::Document;

/// A recorded point in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub document_id: String,
    pub timestamp: DateTime<Utc>,
    pub label: String,
    /// SHA-256 of the serialized snapshot.
    pub checksum: String,
    pub snapshot: Document,
}

impl HistoryEntry {
    fn new(label: impl Into<String>, snapshot: Document, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: snapshot.id.clone(),
            timestamp,
            label: label.into(),
            checksum: snapshot_checksum(&snapshot),
            snapshot,
        }
    }
}

/// Summary row for history UIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryItem {
    pub id: String,
    pub label: String,
    pub timestamp: DateTime<Utc>,
    /// True for entries at or before the cursor.
    pub applied: bool,
}

/// Per-mutation history options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    pub capture_history: bool,
    pub history_label: Option<String>,
    /// Overrides the engine's default debounce window.
    pub debounce_ms: Option<u64>,
}

impl CaptureOptions {
    /// Record a history entry with this label.
    pub fn capture(label: impl Into<String>) -> Self {
        Self {
            capture_history: true,
            history_label: Some(label.into()),
            debounce_ms: None,
        }
    }

    /// Mutate without touching history.
    pub fn skip() -> Self {
        Self::default()
    }

    pub fn debounced(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = Some(debounce_ms);
        self
    }
}

/// A debounced capture waiting for its window to elapse.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingCapture {
    label: String,
    deadline: DateTime<Utc>,
}

/// SHA-256 of a snapshot's JSON form.
pub fn snapshot_checksum(doc: &Document) -> String {
    let bytes = serde_json::to_vec(doc).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

/// Bounded linear history with a cursor and redo stack.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,

    /// Number of entries currently applied. `entries[cursor - 1]` is the
    /// entry matching the live document.
    cursor: usize,

    /// Document the first entry undoes to.
    baseline: Option<Document>,

    /// Documents as they were right before each undo, most recent last.
    redo_stack: Vec<Document>,

    pending: Option<PendingCapture>,

    cap: usize,

    /// Ids of entries evicted by the cap.
    evicted_ids: Vec<String>,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            baseline: None,
            redo_stack: Vec::new(),
            pending: None,
            cap: cap.max(1),
            evicted_ids: Vec::new(),
        }
    }

    /// Forget everything and start over from `baseline`.
    pub fn reset(&mut self, baseline: &Document) {
        self.entries.clear();
        self.cursor = 0;
        self.baseline = Some(baseline.clone());
        self.redo_stack.clear();
        self.pending = None;
        self.evicted_ids.clear();
    }

    /// Drop all entries, keeping the current document as the new baseline.
    pub fn clear(&mut self, current: &Document) {
        self.evicted_ids
            .extend(self.entries.iter().map(|e| e.id.clone()));
        self.reset_keep_evicted(current);
    }

    fn reset_keep_evicted(&mut self, baseline: &Document) {
        let evicted = std::mem::take(&mut self.evicted_ids);
        self.reset(baseline);
        self.evicted_ids = evicted;
    }

    /// Record `doc` as the state after a mutation.
    ///
    /// Without a debounce window the entry is committed immediately. With one,
    /// the capture becomes pending; the caller must [`History::settle`] before
    /// applying a mutation that was not part of the same edit.
    pub fn capture(
        &mut self,
        doc: &Document,
        label: &str,
        debounce_ms: u64,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if debounce_ms == 0 {
            self.pending = None;
            return self.commit(doc, label, now);
        }

        let deadline = now + Duration::milliseconds(debounce_ms as i64);
        match &mut self.pending {
            Some(pending) if pending.label == label => {
                pending.deadline = deadline;
            }
            _ => {
                self.pending = Some(PendingCapture {
                    label: label.to_string(),
                    deadline,
                });
            }
        }
        None
    }

    /// Commit a pending capture unless the next mutation continues it.
    ///
    /// Call with the document as it is before the next mutation is applied.
    /// `next_label` is the label of that mutation, or `None` if it is not a
    /// debounced capture.
    pub fn settle(&mut self, doc: &Document, next_label: Option<&str>, now: DateTime<Utc>) {
        let Some(pending) = &self.pending else {
            return;
        };
        let continues = next_label == Some(pending.label.as_str()) && now < pending.deadline;
        if !continues {
            self.flush(doc, now);
        }
    }

    /// Commit the pending capture if its window has elapsed.
    pub fn poll(&mut self, doc: &Document, now: DateTime<Utc>) -> Option<String> {
        match &self.pending {
            Some(pending) if now >= pending.deadline => self.flush(doc, now),
            _ => None,
        }
    }

    /// Commit the pending capture, if any, regardless of its deadline.
    pub fn flush(&mut self, doc: &Document, now: DateTime<Utc>) -> Option<String> {
        let pending = self.pending.take()?;
        self.commit(doc, &pending.label, now)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn commit(&mut self, doc: &Document, label: &str, now: DateTime<Utc>) -> Option<String> {
        let checksum = snapshot_checksum(doc);
        if self.current_entry().map(|e| e.checksum.as_str()) == Some(checksum.as_str()) {
            log::debug!("skipping history capture '{}': document unchanged", label);
            return None;
        }
        if self.cursor == 0 && self.baseline.as_ref() == Some(doc) {
            log::debug!("skipping history capture '{}': document unchanged", label);
            return None;
        }

        // History is linear: recording past the cursor discards the redo branch.
        self.entries.truncate(self.cursor);
        self.redo_stack.clear();

        let entry = HistoryEntry::new(label, doc.clone(), now);
        let id = entry.id.clone();
        self.entries.push_back(entry);
        self.cursor = self.entries.len();
        self.trim();

        log::debug!("captured history entry '{}' ({} entries)", label, self.entries.len());
        Some(id)
    }

    fn trim(&mut self) {
        while self.entries.len() > self.cap {
            if let Some(evicted) = self.entries.pop_front() {
                self.evicted_ids.push(evicted.id);
                if self.cursor == 0 {
                    // The live document is still the baseline; only the redo
                    // step into the evicted entry goes.
                    self.redo_stack.pop();
                } else {
                    self.baseline = Some(evicted.snapshot);
                    self.cursor -= 1;
                }
            }
        }
    }

    fn snapshot_at(&self, cursor: usize) -> Option<&Document> {
        if cursor == 0 {
            self.baseline.as_ref()
        } else {
            self.entries.get(cursor - 1).map(|e| &e.snapshot)
        }
    }

    /// Step back one entry.
    ///
    /// `current` is the live document; it goes on the redo stack so that a
    /// following [`History::redo`] restores it exactly. Returns the document
    /// to apply.
    pub fn undo(&mut self, current: &Document) -> Result<Document> {
        if self.cursor == 0 {
            return Err(BoardkitError::NothingToUndo);
        }
        let target = self
            .snapshot_at(self.cursor - 1)
            .cloned()
            .ok_or(BoardkitError::NothingToUndo)?;

        self.redo_stack.push(current.clone());
        self.cursor -= 1;
        Ok(target)
    }

    /// Reapply the most recently undone step. Returns the document to apply.
    pub fn redo(&mut self) -> Result<Document> {
        if self.cursor >= self.entries.len() {
            return Err(BoardkitError::NothingToRedo);
        }
        let restored = match self.redo_stack.pop() {
            Some(doc) => doc,
            None => self.entries[self.cursor].snapshot.clone(),
        };
        self.cursor += 1;
        Ok(restored)
    }

    /// Jump to an entry. Entries after it are discarded.
    pub fn go_to(&mut self, entry_id: &str) -> Result<Document> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or_else(|| BoardkitError::HistoryEntryNotFound {
                entry_id: entry_id.to_string(),
            })?;

        let discarded = self.entries.len() - (index + 1);
        self.entries.truncate(index + 1);
        self.cursor = index + 1;
        self.redo_stack.clear();
        if discarded > 0 {
            log::debug!("history jump discarded {} entries", discarded);
        }
        Ok(self.entries[index].snapshot.clone())
    }

    /// Redo everything that was undone. Returns the document to apply, or
    /// `None` when already at the latest entry.
    pub fn go_to_latest(&mut self) -> Option<Document> {
        let mut latest = None;
        while self.can_redo() {
            match self.redo() {
                Ok(doc) => latest = Some(doc),
                Err(_) => break,
            }
        }
        latest
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.entries.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Change the cap, evicting the oldest entries if needed.
    pub fn set_cap(&mut self, cap: usize) {
        self.cap = cap.max(1);
        self.trim();
    }

    /// Entry matching the live document, if any.
    pub fn current_entry(&self) -> Option<&HistoryEntry> {
        self.cursor.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn entry(&self, entry_id: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == entry_id)
    }

    /// Oldest-first summary of all entries.
    pub fn items(&self) -> Vec<HistoryItem> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| HistoryItem {
                id: e.id.clone(),
                label: e.label.clone(),
                timestamp: e.timestamp,
                applied: i < self.cursor,
            })
            .collect()
    }

    pub fn evicted_ids(&self) -> &[String] {
        &self.evicted_ids
    }
}
