// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded undo/redo over immutable AST snapshots.
//!
//! Entries are ordered oldest first. `current_index` counts steps back from
//! the newest entry: `0` is "latest", `len - 1` is the oldest retained
//! snapshot. `can_undo`/`can_redo` are always derived from the entries and
//! the index, never stored.
//!
//! Snapshots are `Arc<Ast>` and an [`Ast`] only holds `Arc<Component>`s, so
//! pushing and reading share structure instead of deep-copying, while no
//! caller can reach into a stored snapshot and change it.

use crate::model::Ast;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maximum retained entries; the oldest is evicted past this.
pub const MAX_HISTORY_SIZE: usize = 50;

/// Number of entries listed in [`HistorySummary::recent_entries`].
pub const RECENT_ENTRIES: usize = 5;

/// One immutable snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    id: String,
    timestamp: DateTime<Utc>,
    ast: Arc<Ast>,
    description: String,
}

impl HistoryEntry {
    fn new(prev: Option<&HistoryEntry>, ast: Ast, description: String, now: DateTime<Utc>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"nudge-history:");
        if let Some(prev) = prev {
            hasher.update(prev.id.as_bytes());
        }
        hasher.update(&[0]);
        hasher.update(description.as_bytes());
        hasher.update(&[0]);
        hasher.update(now.to_rfc3339().as_bytes());
        let digest = hasher.finalize();
        Self {
            id: format!("h_{}", hex::encode(&digest.as_bytes()[..8])),
            timestamp: now,
            ast: Arc::new(ast),
            description,
        }
    }

    /// Stable entry id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the snapshot was taken.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Snapshot contents (read-only).
    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// What changed.
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Persisted history: entries plus the undo pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "HistoryRecord")]
pub struct HistoryState {
    entries: Vec<HistoryEntry>,
    current_index: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    entries: Vec<HistoryEntry>,
    #[serde(default)]
    current_index: usize,
}

impl From<HistoryRecord> for HistoryState {
    fn from(record: HistoryRecord) -> Self {
        let current_index = record.current_index.min(record.entries.len().saturating_sub(1));
        Self {
            entries: record.entries,
            current_index,
        }
    }
}

/// Compact view for clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    /// Retained entries.
    pub total: usize,
    /// 1-based position of the current entry counted from the oldest.
    pub current: usize,
    /// Whether an undo would move.
    pub can_undo: bool,
    /// Whether a redo would move.
    pub can_redo: bool,
    /// Newest entries first.
    pub recent_entries: Vec<RecentEntry>,
}

/// Entry line in a [`HistorySummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentEntry {
    /// What changed.
    pub description: String,
    /// When.
    pub timestamp: DateTime<Utc>,
}

impl HistoryState {
    /// History holding one "Initial state" entry for `initial`.
    pub fn new(initial: Ast, now: DateTime<Utc>) -> Self {
        Self {
            entries: vec![HistoryEntry::new(None, initial, "Initial state".to_owned(), now)],
            current_index: 0,
        }
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Steps back from the newest entry.
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Whether there is an older snapshot to move to.
    pub fn can_undo(&self) -> bool {
        self.current_index + 1 < self.entries.len()
    }

    /// Whether there is a newer snapshot to move to.
    pub fn can_redo(&self) -> bool {
        self.current_index > 0
    }

    fn position(&self) -> Option<usize> {
        self.entries.len().checked_sub(1 + self.current_index)
    }

    fn current_entry(&self) -> Option<&HistoryEntry> {
        self.position().and_then(|p| self.entries.get(p))
    }

    /// Record `ast` as the newest snapshot.
    ///
    /// Anything newer than the current position is discarded first, so an
    /// edit after an undo invalidates redo. The oldest entry is evicted once
    /// the list exceeds [`MAX_HISTORY_SIZE`].
    pub fn push(mut self, ast: Ast, description: impl Into<String>, now: DateTime<Utc>) -> Self {
        let keep = self.entries.len() - self.current_index;
        self.entries.truncate(keep);
        let entry = HistoryEntry::new(self.entries.last(), ast, description.into(), now);
        self.entries.push(entry);
        if self.entries.len() > MAX_HISTORY_SIZE {
            let excess = self.entries.len() - MAX_HISTORY_SIZE;
            self.entries.drain(..excess);
        }
        self.current_index = 0;
        self
    }

    /// Step one snapshot back. Returns `None` (state unchanged) at the oldest entry.
    pub fn undo(mut self) -> (Self, Option<Ast>) {
        if !self.can_undo() {
            return (self, None);
        }
        self.current_index += 1;
        let ast = self.current_ast();
        (self, Some(ast))
    }

    /// Step one snapshot forward. Returns `None` (state unchanged) at the newest entry.
    pub fn redo(mut self) -> (Self, Option<Ast>) {
        if !self.can_redo() {
            return (self, None);
        }
        self.current_index -= 1;
        let ast = self.current_ast();
        (self, Some(ast))
    }

    /// The snapshot at the current position, as an independent value.
    pub fn current_ast(&self) -> Ast {
        self.current_entry().map(|e| Ast::clone(&e.ast)).unwrap_or_default()
    }

    /// Collapse to the current snapshot only.
    pub fn clear(self) -> Self {
        let entries = self.current_entry().cloned().into_iter().collect();
        Self {
            entries,
            current_index: 0,
        }
    }

    /// Client-facing summary.
    pub fn summary(&self) -> HistorySummary {
        HistorySummary {
            total: self.entries.len(),
            current: self.entries.len() - self.current_index,
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            recent_entries: self
                .entries
                .iter()
                .rev()
                .take(RECENT_ENTRIES)
                .map(|e| RecentEntry {
                    description: e.description.clone(),
                    timestamp: e.timestamp,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::model::Component;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn version(label: &str) -> Ast {
        std::iter::once(Component::new(
            "comp_1",
            format!("<div data-id=\"comp_1\">{label}</div>"),
            at(0),
        ))
        .collect()
    }

    fn markup(ast: &Ast) -> String {
        ast.get("comp_1").map(|c| c.markup.clone()).unwrap_or_default()
    }

    #[test]
    fn new_history_has_one_entry_and_no_moves() {
        let h = HistoryState::new(Ast::new(), at(0));
        assert_eq!(h.entries().len(), 1);
        assert_eq!(h.current_index(), 0);
        assert!(!h.can_undo());
        assert!(!h.can_redo());
        assert_eq!(h.entries()[0].description(), "Initial state");
    }

    #[test]
    fn three_versions_undo_twice_then_redo_twice() {
        let h = HistoryState::new(version("V1"), at(0))
            .push(version("V2"), "V2", at(1))
            .push(version("V3"), "V3", at(2));

        let (h, a) = h.undo();
        assert_eq!(markup(&a.unwrap()), markup(&version("V2")));
        let (h, a) = h.undo();
        assert_eq!(a.unwrap(), version("V1"));
        assert!(!h.can_undo());
        let (h, none) = h.clone().undo();
        assert!(none.is_none());

        let (h, _) = h.redo();
        let (h, a) = h.redo();
        assert_eq!(a.unwrap(), version("V3"));
        assert!(!h.can_redo());
        assert_eq!(h.redo().1, None);
    }

    #[test]
    fn push_after_undo_discards_redo_branch() {
        let h = HistoryState::new(version("V1"), at(0))
            .push(version("V2"), "V2", at(1))
            .push(version("V3"), "V3", at(2));
        let (h, _) = h.undo();
        assert!(h.can_redo());

        let h = h.push(version("V4"), "V4", at(3));
        assert!(!h.can_redo());
        let descriptions: Vec<_> = h.entries().iter().map(HistoryEntry::description).collect();
        assert_eq!(descriptions, ["Initial state", "V2", "V4"]);
    }

    #[test]
    fn current_ast_cannot_alter_stored_snapshot() {
        let h = HistoryState::new(version("V1"), at(0));
        let mut copy = h.current_ast();
        copy.insert(Component::new("comp_1", "<b data-id=\"comp_1\">hacked</b>", at(9)));
        assert_eq!(h.current_ast(), version("V1"));
        assert!(h.current_ast().shares_component(h.entries()[0].ast(), "comp_1"));
    }

    #[test]
    fn clear_keeps_only_current_snapshot() {
        let h = HistoryState::new(version("V1"), at(0))
            .push(version("V2"), "V2", at(1))
            .push(version("V3"), "V3", at(2));
        let (h, _) = h.undo();
        let h = h.clear();
        assert_eq!(h.entries().len(), 1);
        assert_eq!(h.current_ast(), version("V2"));
        assert!(!h.can_undo() && !h.can_redo());
    }

    #[test]
    fn summary_lists_newest_first() {
        let mut h = HistoryState::new(Ast::new(), at(0));
        for i in 1..=7 {
            h = h.push(version(&i.to_string()), format!("change {i}"), at(i));
        }
        let (h, _) = h.undo();
        let s = h.summary();
        assert_eq!(s.total, 8);
        assert_eq!(s.current, 7);
        assert!(s.can_undo && s.can_redo);
        let recent: Vec<_> = s.recent_entries.iter().map(|e| e.description.as_str()).collect();
        assert_eq!(recent, ["change 7", "change 6", "change 5", "change 4", "change 3"]);
    }

    #[test]
    fn entry_ids_are_distinct_along_the_chain() {
        let h = HistoryState::new(Ast::new(), at(0))
            .push(Ast::new(), "same", at(1))
            .push(Ast::new(), "same", at(1));
        let ids: std::collections::HashSet<_> = h.entries().iter().map(HistoryEntry::id).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn persisted_record_round_trips_and_clamps_index() {
        let h = HistoryState::new(version("V1"), at(0)).push(version("V2"), "V2", at(1));
        let (h, _) = h.undo();
        let json = serde_json::to_value(&h).unwrap();
        assert_eq!(json["currentIndex"], 1);
        assert!(json.get("canUndo").is_none());
        let back: HistoryState = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back, h);

        let mut broken = json;
        broken["currentIndex"] = serde_json::json!(99);
        let clamped: HistoryState = serde_json::from_value(broken).unwrap();
        assert_eq!(clamped.current_index(), 1);
    }

    proptest! {
        #[test]
        fn undo_restores_previous_and_redo_restores_next(labels in prop::collection::vec("[a-z]{1,4}", 1..8)) {
            let mut h = HistoryState::new(version("base"), at(0));
            for (i, l) in labels.iter().enumerate() {
                h = h.push(version(l), l.clone(), at(i64::try_from(i).unwrap_or(0) + 1));
            }
            let before = h.current_ast();
            let pushed = h.clone().push(version("next"), "x", at(100));
            let (undone, ast) = pushed.undo();
            prop_assert_eq!(ast.unwrap(), before.clone());
            let (_, redone) = undone.undo().0.redo();
            prop_assert_eq!(redone.unwrap(), before);
        }

        #[test]
        fn cap_holds_and_bounds_still_work(extra in 1usize..30) {
            let mut h = HistoryState::new(version("0"), at(0));
            let pushes = MAX_HISTORY_SIZE + extra;
            for i in 1..=pushes {
                h = h.push(version(&i.to_string()), i.to_string(), at(i64::try_from(i).unwrap_or(0)));
            }
            prop_assert_eq!(h.entries().len(), MAX_HISTORY_SIZE);

            let mut undos = 0;
            loop {
                let (next, ast) = h.undo();
                h = next;
                if ast.is_none() { break; }
                undos += 1;
            }
            prop_assert_eq!(undos, MAX_HISTORY_SIZE - 1);
            let oldest = pushes - MAX_HISTORY_SIZE + 1;
            prop_assert_eq!(markup(&h.current_ast()), markup(&version(&oldest.to_string())));

            let mut redos = 0;
            loop {
                let (next, ast) = h.redo();
                h = next;
                if ast.is_none() { break; }
                redos += 1;
            }
            prop_assert_eq!(redos, MAX_HISTORY_SIZE - 1);
            prop_assert_eq!(markup(&h.current_ast()), markup(&version(&pushes.to_string())));
        }
    }
}
