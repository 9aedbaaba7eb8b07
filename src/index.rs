//! In-memory index: logical path → (latest sequence, metadata,
//! retained history), plus the active lock table and known snapshot
//! sequence.

use crate::lock::LockTable;
use crate::metadata::ObjectMetadata;
use std::collections::{BTreeSet, HashMap};

/// Per-path index entry.
///
/// Invariant: `latest_seq == *history.iter().next_back().unwrap()`
/// whenever `history` is non-empty (history is ordered oldest-first by
/// `BTreeSet<u32>`; the newest is its last element).
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub latest_seq: u32,
    pub metadata: ObjectMetadata,
    pub history: BTreeSet<u32>,
    pub deleted: bool,
}

impl IndexEntry {
    #[must_use]
    fn new(seq: u32, metadata: ObjectMetadata) -> Self {
        let mut history = BTreeSet::new();
        history.insert(seq);
        Self {
            latest_seq: seq,
            metadata,
            history,
            deleted: false,
        }
    }
}

/// The reconciled view of one ifap folder.
#[derive(Debug, Default)]
pub struct Index {
    entries: HashMap<String, IndexEntry>,
    pub locks: LockTable,
    pub snapshot_seq: Option<u32>,
}

impl Index {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    pub fn lookup_mut(&mut self, path: &str) -> Option<&mut IndexEntry> {
        self.entries.get_mut(path)
    }

    /// Insert or update the current revision for `path` at `seq`.
    ///
    /// Returns the previous `latest_seq` for this path, if any, so the
    /// caller can queue it for deletion subject to retention.
    pub fn upsert(&mut self, path: &str, seq: u32, metadata: ObjectMetadata) -> Option<u32> {
        match self.entries.get_mut(path) {
            Some(entry) => {
                let prev = entry.latest_seq;
                entry.latest_seq = seq;
                entry.metadata = metadata;
                entry.deleted = false;
                entry.history.insert(seq);
                Some(prev)
            }
            None => {
                self.entries.insert(path.to_string(), IndexEntry::new(seq, metadata));
                None
            }
        }
    }

    /// Record an older revision of `path` (one that is not the
    /// current latest) as retained history.
    pub fn add_history(&mut self, path: &str, seq: u32) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.history.insert(seq);
        }
    }

    /// Mark `path` deleted (tombstoned). The entry is kept (so a later
    /// un-delete via a newer file object can still be observed by the
    /// reverse scan) but reads must treat it as gone.
    pub fn mark_deleted(&mut self, path: &str) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.deleted = true;
        }
    }

    /// Remove specific historical sequences from `path`'s retained
    /// history on caller request, returning the ones actually removed
    /// (so the caller can queue them for deletion). Never removes
    /// `latest_seq` or touches `deleted` — that's `mark_deleted`'s job.
    pub fn remove_history(&mut self, path: &str, requested: &[u32]) -> Vec<u32> {
        let Some(entry) = self.entries.get_mut(path) else {
            return Vec::new();
        };
        requested
            .iter()
            .copied()
            .filter(|seq| *seq != entry.latest_seq && entry.history.remove(seq))
            .collect()
    }

    /// Drop retained history sequences beyond `keep` newest, returning
    /// the sequences to queue for deletion. Never removes `latest_seq`.
    pub fn enforce_retention(&mut self, path: &str, keep: u32) -> Vec<u32> {
        let Some(entry) = self.entries.get_mut(path) else {
            return Vec::new();
        };
        let keep = keep.max(1) as usize;
        if entry.history.len() <= keep {
            return Vec::new();
        }

        let mut ordered: Vec<u32> = entry.history.iter().copied().collect();
        ordered.sort_unstable_by(|a, b| b.cmp(a)); // newest first
        let (retained, dropped) = ordered.split_at(keep.min(ordered.len()));
        let dropped: Vec<u32> = dropped.to_vec();
        entry.history = retained.iter().copied().collect();
        dropped
    }

    /// All paths currently known to the index (including deleted
    /// tombstones, which callers typically filter out).
    pub fn enumerate(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// One-hop children of `prefix`, derived from the flat path set.
    /// Deleted paths are excluded.
    #[must_use]
    pub fn listdir(&self, prefix: &str) -> Vec<String> {
        let live: Vec<&str> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.deleted)
            .map(|(p, _)| p.as_str())
            .collect();
        crate::path::listdir(prefix, live)
    }

    /// All sequences this index currently references (latest or
    /// retained history), across every path.
    #[must_use]
    pub fn referenced_sequences(&self) -> BTreeSet<u32> {
        self.entries
            .values()
            .flat_map(|e| e.history.iter().copied())
            .collect()
    }

    /// Merge a condensed snapshot entry for `path`, but only if we have
    /// not already observed a higher sequence for it during this scan
    /// (the snapshot is older than anything we've already folded in).
    pub fn adopt_snapshot_entry(&mut self, path: &str, metadata: ObjectMetadata, history: &[u32]) {
        if self.entries.contains_key(path) {
            return;
        }
        let Some(&latest_seq) = history.iter().max() else {
            return;
        };
        let mut entry = IndexEntry::new(latest_seq, metadata);
        entry.history = history.iter().copied().collect();
        self.entries.insert(path.to_string(), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(path: &str) -> ObjectMetadata {
        ObjectMetadata::file(path, 1)
    }

    #[test]
    fn upsert_creates_then_supersedes() {
        let mut idx = Index::new();
        assert_eq!(idx.upsert("f", 1, md("f")), None);
        assert_eq!(idx.upsert("f", 2, md("f")), Some(1));
        assert_eq!(idx.lookup("f").unwrap().latest_seq, 2);
    }

    #[test]
    fn retention_keeps_newest_n() {
        let mut idx = Index::new();
        idx.upsert("f", 1, md("f"));
        idx.upsert("f", 2, md("f"));
        idx.upsert("f", 3, md("f"));
        let dropped = idx.enforce_retention("f", 1);
        assert_eq!(dropped, vec![1, 2]);
        assert_eq!(idx.lookup("f").unwrap().history.len(), 1);
        assert!(idx.lookup("f").unwrap().history.contains(&3));
    }

    #[test]
    fn remove_history_drops_only_requested_non_latest_sequences() {
        let mut idx = Index::new();
        idx.upsert("f", 1, md("f"));
        idx.upsert("f", 2, md("f"));
        idx.upsert("f", 3, md("f"));

        // Asking to drop the latest sequence alongside a historical
        // one must leave the latest in place.
        let removed = idx.remove_history("f", &[1, 3]);
        assert_eq!(removed, vec![1]);

        let entry = idx.lookup("f").unwrap();
        assert!(!entry.history.contains(&1));
        assert!(entry.history.contains(&2));
        assert!(entry.history.contains(&3));
        assert!(!entry.deleted);
    }

    #[test]
    fn listdir_excludes_deleted() {
        let mut idx = Index::new();
        idx.upsert("a/b.txt", 1, md("a/b.txt"));
        idx.mark_deleted("a/b.txt");
        assert!(idx.listdir("a").is_empty());
    }

    #[test]
    fn snapshot_entry_not_overwritten_by_older_data() {
        let mut idx = Index::new();
        idx.upsert("f", 5, md("f"));
        idx.adopt_snapshot_entry("f", md("f"), &[1, 2]);
        assert_eq!(idx.lookup("f").unwrap().latest_seq, 5);
    }
}
