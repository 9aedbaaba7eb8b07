//! Snapshot engine: condenses the Index into a single reserved-path
//! message to bound the cost of future reverse scans.
//!
//! The source leaves the on-disk snapshot form as a literal `FIXME`;
//! this module commits to one shape (plain JSON, see [`SnapshotRecord`])
//! per the Open Question resolution recorded in `DESIGN.md`.

use crate::index::Index;
use crate::metadata::ObjectMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved path for the snapshot object. MUST NOT be used for user
/// files (`spec.md` §6).
pub const SNAPSHOT_PATH: &str = "IFAP/metadata.json";

/// One path's condensed entry inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CondensedEntry {
    pub metadata: ObjectMetadata,
    pub history: Vec<u32>,
}

/// The condensed Index, covering all sequences up to `highwater`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub entries: BTreeMap<String, CondensedEntry>,
    pub highwater: u32,
}

impl SnapshotRecord {
    /// Build a snapshot covering the index as of `highwater`.
    #[must_use]
    pub fn capture(index: &Index, highwater: u32) -> Self {
        let mut entries = BTreeMap::new();
        for path in index.enumerate() {
            let Some(entry) = index.lookup(path) else {
                continue;
            };
            if entry.deleted {
                continue;
            }
            entries.insert(
                path.to_string(),
                CondensedEntry {
                    metadata: entry.metadata.clone(),
                    history: entry.history.iter().copied().collect(),
                },
            );
        }
        Self { entries, highwater }
    }

    /// Serialize to the bytes stored as the snapshot object's payload.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| crate::error::Error::AppendFailed(format!("snapshot encode: {e}")))
    }

    /// Parse a snapshot payload back into a record.
    pub fn from_bytes(bytes: &[u8]) -> crate::error::Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| crate::error::Error::ParseFailed { seq: 0, reason: format!("snapshot decode: {e}") })
    }

    /// Fold this snapshot's entries into `index`, for every path the
    /// index has not already seen at a higher sequence during the
    /// current scan.
    pub fn adopt_into(&self, index: &mut Index) {
        for (path, condensed) in &self.entries {
            index.adopt_snapshot_entry(path, condensed.metadata.clone(), &condensed.history);
        }
        index.snapshot_seq = Some(index.snapshot_seq.unwrap_or(0).max(self.highwater));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_then_adopt_round_trips_live_entries() {
        let mut idx = Index::new();
        idx.upsert("a", 1, ObjectMetadata::file("a", 3));
        idx.upsert("b", 2, ObjectMetadata::file("b", 4));
        idx.mark_deleted("b");

        let snap = SnapshotRecord::capture(&idx, 2);
        assert_eq!(snap.entries.len(), 1);
        assert!(snap.entries.contains_key("a"));

        let bytes = snap.to_bytes().unwrap();
        let parsed = SnapshotRecord::from_bytes(&bytes).unwrap();

        let mut fresh = Index::new();
        parsed.adopt_into(&mut fresh);
        assert_eq!(fresh.lookup("a").unwrap().latest_seq, 1);
        assert_eq!(fresh.snapshot_seq, Some(2));
    }

    #[test]
    fn adopt_does_not_override_already_seen_paths() {
        let mut fresh = Index::new();
        fresh.upsert("a", 99, ObjectMetadata::file("a", 1));

        let mut idx = Index::new();
        idx.upsert("a", 1, ObjectMetadata::file("a", 1));
        let snap = SnapshotRecord::capture(&idx, 1);

        snap.adopt_into(&mut fresh);
        assert_eq!(fresh.lookup("a").unwrap().latest_seq, 99);
    }
}
