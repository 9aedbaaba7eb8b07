//! The structured metadata map carried alongside every object's payload.
//!
//! The source stores arbitrary JSON in `metadata`. Here the keys with
//! defined semantics (`fn`, `bytes`, `versions`, `lock`, `del`, `snap`,
//! `_`) are strongly typed; everything else is preserved verbatim in
//! `extra`.

use crate::lock::LockRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata carried by one object message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Logical path (`fn` on the wire).
    #[serde(rename = "fn")]
    pub path: String,
    /// Payload length in bytes, pre-padding.
    pub bytes: u64,
    /// Retention count: how many historical revisions to keep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<u32>,
    /// Present on lock records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockRecord>,
    /// True on tombstone records.
    #[serde(skip_serializing_if = "is_false", default)]
    pub del: bool,
    /// True on the snapshot record.
    #[serde(skip_serializing_if = "is_false", default)]
    pub snap: bool,
    /// Transport-only padding used to size encrypted metadata to a
    /// multiple of [`crate::codec::METADATA_PAD_BLOCK`] bytes. Never
    /// meaningful after parse; stripped before comparison per Testable
    /// Property 3.
    #[serde(rename = "_", skip_serializing_if = "Option::is_none")]
    pub pad: Option<String>,
    /// Free-form user keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ObjectMetadata {
    /// A plain file object with no extra metadata.
    #[must_use]
    pub fn file(path: impl Into<String>, bytes: u64) -> Self {
        Self {
            path: path.into(),
            bytes,
            versions: None,
            lock: None,
            del: false,
            snap: false,
            pad: None,
            extra: BTreeMap::new(),
        }
    }

    /// A tombstone record for `path`.
    #[must_use]
    pub fn tombstone(path: impl Into<String>) -> Self {
        Self {
            del: true,
            ..Self::file(path, 0)
        }
    }

    /// A lock record for `path`.
    #[must_use]
    pub fn lock_record(path: impl Into<String>, lock: LockRecord) -> Self {
        Self {
            lock: Some(lock),
            ..Self::file(path, 0)
        }
    }

    /// The snapshot record, stored at the reserved snapshot path.
    #[must_use]
    pub fn snapshot(bytes: u64) -> Self {
        Self {
            snap: true,
            ..Self::file(crate::snapshot::SNAPSHOT_PATH, bytes)
        }
    }

    /// The retention bound to apply for this path: `versions` if set,
    /// otherwise the engine's configured default.
    #[must_use]
    pub fn retention(&self, default_versions: u32) -> u32 {
        self.versions.unwrap_or(default_versions).max(1)
    }

    /// Drop transport-only keys (`_`) before comparing or exposing
    /// metadata to callers, per Testable Property 3.
    pub fn strip_transport_keys(&mut self) {
        self.pad = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_has_no_control_flags() {
        let m = ObjectMetadata::file("a/b.txt", 5);
        assert_eq!(m.path, "a/b.txt");
        assert_eq!(m.bytes, 5);
        assert!(!m.del);
        assert!(!m.snap);
        assert!(m.lock.is_none());
    }

    #[test]
    fn tombstone_sets_del() {
        let m = ObjectMetadata::tombstone("g");
        assert!(m.del);
    }

    #[test]
    fn retention_falls_back_to_default() {
        let m = ObjectMetadata::file("f", 1);
        assert_eq!(m.retention(3), 3);
        let mut m2 = ObjectMetadata::file("f", 1);
        m2.versions = Some(5);
        assert_eq!(m2.retention(3), 5);
    }

    #[test]
    fn round_trips_through_json_preserving_extra_keys() {
        let mut m = ObjectMetadata::file("a", 10);
        m.extra
            .insert("owner".to_string(), serde_json::json!("alice"));
        let s = serde_json::to_string(&m).unwrap();
        let back: ObjectMetadata = serde_json::from_str(&s).unwrap();
        assert_eq!(back.extra.get("owner").unwrap(), "alice");
        assert_eq!(back.path, "a");
    }
}
