//! Reverse-scan reconciliation: the core synchronizer.
//!
//! Implements `spec.md` §4.4's six-step algorithm: select + search,
//! then walk sequences in descending order, classifying each message
//! as a snapshot, tombstone, lock, or file object and folding it into
//! the [`Index`], before computing the garbage set for the Writer to
//! act on out-of-band.

use crate::backend::Backend;
use crate::codec::{self, HEADER_PREFIX_BYTES};
use crate::crypto::EncryptionKey;
use crate::index::Index;
use crate::lock::LockRecord;
use crate::metadata::ObjectMetadata;
use crate::snapshot::{SnapshotRecord, SNAPSHOT_PATH};
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// The result of one reconciliation pass: sequences safe to delete.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub to_delete: BTreeSet<u32>,
    pub broken: BTreeSet<u32>,
}

/// Reconcile `index` against `backend`'s current state of `folder`.
///
/// `default_versions` is the retention to apply when a file object's
/// metadata omits `versions`. Per the re-entrancy guarantee, a fetch
/// or parse failure for one sequence never drops index state the scan
/// already successfully folded in from a prior call.
pub async fn synchronize(
    backend: &dyn Backend,
    folder: &str,
    index: &mut Index,
    key: Option<&EncryptionKey>,
    default_versions: u32,
) -> crate::error::Result<SyncOutcome> {
    backend.select(folder).await?;
    let seqs = backend.search_all().await?;

    let mut to_delete: BTreeSet<u32> = BTreeSet::new();
    let mut broken: BTreeSet<u32> = BTreeSet::new();
    let mut snapshot_adopted = false;
    let mut snapshot_floor = 0u32;

    for &seq in seqs.iter().rev() {
        if to_delete.contains(&seq) {
            continue;
        }
        if snapshot_adopted && seq <= snapshot_floor {
            break;
        }

        let prefix = match backend.fetch_prefix(seq, HEADER_PREFIX_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("fetch failed for sequence {}: {}", seq, e);
                broken.insert(seq);
                continue;
            }
        };

        let decoded = match codec::parse(&prefix, key) {
            Ok(d) => d,
            Err(e) => {
                debug!("parse failed for sequence {}: {}", seq, e);
                broken.insert(seq);
                continue;
            }
        };

        classify(
            seq,
            decoded.metadata,
            index,
            &mut to_delete,
            default_versions,
            &mut snapshot_adopted,
            &mut snapshot_floor,
            backend,
            key,
        )
        .await;
    }

    let referenced = index.referenced_sequences();
    for &seq in &seqs {
        if !broken.contains(&seq) && !referenced.contains(&seq) {
            to_delete.insert(seq);
        }
    }

    let now = Utc::now();
    for seq in index.locks.expire(now) {
        to_delete.insert(seq);
    }

    Ok(SyncOutcome { to_delete, broken })
}

#[allow(clippy::too_many_arguments)]
async fn classify(
    seq: u32,
    metadata: ObjectMetadata,
    index: &mut Index,
    to_delete: &mut BTreeSet<u32>,
    default_versions: u32,
    snapshot_adopted: &mut bool,
    snapshot_floor: &mut u32,
    backend: &dyn Backend,
    key: Option<&EncryptionKey>,
) {
    if metadata.path == SNAPSHOT_PATH {
        if *snapshot_adopted {
            to_delete.insert(seq);
            return;
        }
        match backend.fetch_full(seq).await {
            Ok(full) => match codec::parse(&full, key) {
                Ok(decoded) => match SnapshotRecord::from_bytes(&decoded.payload) {
                    Ok(record) => {
                        record.adopt_into(index);
                        *snapshot_adopted = true;
                        *snapshot_floor = record.highwater;
                        debug!("adopted snapshot at sequence {} covering up to {}", seq, record.highwater);
                    }
                    Err(e) => warn!("snapshot payload at {} unreadable: {}", seq, e),
                },
                Err(e) => warn!("snapshot body at {} unparseable: {}", seq, e),
            },
            Err(e) => warn!("could not fetch snapshot body at {}: {}", seq, e),
        }
        return;
    }

    if let Some(lock) = metadata.lock.clone() {
        if !index.locks.observe(lock, seq, Utc::now()) {
            to_delete.insert(seq);
        }
        return;
    }

    if metadata.del {
        match index.lookup(&metadata.path) {
            Some(entry) if entry.latest_seq >= seq => {
                to_delete.insert(seq);
            }
            Some(entry) => {
                for stale in entry.history.iter().copied().collect::<Vec<_>>() {
                    to_delete.insert(stale);
                }
                index.upsert(&metadata.path, seq, metadata.clone());
                if let Some(entry) = index.lookup_mut(&metadata.path) {
                    entry.history = std::iter::once(seq).collect();
                }
                index.mark_deleted(&metadata.path);
            }
            None => {
                index.upsert(&metadata.path, seq, metadata.clone());
                index.mark_deleted(&metadata.path);
            }
        }
        return;
    }

    match index.lookup(&metadata.path) {
        None => {
            index.upsert(&metadata.path, seq, metadata.clone());
        }
        Some(entry) if entry.latest_seq < seq => {
            let versions = metadata.retention(default_versions);
            if let Some(prev_latest) = index.upsert(&metadata.path, seq, metadata.clone()) {
                index.add_history(&metadata.path, prev_latest);
            }
            for dropped in index.enforce_retention(&metadata.path, versions) {
                to_delete.insert(dropped);
            }
        }
        Some(entry) => {
            let versions = entry.metadata.retention(default_versions);
            index.add_history(&metadata.path, seq);
            for dropped in index.enforce_retention(&metadata.path, versions) {
                to_delete.insert(dropped);
            }
        }
    }
}

/// Append a new tombstone for `path`.
pub fn tombstone_metadata(path: &str) -> ObjectMetadata {
    ObjectMetadata::tombstone(path)
}

/// Build the lock-acquisition metadata for `path`.
#[must_use]
pub fn lock_metadata(path: &str, holder_id: &str, ttl: std::time::Duration) -> ObjectMetadata {
    ObjectMetadata::lock_record(path, LockRecord::new(path, holder_id, ttl))
}
