//! Staged-write buffering.
//!
//! Mutations land in an `unwritten` map keyed by path before they are
//! flushed to the backend, per `spec.md` §4.5. Grounded on
//! `original_source`'s `_unwritten`/`_unwritten_bytes`/`flush`/
//! `_maybe_flush` triple.

use crate::backend::Backend;
use crate::codec;
use crate::crypto::EncryptionKey;
use crate::error::Result;
use crate::metadata::ObjectMetadata;
use std::collections::HashMap;
use tracing::{debug, warn};

/// One staged write: the metadata to encode alongside the payload.
#[derive(Debug, Clone)]
struct Pending {
    metadata: ObjectMetadata,
    payload: Vec<u8>,
}

/// Buffers writes in memory until they are flushed to the backend.
#[derive(Debug, Default)]
pub struct Writer {
    unwritten: HashMap<String, Pending>,
    unwritten_bytes: u64,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a write for `path`, replacing any previously staged
    /// (unflushed) write for the same path.
    pub fn stage(&mut self, path: &str, metadata: ObjectMetadata, payload: Vec<u8>) {
        if let Some(prev) = self.unwritten.get(path) {
            self.unwritten_bytes = self.unwritten_bytes.saturating_sub(prev.payload.len() as u64);
        }
        self.unwritten_bytes += payload.len() as u64;
        self.unwritten.insert(path.to_string(), Pending { metadata, payload });
    }

    #[must_use]
    pub fn unwritten_bytes(&self) -> u64 {
        self.unwritten_bytes
    }

    #[must_use]
    pub fn has_pending(&self, path: &str) -> bool {
        self.unwritten.contains_key(path)
    }

    /// The payload currently staged for `path`, if any — callers
    /// opening a path for read must see their own unflushed writes.
    #[must_use]
    pub fn pending_payload(&self, path: &str) -> Option<&[u8]> {
        self.unwritten.get(path).map(|p| p.payload.as_slice())
    }

    /// Flush every staged write to `backend` under `folder`, encoding
    /// with `key` when encryption is enabled.
    ///
    /// Per path: encode then append; on success the path leaves
    /// `unwritten`. On failure it is left staged (with the error
    /// surfaced to the caller) so the write can be retried. Ordering
    /// across paths within one flush is unspecified.
    pub async fn flush(
        &mut self,
        backend: &dyn Backend,
        folder: &str,
        key: Option<&EncryptionKey>,
    ) -> Result<Vec<(String, u32)>> {
        let mut appended = Vec::new();
        let mut first_error = None;

        let paths: Vec<String> = self.unwritten.keys().cloned().collect();
        for path in paths {
            let Some(pending) = self.unwritten.get(&path) else {
                continue;
            };
            let encoded = match codec::encode(&pending.metadata, &pending.payload, key) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("failed to encode staged write for {}: {}", path, e);
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            match backend.append(folder, &encoded).await {
                Ok(seq) => {
                    debug!("flushed {} at sequence {}", path, seq);
                    if let Some(p) = self.unwritten.remove(&path) {
                        self.unwritten_bytes = self.unwritten_bytes.saturating_sub(p.payload.len() as u64);
                    }
                    appended.push((path, seq));
                }
                Err(e) => {
                    warn!("failed to flush staged write for {}: {}", path, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(appended),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::maildir::MaildirBackend;
    use tempfile::tempdir;

    #[test]
    fn staging_tracks_byte_count_and_replaces_prior_write() {
        let mut writer = Writer::new();
        writer.stage("f", ObjectMetadata::file("f", 3), b"one".to_vec());
        assert_eq!(writer.unwritten_bytes(), 3);
        writer.stage("f", ObjectMetadata::file("f", 3), b"two".to_vec());
        assert_eq!(writer.unwritten_bytes(), 3);
        assert_eq!(writer.pending_payload("f"), Some(b"two".as_slice()));
    }

    #[tokio::test]
    async fn flush_appends_and_clears_staged_entries() {
        let dir = tempdir().unwrap();
        let backend = MaildirBackend::open(dir.path()).await.unwrap();
        backend.select("FILE_STORAGE").await.unwrap();

        let mut writer = Writer::new();
        writer.stage("a.txt", ObjectMetadata::file("a.txt", 5), b"hello".to_vec());
        writer.stage("b.txt", ObjectMetadata::file("b.txt", 5), b"world".to_vec());

        let appended = writer.flush(&backend, "FILE_STORAGE", None).await.unwrap();
        assert_eq!(appended.len(), 2);
        assert_eq!(writer.unwritten_bytes(), 0);
        assert!(!writer.has_pending("a.txt"));
    }
}
