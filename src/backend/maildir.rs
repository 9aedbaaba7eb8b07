//! Local filesystem impersonator `Backend`.
//!
//! Grounded on `original_source`'s `backends.FilesystemIMAP` (named in
//! `ifaplib/__init__.py`'s module doc-comment as a drop-in substitute
//! for a real IMAP client) and structurally mirroring the teacher's
//! in-process fake server: one file per message, named by a
//! monotonically increasing sequence number, with deletion deferred
//! until an explicit expunge.
//!
//! This is a first-class backend — `spec.md` §4.2 explicitly lists "a
//! local IMAP client or a local Maildir impersonator" as in-scope —
//! not merely test scaffolding, though it also backs this crate's
//! integration tests exactly as the teacher's fake IMAP server backs
//! its own.

use crate::backend::Backend;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

/// A `Backend` backed by a directory tree on disk: one subdirectory
/// per folder, one file per message named `<seq>.eml`, and a sibling
/// `<seq>.deleted` marker for messages awaiting expunge.
pub struct MaildirBackend {
    root: PathBuf,
    folder: Mutex<Option<String>>,
    next_seq: AtomicU32,
}

impl MaildirBackend {
    /// Open (creating if absent) a Maildir-style store rooted at
    /// `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            folder: Mutex::new(None),
            next_seq: AtomicU32::new(1),
        })
    }

    fn folder_dir(&self, folder: &str) -> PathBuf {
        self.root.join(folder)
    }

    fn message_path(dir: &Path, seq: u32) -> PathBuf {
        dir.join(format!("{seq}.eml"))
    }

    fn deleted_marker_path(dir: &Path, seq: u32) -> PathBuf {
        dir.join(format!("{seq}.deleted"))
    }

    async fn current_folder_dir(&self) -> Result<PathBuf> {
        let guard = self.folder.lock().await;
        let folder = guard
            .as_ref()
            .ok_or_else(|| Error::BackendUnavailable("no folder selected".to_string()))?;
        Ok(self.folder_dir(folder))
    }
}

#[async_trait]
impl Backend for MaildirBackend {
    async fn select(&self, folder: &str) -> Result<()> {
        let dir = self.folder_dir(folder);
        tokio::fs::create_dir_all(&dir).await?;

        let mut max_seq = 0u32;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(seq) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_suffix(".eml"))
                .and_then(|n| n.parse::<u32>().ok())
            {
                max_seq = max_seq.max(seq);
            }
        }
        self.next_seq.store(max_seq + 1, Ordering::SeqCst);

        *self.folder.lock().await = Some(folder.to_string());
        Ok(())
    }

    async fn search_all(&self) -> Result<Vec<u32>> {
        let dir = self.current_folder_dir().await?;
        let mut seqs = BTreeSet::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(seq) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_suffix(".eml"))
                .and_then(|n| n.parse::<u32>().ok())
            {
                seqs.insert(seq);
            }
        }
        Ok(seqs.into_iter().collect())
    }

    async fn fetch_prefix(&self, seq: u32, prefix_bytes: usize) -> Result<Vec<u8>> {
        let mut bytes = self.fetch_full(seq).await?;
        bytes.truncate(prefix_bytes);
        Ok(bytes)
    }

    async fn fetch_full(&self, seq: u32) -> Result<Vec<u8>> {
        let dir = self
            .current_folder_dir()
            .await
            .map_err(|e| Error::FetchFailed { seq, reason: e.to_string() })?;
        tokio::fs::read(Self::message_path(&dir, seq))
            .await
            .map_err(|e| Error::FetchFailed { seq, reason: e.to_string() })
    }

    async fn append(&self, folder: &str, bytes: &[u8]) -> Result<u32> {
        let dir = self.folder_dir(folder);
        tokio::fs::create_dir_all(&dir).await?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(Self::message_path(&dir, seq), bytes)
            .await
            .map_err(|e| Error::AppendFailed(e.to_string()))?;
        Ok(seq)
    }

    async fn mark_deleted(&self, seq: u32) -> Result<()> {
        let dir = self.current_folder_dir().await?;
        tokio::fs::write(Self::deleted_marker_path(&dir, seq), b"").await?;
        Ok(())
    }

    async fn expunge(&self) -> Result<()> {
        let dir = self.current_folder_dir().await?;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut markers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(seq) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_suffix(".deleted"))
                .and_then(|n| n.parse::<u32>().ok())
            {
                markers.push(seq);
            }
        }
        for seq in markers {
            let _ = tokio::fs::remove_file(Self::message_path(&dir, seq)).await;
            let _ = tokio::fs::remove_file(Self::deleted_marker_path(&dir, seq)).await;
        }
        Ok(())
    }
}
