//! The narrow backend capability surface the core depends on.
//!
//! Grounded on the teacher's `connection.rs`/`folder.rs` split between
//! "how we talk to the server" and "what operations the rest of the
//! crate needs" — here collapsed into one `async-trait` so both the
//! real IMAP backend and the local Maildir impersonator can stand in
//! for each other.

pub mod imap;
pub mod maildir;

use crate::error::Result;
use async_trait::async_trait;

/// One message as returned by [`Backend::fetch`] or a full fetch: the
/// sequence number the server assigned it and its raw bytes.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub seq: u32,
    pub bytes: Vec<u8>,
}

/// The operations the Synchronizer and Writer need from a mail store.
///
/// The core never assumes bodies are preserved byte-for-byte beyond
/// these operations, and treats any failure as non-fatal — a
/// reconciliation attempt is always re-runnable.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Make `folder` the backend's current folder.
    async fn select(&self, folder: &str) -> Result<()>;

    /// All sequence numbers currently present in the selected folder,
    /// in ascending server order.
    async fn search_all(&self) -> Result<Vec<u32>>;

    /// Fetch the first `prefix_bytes` of message `seq`.
    async fn fetch_prefix(&self, seq: u32, prefix_bytes: usize) -> Result<Vec<u8>>;

    /// Fetch the full body of message `seq`.
    async fn fetch_full(&self, seq: u32) -> Result<Vec<u8>>;

    /// Append `bytes` as a new message; the server assigns and returns
    /// a sequence number strictly greater than any prior append.
    async fn append(&self, folder: &str, bytes: &[u8]) -> Result<u32>;

    /// Flag `seq` for deferred removal.
    async fn mark_deleted(&self, seq: u32) -> Result<()>;

    /// Permanently remove all messages flagged via
    /// [`Backend::mark_deleted`].
    async fn expunge(&self) -> Result<()>;
}
