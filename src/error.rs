//! Error types for ifap

use thiserror::Error;

/// Errors produced by the ifap engine.
///
/// Variants map onto the error taxonomy the core synchronizer and
/// writer distinguish between: per-message failures that the
/// [`crate::sync`] reconciliation absorbs into `broken`/`to_delete`
/// sets, and session-level failures that propagate to the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// `select`/`search` failed against the backend. Retriable; the
    /// Index is left untouched.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A flush could not persist a staged revision. The pending
    /// payload is retained so the caller can retry.
    #[error("append failed: {0}")]
    AppendFailed(String),

    /// Fetching an individual message failed. Never fatal to a scan;
    /// the message is classified broken.
    #[error("fetch failed for sequence {seq}: {reason}")]
    FetchFailed { seq: u32, reason: String },

    /// A message's header prefix could not be parsed as an ifap
    /// object.
    #[error("parse failed for sequence {seq}: {reason}")]
    ParseFailed { seq: u32, reason: String },

    /// A message's metadata could not be decrypted.
    #[error("decrypt failed for sequence {seq}: {reason}")]
    DecryptFailed { seq: u32, reason: String },

    /// `open`/`read` for a path with no current entry in the Index.
    #[error("not found: {0}")]
    NotFound(String),

    /// A caller requested a specific historical version that
    /// retention has already discarded.
    #[error("version conflict: {path} has no retained sequence {requested}")]
    VersionConflict { path: String, requested: u32 },

    /// An advisory lock is held by another holder and has not
    /// expired.
    #[error("lock contended: {path} is held by {holder}")]
    LockContended { path: String, holder: String },

    /// Configuration could not be loaded (missing/invalid env vars).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
