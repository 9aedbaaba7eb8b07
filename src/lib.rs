#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! A versioned, optionally encrypted filesystem layered on one IMAP
//! folder.
//!
//! Every write is an IMAP message; the server's monotonic sequence
//! numbers are the sole source of ordering truth. A reverse scan over
//! the folder ([`sync::synchronize`]) reconciles the latest revision
//! of each logical path, retains a bounded number of historical
//! revisions, and garbage-collects everything else. A [`backend::Backend`]
//! abstracts the transport — a real IMAP server or, for tests and
//! local use, a Maildir-backed impersonator.

mod backend;
mod codec;
mod config;
mod crypto;
mod engine;
mod error;
mod handle;
mod index;
mod lock;
mod metadata;
mod path;
mod session;
mod snapshot;
mod sync;
mod writer;

pub use backend::imap::{ImapBackend, ImapEndpoint};
pub use backend::maildir::MaildirBackend;
pub use backend::{Backend, FetchedMessage};
pub use config::EngineConfig;
pub use engine::{Engine, EngineSession};
pub use error::{Error, Result};
pub use handle::{FileHandle, Mode};
pub use lock::LockRecord;
pub use metadata::ObjectMetadata;
pub use sync::SyncOutcome;
