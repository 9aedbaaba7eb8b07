//! File handles.
//!
//! Grounded on `original_source`'s `StringIO`-backed `IFAP_File`: a
//! handle owns a fully materialized byte buffer (objects fit in memory
//! per the Non-goals) and a mode. A writable handle's `close` stages
//! its buffer into the engine's pending map instead of appending
//! directly, matching the source's write-on-close behavior; the
//! source's explicit reference-cycle break is unnecessary here since
//! [`FileHandle::close`] only borrows the engine for the call.

use crate::error::{Error, Result};
use crate::metadata::ObjectMetadata;

/// How a [`FileHandle`] was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    Append,
    ReadWrite,
}

impl Mode {
    #[must_use]
    pub const fn writable(self) -> bool {
        matches!(self, Self::Write | Self::Append | Self::ReadWrite)
    }
}

/// A handle to one logical path, with its content fully buffered in
/// memory.
#[derive(Debug)]
pub struct FileHandle {
    path: String,
    mode: Mode,
    buffer: Vec<u8>,
    cursor: usize,
    pub metadata: ObjectMetadata,
    dirty: bool,
}

impl FileHandle {
    #[must_use]
    pub(crate) fn new(path: String, mode: Mode, buffer: Vec<u8>, metadata: ObjectMetadata) -> Self {
        let cursor = if mode == Mode::Append { buffer.len() } else { 0 };
        Self {
            path,
            mode,
            buffer,
            cursor,
            metadata,
            dirty: false,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Read the entire remaining buffer from the current cursor.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        if self.mode == Mode::Write {
            return Err(Error::NotFound(format!("{} was opened write-only", self.path)));
        }
        let data = self.buffer[self.cursor..].to_vec();
        self.cursor = self.buffer.len();
        Ok(data)
    }

    /// Write `data` at the current cursor, growing the buffer if
    /// needed (overwrite in place, not insert).
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if !self.mode.writable() {
            return Err(Error::NotFound(format!("{} was opened read-only", self.path)));
        }
        let end = self.cursor + data.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.cursor..end].copy_from_slice(data);
        self.cursor = end;
        self.dirty = true;
        self.metadata.bytes = self.buffer.len() as u64;
        Ok(())
    }

    /// Move the cursor to an absolute byte offset.
    pub fn seek(&mut self, offset: usize) {
        self.cursor = offset.min(self.buffer.len());
    }

    #[must_use]
    pub fn tell(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Consume the handle, returning its buffer and metadata for the
    /// engine to stage — the counterpart of the source's write-on-close.
    pub(crate) fn into_staged(self) -> (String, ObjectMetadata, Vec<u8>) {
        (self.path, self.metadata, self.buffer)
    }
}
