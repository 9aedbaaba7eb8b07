//! Engine configuration
//!
//! Connection credentials belong to the backend (real IMAP or Maildir),
//! not the engine — per the source's "Global/process state" redesign
//! note, the engine only receives prepared configuration, never reads
//! credential files itself.

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// Default `buffering_max_bytes`, carried bit-exactly from the
/// source's `_IFAP_Config.buffering_max_bytes` default.
pub const DEFAULT_BUFFERING_MAX_BYTES: u64 = 102_400;

/// Default number of retained revisions per path when a file's
/// `versions` metadata key is unset.
pub const DEFAULT_VERSIONS: u32 = 1;

/// Default advisory lock time-to-live.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 300;

/// Engine-level configuration: which folder to treat as the
/// filesystem root, and the writer/retention/locking policy knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// IMAP folder (or Maildir directory) that stores this filesystem.
    pub folder: String,
    /// Stage writes in memory until the caller exits a scoped session,
    /// or until `unwritten_bytes` exceeds `buffering_max_bytes`.
    pub buffering: bool,
    pub buffering_max_bytes: u64,
    /// Retention applied when a file's metadata omits `versions`.
    pub default_versions: u32,
    /// Time-to-live for advisory locks before scan-time expiry.
    pub lock_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            folder: "FILE_STORAGE".to_string(),
            buffering: false,
            buffering_max_bytes: DEFAULT_BUFFERING_MAX_BYTES,
            default_versions: DEFAULT_VERSIONS,
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
        }
    }
}

impl EngineConfig {
    /// Load engine configuration from environment variables.
    ///
    /// Reads from `.env` file if present. All variables are optional;
    /// unset variables fall back to [`EngineConfig::default`].
    ///
    /// - `IFAP_FOLDER` (default: `FILE_STORAGE`)
    /// - `IFAP_BUFFERING` (default: `false`)
    /// - `IFAP_BUFFERING_MAX_BYTES` (default: `102400`)
    /// - `IFAP_DEFAULT_VERSIONS` (default: `1`)
    /// - `IFAP_LOCK_TTL_SECS` (default: `300`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let folder = env::var("IFAP_FOLDER").unwrap_or(defaults.folder);

        let buffering = match env::var("IFAP_BUFFERING") {
            Ok(v) => v
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IFAP_BUFFERING: {e}")))?,
            Err(_) => defaults.buffering,
        };

        let buffering_max_bytes = match env::var("IFAP_BUFFERING_MAX_BYTES") {
            Ok(v) => v
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IFAP_BUFFERING_MAX_BYTES: {e}")))?,
            Err(_) => defaults.buffering_max_bytes,
        };

        let default_versions = match env::var("IFAP_DEFAULT_VERSIONS") {
            Ok(v) => v
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IFAP_DEFAULT_VERSIONS: {e}")))?,
            Err(_) => defaults.default_versions,
        };

        let lock_ttl_secs: u64 = match env::var("IFAP_LOCK_TTL_SECS") {
            Ok(v) => v
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IFAP_LOCK_TTL_SECS: {e}")))?,
            Err(_) => DEFAULT_LOCK_TTL_SECS,
        };

        Ok(Self {
            folder,
            buffering,
            buffering_max_bytes,
            default_versions,
            lock_ttl: Duration::from_secs(lock_ttl_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source_constants() {
        let c = EngineConfig::default();
        assert_eq!(c.buffering_max_bytes, 102_400);
        assert_eq!(c.default_versions, 1);
        assert_eq!(c.lock_ttl, Duration::from_secs(300));
        assert!(!c.buffering);
    }
}
