//! Advisory file locks
//!
//! A lock is carried as a short-lived object message whose metadata
//! carries a [`LockRecord`]. Locks are advisory to cooperating clients
//! only — the backend does not enforce them. Concurrent acquisition is
//! resolved by sequence order: the lowest sequence wins; losers observe
//! the winner on their next [`crate::sync`] scan and must back off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A single advisory lock record.
///
/// The backend-assigned sequence this record's message lives at is
/// tracked separately by [`LockTable`] (observed only after the
/// message is appended), not carried as a field here — a lock's own
/// content can't name its own not-yet-assigned sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub path: String,
    pub holder_id: String,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    #[must_use]
    pub fn new(path: impl Into<String>, holder_id: impl Into<String>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(300));
        Self {
            path: path.into(),
            holder_id: holder_id.into(),
            expires_at: Utc::now() + ttl,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-memory lock table keyed by path, plus the sequence each lock's
/// backing message lives at (so a superseding or expiring lock can be
/// queued for deletion).
#[derive(Debug, Default)]
pub struct LockTable {
    locks: HashMap<String, (LockRecord, u32)>,
}

impl LockTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a newly observed lock record at `seq` into the table.
    ///
    /// Returns `true` if the record was adopted (no existing entry, or
    /// the existing entry is older/expired), `false` if the incoming
    /// record should be queued for deletion as a loser.
    pub fn observe(&mut self, record: LockRecord, seq: u32, now: DateTime<Utc>) -> bool {
        match self.locks.get(&record.path) {
            None => {
                self.locks.insert(record.path.clone(), (record, seq));
                true
            }
            Some((existing, existing_seq)) => {
                // Reverse-scan visits descending sequence, so an
                // "existing" entry was observed at a higher sequence
                // than `seq`. The earlier append (lower sequence) wins
                // unless it has since expired.
                if existing.is_expired(now) || seq < *existing_seq {
                    self.locks.insert(record.path.clone(), (record, seq));
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Remove the lock held for `path`, returning its backing sequence
    /// if one existed (queued for deletion by the release marker).
    pub fn release(&mut self, path: &str) -> Option<u32> {
        self.locks.remove(path).map(|(_, seq)| seq)
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&LockRecord> {
        self.locks.get(path).map(|(r, _)| r)
    }

    /// Drop and return the sequences of all locks that have expired as
    /// of `now`.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<u32> {
        let expired: Vec<String> = self
            .locks
            .iter()
            .filter(|(_, (r, _))| r.is_expired(now))
            .map(|(p, _)| p.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|p| self.locks.remove(&p).map(|(_, seq)| seq))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_lock_is_adopted() {
        let mut table = LockTable::new();
        let rec = LockRecord::new("f", "alice", Duration::from_secs(300));
        assert!(table.observe(rec, 1, Utc::now()));
    }

    #[test]
    fn lower_sequence_wins_on_concurrent_acquire() {
        let mut table = LockTable::new();
        let now = Utc::now();
        let winner = LockRecord::new("f", "alice", Duration::from_secs(300));
        let loser = LockRecord::new("f", "bob", Duration::from_secs(300));

        // Reverse scan sees the higher sequence (loser) first.
        assert!(table.observe(loser, 11, now));
        // Then the lower sequence (winner) should still replace it.
        assert!(table.observe(winner, 10, now));
        assert_eq!(table.get("f").unwrap().holder_id, "alice");
    }

    #[test]
    fn expired_lock_is_replaced_regardless_of_sequence() {
        let mut table = LockTable::new();
        let past_ttl = Duration::from_secs(0);
        let old = LockRecord::new("f", "alice", past_ttl);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(table.observe(old, 1, Utc::now()));

        let newer = LockRecord::new("f", "bob", Duration::from_secs(300));
        assert!(table.observe(newer, 2, Utc::now()));
        assert_eq!(table.get("f").unwrap().holder_id, "bob");
    }

    #[test]
    fn expire_removes_and_returns_sequences() {
        let mut table = LockTable::new();
        let rec = LockRecord::new("f", "alice", Duration::from_secs(0));
        table.observe(rec, 1, Utc::now());
        std::thread::sleep(std::time::Duration::from_millis(5));
        let expired = table.expire(Utc::now());
        assert_eq!(expired, vec![1]);
        assert!(table.get("f").is_none());
    }
}
