//! Append-only audit trail
//!
//! Records each refinement pass output and each retried provider call. Entries
//! are hash-chained: every entry commits to its predecessor, so editing or
//! dropping one is detected by [`AuditTrail::verify_integrity`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Output of one refinement pass
    Pass,
    /// A provider call that will be retried
    Retry,
    /// A refinement chain that stopped early
    ChainFailed,
}

/// One audit entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the trail
    pub sequence: u64,
    /// When it was appended
    pub timestamp: DateTime<Utc>,
    /// Entry kind
    pub kind: AuditKind,
    /// What it is about (`logic_detector_output:chain-1`, a task name)
    pub subject: String,
    /// Detail: serialized findings, error text
    pub payload: String,
    /// Hash of the previous entry
    #[serde(with = "hex::serde")]
    pub prev_hash: [u8; 32],
    /// Hash of this entry
    #[serde(with = "hex::serde")]
    pub hash: [u8; 32],
}

/// Integrity failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("audit trail integrity violation at entry {sequence}")]
pub struct AuditError {
    /// First entry that fails verification
    pub sequence: u64,
}

/// Hash-chained, append-only log shared by one run
#[derive(Debug, Default)]
pub struct AuditTrail {
    inner: Mutex<Vec<AuditEntry>>,
}

impl AuditTrail {
    /// Create empty trail
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning its sequence number
    pub fn append(&self, kind: AuditKind, subject: impl Into<String>, payload: impl Into<String>) -> u64 {
        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map_or([0u8; 32], |e| e.hash);
        let mut entry = AuditEntry {
            sequence: guard.len() as u64,
            timestamp: Utc::now(),
            kind,
            subject: subject.into(),
            payload: payload.into(),
            prev_hash,
            hash: [0u8; 32],
        };
        entry.hash = compute_hash(&entry);
        let sequence = entry.sequence;
        guard.push(entry);
        sequence
    }

    /// Copy of every entry
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().clone()
    }

    /// Entries about one subject, in order
    #[must_use]
    pub fn entries_for(&self, subject: &str) -> Vec<AuditEntry> {
        self.inner.lock().iter().filter(|e| e.subject == subject).cloned().collect()
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the trail is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Hex digest of the last entry, or of the empty chain
    #[must_use]
    pub fn head(&self) -> String {
        hex::encode(self.inner.lock().last().map_or([0u8; 32], |e| e.hash))
    }

    /// Recompute the chain
    ///
    /// # Errors
    /// `AuditError` naming the first entry whose link or hash is wrong.
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        let guard = self.inner.lock();
        let mut prev = [0u8; 32];
        for (position, e) in guard.iter().enumerate() {
            if e.sequence != position as u64 || e.prev_hash != prev || e.hash != compute_hash(e) {
                return Err(AuditError { sequence: position as u64 });
            }
            prev = e.hash;
        }
        Ok(())
    }
}

fn compute_hash(entry: &AuditEntry) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.sequence.to_le_bytes());
    hasher.update(entry.timestamp.timestamp_micros().to_le_bytes());
    hasher.update(match entry.kind {
        AuditKind::Pass => [0u8],
        AuditKind::Retry => [1u8],
        AuditKind::ChainFailed => [2u8],
    });
    hasher.update(entry.subject.as_bytes());
    hasher.update([0]);
    hasher.update(entry.payload.as_bytes());
    hasher.update([0]);
    hasher.update(entry.prev_hash);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuditTrail {
        let trail = AuditTrail::new();
        trail.append(AuditKind::Pass, "chain-0", "[]");
        trail.append(AuditKind::Retry, "logic.pass", "rate limited");
        trail.append(AuditKind::Pass, "chain-0", r#"[{"severity":"warning"}]"#);
        trail
    }

    #[test]
    fn chain_links_and_verifies() {
        let trail = sample();
        assert_eq!(trail.len(), 3);
        let entries = trail.entries();
        assert_eq!(entries[1].prev_hash, entries[0].hash);
        assert_eq!(entries[2].prev_hash, entries[1].hash);
        assert!(trail.verify_integrity().is_ok());
        assert_eq!(trail.head(), hex::encode(entries[2].hash));
    }

    #[test]
    fn tampering_is_detected() {
        let trail = sample();
        trail.inner.lock()[1].payload = "nothing happened".into();
        assert_eq!(trail.verify_integrity(), Err(AuditError { sequence: 1 }));
    }

    #[test]
    fn dropped_entry_is_detected() {
        let trail = sample();
        trail.inner.lock().remove(1);
        assert_eq!(trail.verify_integrity(), Err(AuditError { sequence: 1 }));
    }

    #[test]
    fn entries_filter_by_subject() {
        let trail = sample();
        assert_eq!(trail.entries_for("chain-0").len(), 2);
        assert!(trail.entries_for("chain-9").is_empty());
    }

    #[test]
    fn entries_serialize_hashes_as_hex() {
        let trail = sample();
        let json = serde_json::to_value(&trail.entries()[0]).unwrap();
        assert_eq!(json["prev_hash"], "0".repeat(64));
        assert_eq!(json["kind"], "pass");
    }
}
