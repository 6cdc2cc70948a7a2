use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Private key items, kid -> KeyItem.
pub const KEY_MAP: &str = "kms.keys";
/// Numeric ordinal -> kid of the key minted under that ordinal.
pub const KEY_ID_MAP: &str = "kms.key_ids";
/// Key release policy, one entry per claim name plus the operator sub-maps.
pub const RELEASE_POLICY_MAP: &str = "public:policies.key_release";
/// Key rotation policy, single entry.
pub const ROTATION_POLICY_MAP: &str = "public:policies.key_rotation";
/// Service settings policy, single entry.
pub const SETTINGS_MAP: &str = "public:policies.settings";
/// Token validation policies keyed by issuer.
pub const JWT_VALIDATION_MAP: &str = "public:policies.jwt_validation";
/// Accepted governance proposals keyed by digest, plus bookkeeping entries.
pub const PROPOSAL_MAP: &str = "governance.proposals";

/// Receipt proving a write was committed by the ledger at a given version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub version: u64,
    pub root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims_digest: Option<String>,
    pub node_signature: String,
}

/// Committed ledger state for one version.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerState {
    pub receipt: CommitReceipt,
}

/// Transactional key-value store the service persists everything in.
///
/// Writes are versioned by a global transaction counter; receipts exist only
/// for versions at or below the commit watermark. `set_claims_digest` binds an
/// application digest to the next write's receipt.
pub trait LedgerKv: Send + Sync {
    fn get(&self, map: &str, key: &str) -> Option<Vec<u8>>;
    fn set(&self, map: &str, key: &str, value: Vec<u8>);
    fn delete(&self, map: &str, key: &str) -> bool;
    fn has(&self, map: &str, key: &str) -> bool;
    fn size(&self, map: &str) -> usize;
    fn keys(&self, map: &str) -> Vec<String>;
    fn version_of_previous_write(&self, map: &str, key: &str) -> Option<u64>;
    /// Committed states for `[low, high]`, or None when the range is not yet
    /// committed. A point-in-time check, never a wait.
    fn state_range(&self, low: u64, high: u64, timeout_ms: u64) -> Option<Vec<LedgerState>>;
    fn set_claims_digest(&self, digest: [u8; 32]);
}

/// In-memory ledger with an explicit commit watermark standing in for
/// consensus. The binary runs with auto-commit; tests hold the watermark back
/// to exercise the pending path.
pub struct InMemoryLedger {
    maps: DashMap<String, DashMap<String, Vec<u8>>>,
    versions: DashMap<String, u64>,
    claims_by_version: DashMap<u64, [u8; 32]>,
    pending_claims: Mutex<Option<[u8; 32]>>,
    next_version: AtomicU64,
    committed: AtomicU64,
    auto_commit: bool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_auto_commit(true)
    }

    /// Ledger whose writes stay uncommitted until `commit_all` is called.
    pub fn uncommitted() -> Self {
        Self::with_auto_commit(false)
    }

    fn with_auto_commit(auto_commit: bool) -> Self {
        Self {
            maps: DashMap::new(),
            versions: DashMap::new(),
            claims_by_version: DashMap::new(),
            pending_claims: Mutex::new(None),
            next_version: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            auto_commit,
        }
    }

    /// Advance the commit watermark over every write made so far.
    pub fn commit_all(&self) {
        self.committed
            .store(self.next_version.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    fn version_key(map: &str, key: &str) -> String {
        format!("{map}\u{0}{key}")
    }

    fn receipt_for(&self, version: u64) -> CommitReceipt {
        // Deterministic synthetic receipt: repeated lookups for the same
        // version observe identical bytes.
        let root = hex::encode(Sha256::digest(version.to_be_bytes()));
        let node_signature = hex::encode(Sha256::digest(format!("sig:{version}").as_bytes()));
        let claims_digest = self
            .claims_by_version
            .get(&version)
            .map(|digest| hex::encode(*digest));
        CommitReceipt {
            version,
            root,
            claims_digest,
            node_signature,
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerKv for InMemoryLedger {
    fn get(&self, map: &str, key: &str) -> Option<Vec<u8>> {
        self.maps.get(map)?.get(key).map(|value| value.clone())
    }

    fn set(&self, map: &str, key: &str, value: Vec<u8>) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(digest) = self.pending_claims.lock().unwrap().take() {
            self.claims_by_version.insert(version, digest);
        }
        self.maps
            .entry(map.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.versions.insert(Self::version_key(map, key), version);
        if self.auto_commit {
            self.committed.store(version, Ordering::SeqCst);
        }
    }

    fn delete(&self, map: &str, key: &str) -> bool {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        if self.auto_commit {
            self.committed.store(version, Ordering::SeqCst);
        }
        self.versions.remove(&Self::version_key(map, key));
        match self.maps.get(map) {
            Some(entries) => entries.remove(key).is_some(),
            None => false,
        }
    }

    fn has(&self, map: &str, key: &str) -> bool {
        self.maps
            .get(map)
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    fn size(&self, map: &str) -> usize {
        self.maps.get(map).map(|entries| entries.len()).unwrap_or(0)
    }

    fn keys(&self, map: &str) -> Vec<String> {
        self.maps
            .get(map)
            .map(|entries| entries.iter().map(|entry| entry.key().clone()).collect())
            .unwrap_or_default()
    }

    fn version_of_previous_write(&self, map: &str, key: &str) -> Option<u64> {
        self.versions
            .get(&Self::version_key(map, key))
            .map(|version| *version)
    }

    fn state_range(&self, low: u64, high: u64, _timeout_ms: u64) -> Option<Vec<LedgerState>> {
        if low == 0 || low > high || high > self.committed.load(Ordering::SeqCst) {
            return None;
        }
        Some(
            (low..=high)
                .map(|version| LedgerState {
                    receipt: self.receipt_for(version),
                })
                .collect(),
        )
    }

    fn set_claims_digest(&self, digest: [u8; 32]) {
        *self.pending_claims.lock().unwrap() = Some(digest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_versioned_and_readable() {
        let ledger = InMemoryLedger::new();
        ledger.set(KEY_MAP, "a", b"one".to_vec());
        ledger.set(KEY_MAP, "b", b"two".to_vec());
        assert_eq!(ledger.get(KEY_MAP, "a"), Some(b"one".to_vec()));
        assert_eq!(ledger.size(KEY_MAP), 2);
        assert_eq!(ledger.version_of_previous_write(KEY_MAP, "a"), Some(1));
        assert_eq!(ledger.version_of_previous_write(KEY_MAP, "b"), Some(2));
    }

    #[test]
    fn state_range_tracks_commit_watermark() {
        let ledger = InMemoryLedger::uncommitted();
        ledger.set(KEY_MAP, "a", b"one".to_vec());
        assert!(ledger.state_range(1, 1, 100).is_none());
        ledger.commit_all();
        let states = ledger.state_range(1, 1, 100).expect("committed");
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].receipt.version, 1);
    }

    #[test]
    fn receipts_are_deterministic() {
        let ledger = InMemoryLedger::new();
        ledger.set_claims_digest([7u8; 32]);
        ledger.set(KEY_MAP, "a", b"one".to_vec());
        let first = ledger.state_range(1, 1, 100).unwrap();
        let second = ledger.state_range(1, 1, 100).unwrap();
        assert_eq!(first[0].receipt, second[0].receipt);
        assert_eq!(
            first[0].receipt.claims_digest.as_deref(),
            Some(hex::encode([7u8; 32]).as_str())
        );
    }

    #[test]
    fn claims_digest_binds_to_next_write_only() {
        let ledger = InMemoryLedger::new();
        ledger.set_claims_digest([1u8; 32]);
        ledger.set(KEY_MAP, "a", b"one".to_vec());
        ledger.set(KEY_MAP, "b", b"two".to_vec());
        let states = ledger.state_range(1, 2, 100).unwrap();
        assert!(states[0].receipt.claims_digest.is_some());
        assert!(states[1].receipt.claims_digest.is_none());
    }
}
