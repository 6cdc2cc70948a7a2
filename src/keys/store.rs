use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config;
use crate::error::{KmsError, KmsResult};
use crate::ledger::{LedgerKv, KEY_ID_MAP, KEY_MAP};

use super::item::KeyItem;

/// Point-in-time commit receipt outcome for a stored key.
#[derive(Clone, Debug, PartialEq)]
pub enum ReceiptOutcome {
    /// Serialized receipt proving the write committed.
    Ready(String),
    /// Not committed yet; callers answer with a retry hint.
    Pending,
}

/// Key items keyed by kid, with a claims digest bound to every write.
pub struct KeyStore {
    ledger: Arc<dyn LedgerKv>,
}

impl KeyStore {
    pub fn new(ledger: Arc<dyn LedgerKv>) -> Self {
        Self { ledger }
    }

    /// Store an item, binding sha256(claims) to the write's receipt. Items
    /// are append-only; an existing kid is never overwritten.
    pub fn store_item(&self, item: &KeyItem, claims: &str) -> KmsResult<()> {
        if self.ledger.has(KEY_MAP, &item.kid) {
            return Err(KmsError::InputValidation(format!(
                "key {} already exists",
                item.kid
            )));
        }
        let digest: [u8; 32] = Sha256::digest(claims.as_bytes()).into();
        self.ledger.set_claims_digest(digest);
        let raw = serde_json::to_vec(item).map_err(|err| KmsError::Internal(err.into()))?;
        self.ledger.set(KEY_MAP, &item.kid, raw);
        tracing::info!(kid = %item.kid, id = item.id, "key item stored");
        Ok(())
    }

    pub fn get(&self, kid: &str) -> KmsResult<KeyItem> {
        let raw = self
            .ledger
            .get(KEY_MAP, kid)
            .ok_or_else(|| KmsError::NotFound(format!("key {kid}")))?;
        serde_json::from_slice(&raw).map_err(|err| KmsError::Internal(err.into()))
    }

    /// Resolve the write version and ask for exactly that version's committed
    /// state. A miss means the consensus round is still open.
    pub fn receipt(&self, kid: &str) -> KmsResult<ReceiptOutcome> {
        let Some(version) = self.ledger.version_of_previous_write(KEY_MAP, kid) else {
            return Ok(ReceiptOutcome::Pending);
        };
        match self
            .ledger
            .state_range(version, version, *config::RECEIPT_TIMEOUT_MS)
        {
            Some(states) if !states.is_empty() => {
                let receipt = serde_json::to_string(&states[0].receipt)
                    .map_err(|err| KmsError::Internal(err.into()))?;
                Ok(ReceiptOutcome::Ready(receipt))
            }
            _ => Ok(ReceiptOutcome::Pending),
        }
    }
}

/// Ordinal -> kid map tracking mint order.
pub struct LatestItemStore {
    ledger: Arc<dyn LedgerKv>,
}

impl LatestItemStore {
    pub fn new(ledger: Arc<dyn LedgerKv>) -> Self {
        Self { ledger }
    }

    pub fn size(&self) -> usize {
        self.ledger.size(KEY_ID_MAP)
    }

    pub fn store_item(&self, ordinal: u32, kid: &str) {
        self.ledger
            .set(KEY_ID_MAP, &ordinal.to_string(), kid.as_bytes().to_vec());
    }

    pub fn get(&self, ordinal: u32) -> Option<String> {
        self.ledger
            .get(KEY_ID_MAP, &ordinal.to_string())
            .and_then(|raw| String::from_utf8(raw).ok())
    }

    /// The most recently minted (ordinal, kid), if any.
    pub fn latest(&self) -> Option<(u32, String)> {
        let ordinal = self.size() as u32;
        if ordinal == 0 {
            return None;
        }
        self.get(ordinal).map(|kid| (ordinal, kid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generation::generate_key_item;
    use crate::ledger::InMemoryLedger;

    fn stores(auto_commit: bool) -> (Arc<InMemoryLedger>, KeyStore, LatestItemStore) {
        let ledger = Arc::new(if auto_commit {
            InMemoryLedger::new()
        } else {
            InMemoryLedger::uncommitted()
        });
        let dyn_ledger: Arc<dyn LedgerKv> = ledger.clone();
        (
            ledger,
            KeyStore::new(dyn_ledger.clone()),
            LatestItemStore::new(dyn_ledger),
        )
    }

    #[test]
    fn receipt_pending_until_commit_then_stable() {
        let (ledger, keys, _) = stores(false);
        let item = generate_key_item(100001, 1, None);
        keys.store_item(&item, &item.x).unwrap();

        assert_eq!(keys.receipt(&item.kid).unwrap(), ReceiptOutcome::Pending);
        assert_eq!(keys.receipt(&item.kid).unwrap(), ReceiptOutcome::Pending);

        ledger.commit_all();
        let first = keys.receipt(&item.kid).unwrap();
        let second = keys.receipt(&item.kid).unwrap();
        assert!(matches!(first, ReceiptOutcome::Ready(_)));
        assert_eq!(first, second);
    }

    #[test]
    fn items_are_append_only() {
        let (_, keys, _) = stores(true);
        let item = generate_key_item(100001, 1, None);
        keys.store_item(&item, &item.x).unwrap();
        assert!(keys.store_item(&item, &item.x).is_err());
    }

    #[test]
    fn latest_tracks_mint_order() {
        let (_, keys, ids) = stores(true);
        assert!(ids.latest().is_none());
        for ordinal in 1..=3u32 {
            let item = generate_key_item(100000 + ordinal, ordinal, None);
            keys.store_item(&item, &item.x).unwrap();
            ids.store_item(ordinal, &item.kid);
        }
        let (ordinal, kid) = ids.latest().unwrap();
        assert_eq!(ordinal, 3);
        assert_eq!(keys.get(&kid).unwrap().id, 100003);
    }

    #[test]
    fn missing_key_is_not_found() {
        let (_, keys, _) = stores(true);
        assert!(matches!(keys.get("nope"), Err(KmsError::NotFound(_))));
    }
}
