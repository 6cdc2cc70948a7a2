pub mod attestation;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod extractor;
pub mod governance;
pub mod keys;
pub mod ledger;
pub mod release;
pub mod settings;
pub mod wrapping;

use std::sync::Arc;

use attestation::AttestationVerifier;
use governance::ActionRegistry;
use keys::{KeyStore, LatestItemStore};
use ledger::LedgerKv;

/// Shared service state injected into every handler.
pub struct AppState {
    pub ledger: Arc<dyn LedgerKv>,
    pub verifier: Arc<dyn AttestationVerifier>,
    pub registry: Arc<ActionRegistry>,
}

impl AppState {
    pub fn new(ledger: Arc<dyn LedgerKv>, verifier: Arc<dyn AttestationVerifier>) -> Self {
        Self {
            ledger,
            verifier,
            registry: Arc::new(ActionRegistry::with_default_actions()),
        }
    }

    pub fn key_store(&self) -> KeyStore {
        KeyStore::new(self.ledger.clone())
    }

    pub fn latest_store(&self) -> LatestItemStore {
        LatestItemStore::new(self.ledger.clone())
    }
}
