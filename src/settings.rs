use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ledger::{LedgerKv, SETTINGS_MAP};

pub const SETTINGS_KEY: &str = "settings_policy";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub name: String,
    pub description: String,
    pub version: String,
    pub debug: bool,
}

/// Governance-set service settings. `debug` gates the plaintext release mode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub service: ServiceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            service: ServiceSettings {
                name: "enclave-kms".to_string(),
                description: "Attestation-gated key release service".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                debug: false,
            },
        }
    }
}

impl Settings {
    /// Settings from the ledger, or the defaults when none were proposed.
    pub fn load(ledger: &Arc<dyn LedgerKv>) -> Settings {
        ledger
            .get(SETTINGS_MAP, SETTINGS_KEY)
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .unwrap_or_default()
    }
}
