use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ledger::{LedgerKv, ROTATION_POLICY_MAP};

use super::item::KeyItem;

pub const ROTATION_POLICY_KEY: &str = "key_rotation_policy";

/// Governance-set rotation windows, seconds. Non-negativity is enforced when
/// the policy is proposed, so `expiry_and_grace >= expiry` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRotationPolicy {
    pub rotation_interval_seconds: i64,
    pub grace_period_seconds: i64,
}

impl Default for KeyRotationPolicy {
    fn default() -> Self {
        KeyRotationPolicy {
            rotation_interval_seconds: 300,
            grace_period_seconds: 60,
        }
    }
}

/// Absolute expiry instants for one key, epoch milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiryTimes {
    pub expiry: i64,
    pub expiry_and_grace: i64,
}

impl KeyRotationPolicy {
    /// The configured policy, or None when rotation was never proposed
    /// (keys then never expire).
    pub fn load(ledger: &Arc<dyn LedgerKv>) -> Option<KeyRotationPolicy> {
        ledger
            .get(ROTATION_POLICY_MAP, ROTATION_POLICY_KEY)
            .and_then(|raw| serde_json::from_slice(&raw).ok())
    }

    pub fn expiry_times(&self, creation_ms: i64) -> ExpiryTimes {
        let expiry = creation_ms + self.rotation_interval_seconds * 1000;
        ExpiryTimes {
            expiry,
            expiry_and_grace: expiry + self.grace_period_seconds * 1000,
        }
    }

    /// `(expired, deprecated)` for an item at `now_ms`. A key past its expiry
    /// is both expired and deprecated; keys without expiry never rotate.
    ///
    /// The deprecated-only branch requires `grace_end < now <= expiry`, which
    /// a non-negative grace period never produces.
    pub fn is_expired(&self, item: &KeyItem, now_ms: i64) -> (bool, bool) {
        let Some(expiry) = item.expiry else {
            return (false, false);
        };
        let grace_end = expiry + self.grace_period_seconds * 1000;
        if now_ms > expiry {
            (true, true)
        } else if now_ms > grace_end {
            (false, true)
        } else {
            (false, false)
        }
    }
}
