use serde::{Deserialize, Serialize};

/// Stored key record. `d` is the private scalar and never leaves the service
/// unwrapped; responses carry the `public_only` view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyItem {
    pub id: u32,
    pub kid: String,
    pub kty: String,
    pub crv: String,
    /// Public key, base64url.
    pub x: String,
    /// Private scalar, base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    /// Expiry, epoch milliseconds; absent keys never expire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
}

impl KeyItem {
    pub fn public_only(&self) -> KeyItem {
        KeyItem {
            d: None,
            ..self.clone()
        }
    }

    /// Copy without the receipt, the form that gets wrapped.
    pub fn without_receipt(&self) -> KeyItem {
        KeyItem {
            receipt: None,
            ..self.clone()
        }
    }
}
