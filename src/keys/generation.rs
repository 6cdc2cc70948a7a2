use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use super::item::KeyItem;

/// Key id derived from the public key bytes.
pub fn derive_kid(public_key: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(public_key))
}

/// Mint a fresh X25519 key item. The kid carries the ordinal as a suffix so
/// successive keys stay distinguishable even on digest collision of inputs.
pub fn generate_key_item(id: u32, ordinal: u32, expiry: Option<i64>) -> KeyItem {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    let kid = format!("{}_{}", derive_kid(public.as_bytes()), ordinal);
    KeyItem {
        id,
        kid,
        kty: "OKP".to_string(),
        crv: "X25519".to_string(),
        x: URL_SAFE_NO_PAD.encode(public.as_bytes()),
        d: Some(URL_SAFE_NO_PAD.encode(secret.to_bytes())),
        timestamp: Utc::now().timestamp_millis(),
        expiry,
        receipt: None,
    }
}
