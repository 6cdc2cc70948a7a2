use base64::{engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::{KmsError, KmsResult};
use crate::keys::generation::derive_kid;
use crate::keys::item::KeyItem;

use super::envelope;

pub const KEY_ENCRYPTION_KEY_URI_PREFIX: &str = "azu-kms://";
const KEY_TYPE_URL: &str = "type.googleapis.com/google.crypto.tink.HpkePrivateKey";
const ONE_YEAR_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// Minimal single-entry keyset in the third-party consumer's shape: one key,
/// fixed key-id 0, ENABLED, RAW output prefix (ciphertexts carried as-is).
#[derive(Debug, Serialize, Deserialize)]
pub struct Keyset {
    pub primary_key_id: u32,
    pub key: Vec<KeysetEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeysetEntry {
    pub key_id: u32,
    pub status: String,
    pub output_prefix_type: String,
    pub key_data: KeysetKeyData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeysetKeyData {
    pub type_url: String,
    /// Base64 of private scalar followed by public key bytes.
    pub value: String,
    pub key_material_type: String,
}

/// Descriptor embedding the enveloped keyset, in the consumer's fetcher
/// shape: timestamps as millisecond strings, KEK URI naming the released kid.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionKeyDescriptor {
    pub name: String,
    pub encryption_key_type: String,
    pub public_keyset_handle: String,
    pub public_key_material: String,
    pub creation_time: String,
    pub expiration_time: String,
    pub key_data: Vec<DescriptorKeyData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorKeyData {
    pub public_key_signature: String,
    pub key_encryption_key_uri: String,
    /// JSON `{"encryptedKeyset": <envelope blob>}`.
    pub key_material: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyMaterial {
    encrypted_keyset: String,
}

fn pack_keyset(item: &KeyItem) -> KmsResult<Vec<u8>> {
    let d = item
        .d
        .as_deref()
        .ok_or_else(|| KmsError::Internal(anyhow::anyhow!("key item has no private scalar")))?;
    let mut scalars = URL_SAFE_NO_PAD.decode(d).map_err(|err| KmsError::Internal(err.into()))?;
    let public = URL_SAFE_NO_PAD
        .decode(&item.x)
        .map_err(|err| KmsError::Internal(err.into()))?;
    scalars.extend_from_slice(&public);

    let keyset = Keyset {
        primary_key_id: 0,
        key: vec![KeysetEntry {
            key_id: 0,
            status: "ENABLED".to_string(),
            output_prefix_type: "RAW".to_string(),
            key_data: KeysetKeyData {
                type_url: KEY_TYPE_URL.to_string(),
                value: STANDARD.encode(scalars),
                key_material_type: "ASYMMETRIC_PRIVATE".to_string(),
            },
        }],
    };
    serde_json::to_vec(&keyset).map_err(|err| KmsError::Internal(err.into()))
}

fn unpack_keyset(raw: &[u8]) -> KmsResult<(Vec<u8>, Vec<u8>)> {
    let keyset: Keyset = serde_json::from_slice(raw).map_err(|_| KmsError::Unwrap)?;
    let entry = keyset.key.first().ok_or(KmsError::Unwrap)?;
    if entry.key_id != keyset.primary_key_id || entry.status != "ENABLED" {
        return Err(KmsError::Unwrap);
    }
    let scalars = STANDARD
        .decode(&entry.key_data.value)
        .map_err(|_| KmsError::Unwrap)?;
    if scalars.len() != 64 {
        return Err(KmsError::Unwrap);
    }
    Ok((scalars[..32].to_vec(), scalars[32..].to_vec()))
}

/// Envelope the item as a keyset and wrap it in the consumer descriptor.
pub fn wrap_keyset(item: &KeyItem, wrapping_key: &RsaPublicKey) -> KmsResult<EncryptionKeyDescriptor> {
    let packed = pack_keyset(item)?;
    let encrypted_keyset = envelope::seal(wrapping_key, &packed)?;
    let material = KeyMaterial { encrypted_keyset };
    let expiration = item.expiry.unwrap_or(item.timestamp + ONE_YEAR_MS);
    Ok(EncryptionKeyDescriptor {
        name: format!("encryptionKeys/{}", item.id),
        encryption_key_type: "SINGLE_PARTY_HYBRID_KEY".to_string(),
        public_keyset_handle: String::new(),
        public_key_material: item.x.clone(),
        creation_time: item.timestamp.to_string(),
        expiration_time: expiration.to_string(),
        key_data: vec![DescriptorKeyData {
            public_key_signature: String::new(),
            key_encryption_key_uri: format!("{KEY_ENCRYPTION_KEY_URI_PREFIX}{}", item.kid),
            key_material: serde_json::to_string(&material)
                .map_err(|err| KmsError::Internal(err.into()))?,
        }],
    })
}

/// Recover the key item from a descriptor. The kid is re-derived from the
/// public key bytes and the ordinal suffix carried by the KEK URI.
pub fn unwrap_keyset(
    descriptor: &EncryptionKeyDescriptor,
    wrapping_key: &RsaPrivateKey,
) -> KmsResult<KeyItem> {
    let id: u32 = descriptor
        .name
        .strip_prefix("encryptionKeys/")
        .and_then(|raw| raw.parse().ok())
        .ok_or(KmsError::Unwrap)?;
    let data = descriptor.key_data.first().ok_or(KmsError::Unwrap)?;
    let kid = data
        .key_encryption_key_uri
        .strip_prefix(KEY_ENCRYPTION_KEY_URI_PREFIX)
        .ok_or(KmsError::Unwrap)?;
    let material: KeyMaterial =
        serde_json::from_str(&data.key_material).map_err(|_| KmsError::Unwrap)?;
    let packed = envelope::open(wrapping_key, &material.encrypted_keyset)?;
    let (private, public) = unpack_keyset(&packed)?;

    let ordinal = kid.rsplit('_').next().ok_or(KmsError::Unwrap)?;
    let expected = format!("{}_{}", derive_kid(&public), ordinal);
    if kid != expected {
        return Err(KmsError::Unwrap);
    }

    let timestamp: i64 = descriptor
        .creation_time
        .parse()
        .map_err(|_| KmsError::Unwrap)?;
    let expiry: i64 = descriptor
        .expiration_time
        .parse()
        .map_err(|_| KmsError::Unwrap)?;
    Ok(KeyItem {
        id,
        kid: kid.to_string(),
        kty: "OKP".to_string(),
        crv: "X25519".to_string(),
        x: URL_SAFE_NO_PAD.encode(public),
        d: Some(URL_SAFE_NO_PAD.encode(private)),
        timestamp,
        expiry: if expiry == timestamp + ONE_YEAR_MS {
            None
        } else {
            Some(expiry)
        },
        receipt: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generation::generate_key_item;

    #[test]
    fn descriptor_round_trip_preserves_key() {
        let (private, public, _) = envelope::generate_wrap_key().unwrap();
        let item = generate_key_item(100001, 1, Some(1_700_000_000_000));
        let descriptor = wrap_keyset(&item, &public).unwrap();

        assert_eq!(descriptor.name, "encryptionKeys/100001");
        assert!(descriptor.key_data[0]
            .key_encryption_key_uri
            .starts_with(KEY_ENCRYPTION_KEY_URI_PREFIX));

        let recovered = unwrap_keyset(&descriptor, &private).unwrap();
        assert_eq!(recovered, item);
    }

    #[test]
    fn keyset_entry_is_single_raw_enabled() {
        let item = generate_key_item(100001, 1, None);
        let packed = pack_keyset(&item).unwrap();
        let keyset: Keyset = serde_json::from_slice(&packed).unwrap();
        assert_eq!(keyset.primary_key_id, 0);
        assert_eq!(keyset.key.len(), 1);
        assert_eq!(keyset.key[0].key_id, 0);
        assert_eq!(keyset.key[0].status, "ENABLED");
        assert_eq!(keyset.key[0].output_prefix_type, "RAW");
    }

    #[test]
    fn wrong_private_key_fails_opaquely() {
        let (_, public, _) = envelope::generate_wrap_key().unwrap();
        let (other_private, _, _) = envelope::generate_wrap_key().unwrap();
        let item = generate_key_item(100001, 1, None);
        let descriptor = wrap_keyset(&item, &public).unwrap();
        assert!(matches!(
            unwrap_keyset(&descriptor, &other_private),
            Err(KmsError::Unwrap)
        ));
    }
}
