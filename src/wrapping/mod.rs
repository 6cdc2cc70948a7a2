//! Envelope wrapping of released key material.

pub mod compact;
pub mod envelope;
pub mod keyset;

use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::{KmsError, KmsResult};
use crate::keys::item::KeyItem;

pub use envelope::{parse_wrapping_key, public_key_pem, verify_wrapping_key_binding};

/// Shape of the wrapped key material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapFormat {
    /// KeyItem JSON, enveloped.
    Jwk,
    /// Single-entry keyset embedded in a consumer descriptor.
    Tink,
    /// Fixed-tag binary record, platform-issued path.
    Compact,
}

impl WrapFormat {
    pub fn parse(fmt: Option<&str>) -> KmsResult<WrapFormat> {
        match fmt.unwrap_or("jwk") {
            "jwk" => Ok(WrapFormat::Jwk),
            "tink" => Ok(WrapFormat::Tink),
            "compact" => Ok(WrapFormat::Compact),
            other => Err(KmsError::InputValidation(format!(
                "fmt '{other}' must be jwk, tink or compact"
            ))),
        }
    }
}

/// Wrap a key item under the caller's RSA wrap key.
pub fn wrap_key_item(
    item: &KeyItem,
    wrapping_key: &RsaPublicKey,
    format: WrapFormat,
) -> KmsResult<String> {
    let item = item.without_receipt();
    match format {
        WrapFormat::Jwk => {
            let payload = serde_json::to_vec(&item).map_err(|err| KmsError::Internal(err.into()))?;
            envelope::seal(wrapping_key, &payload)
        }
        WrapFormat::Tink => {
            let descriptor = keyset::wrap_keyset(&item, wrapping_key)?;
            serde_json::to_string(&descriptor).map_err(|err| KmsError::Internal(err.into()))
        }
        WrapFormat::Compact => {
            let record = compact::pack_compact(&item)?;
            envelope::seal(wrapping_key, &record)
        }
    }
}

/// Recover a key item from wrapped material. All failures collapse into the
/// opaque unwrap error.
pub fn unwrap_key_item(
    wrapped: &str,
    wrapping_key: &RsaPrivateKey,
    format: WrapFormat,
) -> KmsResult<KeyItem> {
    match format {
        WrapFormat::Jwk => {
            let payload = envelope::open(wrapping_key, wrapped)?;
            serde_json::from_slice(&payload).map_err(|_| KmsError::Unwrap)
        }
        WrapFormat::Tink => {
            let descriptor: keyset::EncryptionKeyDescriptor =
                serde_json::from_str(wrapped).map_err(|_| KmsError::Unwrap)?;
            keyset::unwrap_keyset(&descriptor, wrapping_key)
        }
        WrapFormat::Compact => {
            let record = envelope::open(wrapping_key, wrapped)?;
            compact::unpack_compact(&record)
        }
    }
}
