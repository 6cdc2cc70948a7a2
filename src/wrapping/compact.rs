use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::error::{KmsError, KmsResult};
use crate::keys::generation::derive_kid;
use crate::keys::item::KeyItem;

// COSE_Key-style map header and parameter tags. The record layout is fixed:
// header, kty, crv, x (32), d (32), kid tag, id (u32 BE).
const HEADER: u8 = 0xa4;
const TAG_KTY_OKP: [u8; 2] = [0x01, 0x01];
const TAG_CRV_X25519: [u8; 2] = [0x03, 0x04];
const TAG_KID: [u8; 2] = [0x04, 0x44];
const SCALAR_LEN: usize = 32;
const RECORD_LEN: usize = 1 + 2 + 2 + SCALAR_LEN + SCALAR_LEN + 2 + 4;

/// Pack a key item into the fixed-tag binary record used on the
/// platform-issued path.
pub fn pack_compact(item: &KeyItem) -> KmsResult<Vec<u8>> {
    let d = item
        .d
        .as_deref()
        .ok_or_else(|| KmsError::Internal(anyhow::anyhow!("key item has no private scalar")))?;
    let x = URL_SAFE_NO_PAD
        .decode(&item.x)
        .map_err(|err| KmsError::Internal(err.into()))?;
    let d = URL_SAFE_NO_PAD
        .decode(d)
        .map_err(|err| KmsError::Internal(err.into()))?;
    if x.len() != SCALAR_LEN || d.len() != SCALAR_LEN {
        return Err(KmsError::Internal(anyhow::anyhow!(
            "key scalars have unexpected length"
        )));
    }

    let mut record = Vec::with_capacity(RECORD_LEN);
    record.push(HEADER);
    record.extend_from_slice(&TAG_KTY_OKP);
    record.extend_from_slice(&TAG_CRV_X25519);
    record.extend_from_slice(&x);
    record.extend_from_slice(&d);
    record.extend_from_slice(&TAG_KID);
    record.extend_from_slice(&item.id.to_be_bytes());
    Ok(record)
}

/// Reverse of `pack_compact`. The kid is re-derived from the public key
/// bytes; the record carries no timestamps or ordinal suffix.
pub fn unpack_compact(record: &[u8]) -> KmsResult<KeyItem> {
    if record.len() != RECORD_LEN
        || record[0] != HEADER
        || record[1..3] != TAG_KTY_OKP
        || record[3..5] != TAG_CRV_X25519
        || record[5 + 2 * SCALAR_LEN..7 + 2 * SCALAR_LEN] != TAG_KID
    {
        return Err(KmsError::Unwrap);
    }
    let x = &record[5..5 + SCALAR_LEN];
    let d = &record[5 + SCALAR_LEN..5 + 2 * SCALAR_LEN];
    let id = u32::from_be_bytes(record[RECORD_LEN - 4..].try_into().map_err(|_| KmsError::Unwrap)?);
    Ok(KeyItem {
        id,
        kid: derive_kid(x),
        kty: "OKP".to_string(),
        crv: "X25519".to_string(),
        x: URL_SAFE_NO_PAD.encode(x),
        d: Some(URL_SAFE_NO_PAD.encode(d)),
        timestamp: 0,
        expiry: None,
        receipt: None,
    })
}
