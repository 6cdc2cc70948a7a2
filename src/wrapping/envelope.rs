use aes_kw::KekAes256;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{rngs::OsRng, RngCore};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use sha2::{Digest, Sha256};

use crate::error::{KmsError, KmsResult};
use crate::release::{AttestationClaims, ClaimScalar};

/// Wrap key modulus size. The RSA ciphertext length equals the modulus size,
/// which is how `open` finds the envelope split point.
pub const WRAP_KEY_BITS: usize = 4096;
const RSA_CT_LEN: usize = WRAP_KEY_BITS / 8;

/// Mint an RSA wrap key pair with its kid. Used by tests and demo clients;
/// production callers prove possession of their own wrap key.
pub fn generate_wrap_key() -> KmsResult<(RsaPrivateKey, RsaPublicKey, String)> {
    let private = RsaPrivateKey::new(&mut OsRng, WRAP_KEY_BITS)
        .map_err(|err| KmsError::Internal(err.into()))?;
    let public = RsaPublicKey::from(&private);
    let pem = public_key_pem(&public)?;
    let kid = hex::encode(Sha256::digest(pem.as_bytes()));
    Ok((private, public, kid))
}

pub fn public_key_pem(key: &RsaPublicKey) -> KmsResult<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|err| KmsError::Internal(err.into()))
}

/// Parse a caller-supplied PEM wrap key.
pub fn parse_wrapping_key(pem: &str) -> KmsResult<RsaPublicKey> {
    if !pem.contains("BEGIN PUBLIC KEY") {
        return Err(KmsError::InputValidation(
            "wrappingKey must be a PEM public key".to_string(),
        ));
    }
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|_| KmsError::InputValidation("wrappingKey is not a valid RSA key".to_string()))
}

/// Attestation binding: the attested report data must commit to the wrap key
/// the caller submitted. Runs before any envelope work.
pub fn verify_wrapping_key_binding(claims: &AttestationClaims, pem: &str) -> KmsResult<()> {
    let digest = hex::encode(Sha256::digest(pem.as_bytes()));
    match claims.get("x-ms-sevsnpvm-reportdata") {
        Some(ClaimScalar::Str(report_data)) if report_data.starts_with(&digest) => Ok(()),
        _ => Err(KmsError::AttestationInvalid(
            "wrapping key does not match attested report data".to_string(),
        )),
    }
}

/// Hybrid envelope: fresh 32-byte content key, AES key-wrap-with-padding for
/// the payload, RSA-OAEP-SHA256 for the content key. One base64 blob,
/// RSA ciphertext first.
pub fn seal(wrapping_key: &RsaPublicKey, payload: &[u8]) -> KmsResult<String> {
    let mut cek = [0u8; 32];
    OsRng.fill_bytes(&mut cek);

    let kek = KekAes256::new(&cek.into());
    let wrapped_payload = kek
        .wrap_with_padding_vec(payload)
        .map_err(|err| KmsError::Internal(anyhow::anyhow!("payload wrap failed: {err}")))?;

    let mut blob = wrapping_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &cek)
        .map_err(|err| KmsError::Internal(anyhow::anyhow!("content key wrap failed: {err}")))?;
    debug_assert_eq!(blob.len(), RSA_CT_LEN);
    blob.extend_from_slice(&wrapped_payload);
    Ok(STANDARD.encode(blob))
}

/// Reverse of `seal`. Every failure mode collapses into the one opaque
/// unwrap error; nothing about the blob structure leaks to callers.
pub fn open(wrapping_key: &RsaPrivateKey, blob_b64: &str) -> KmsResult<Vec<u8>> {
    let blob = STANDARD.decode(blob_b64).map_err(|_| KmsError::Unwrap)?;
    if blob.len() <= RSA_CT_LEN {
        return Err(KmsError::Unwrap);
    }
    let cek = wrapping_key
        .decrypt(Oaep::new::<Sha256>(), &blob[..RSA_CT_LEN])
        .map_err(|_| KmsError::Unwrap)?;
    let cek: [u8; 32] = cek.as_slice().try_into().map_err(|_| KmsError::Unwrap)?;
    KekAes256::new(&cek.into())
        .unwrap_with_padding_vec(&blob[RSA_CT_LEN..])
        .map_err(|_| KmsError::Unwrap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let (private, public, _) = generate_wrap_key().unwrap();
        let payload = b"not a real key".to_vec();
        let blob = seal(&public, &payload).unwrap();
        assert_eq!(open(&private, &blob).unwrap(), payload);
    }

    #[test]
    fn tampered_blob_fails_opaquely() {
        let (private, public, _) = generate_wrap_key().unwrap();
        let blob = seal(&public, b"payload").unwrap();
        let mut raw = STANDARD.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let err = open(&private, &STANDARD.encode(raw)).unwrap_err();
        assert!(matches!(err, KmsError::Unwrap));
    }

    #[test]
    fn truncated_blob_fails_opaquely() {
        let (private, _, _) = generate_wrap_key().unwrap();
        assert!(matches!(
            open(&private, &STANDARD.encode([0u8; 16])),
            Err(KmsError::Unwrap)
        ));
        assert!(matches!(open(&private, "not-base64!"), Err(KmsError::Unwrap)));
    }

    #[test]
    fn binding_check_prefix_matches_key_digest() {
        let (_, public, _) = generate_wrap_key().unwrap();
        let pem = public_key_pem(&public).unwrap();
        let digest = hex::encode(Sha256::digest(pem.as_bytes()));

        let mut claims = AttestationClaims::new();
        claims.insert(
            "x-ms-sevsnpvm-reportdata".into(),
            ClaimScalar::Str(format!("{digest}00000000")),
        );
        assert!(verify_wrapping_key_binding(&claims, &pem).is_ok());

        claims.insert(
            "x-ms-sevsnpvm-reportdata".into(),
            ClaimScalar::Str("deadbeef".into()),
        );
        assert!(verify_wrapping_key_binding(&claims, &pem).is_err());

        claims.remove("x-ms-sevsnpvm-reportdata");
        assert!(verify_wrapping_key_binding(&claims, &pem).is_err());
    }

    #[test]
    fn pem_required_for_wrapping_key() {
        assert!(matches!(
            parse_wrapping_key("garbage"),
            Err(KmsError::InputValidation(_))
        ));
    }
}
