use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rsa::{BigUint, RsaPublicKey};
use serde_json::Value;

use crate::error::{KmsError, KmsResult};
use crate::release::{AttestationClaims, ClaimScalar};

const WRAP_KEY_KID: &str = "HCLAkPub";

/// Claims from a platform-issued token: the payload is the claim map
/// verbatim. Nested values have no scalar projection and are skipped.
pub fn claims_from_token(payload: &Value) -> KmsResult<AttestationClaims> {
    let object = payload
        .as_object()
        .ok_or_else(|| KmsError::Authentication("token payload is not an object".to_string()))?;
    let mut claims = AttestationClaims::new();
    for (name, value) in object {
        match value {
            Value::Bool(flag) => {
                claims.insert(name.clone(), ClaimScalar::Bool(*flag));
            }
            Value::Number(number) => {
                if let Some(num) = number.as_f64() {
                    claims.insert(name.clone(), ClaimScalar::Num(num));
                }
            }
            Value::String(text) => {
                claims.insert(name.clone(), ClaimScalar::Str(text.clone()));
            }
            _ => tracing::debug!(claim = %name, "skipping non-scalar token claim"),
        }
    }
    Ok(claims)
}

/// The RSA wrapping key carried in the token's isolation-TEE runtime key
/// list. This is the only wrap-key source on the platform path; callers
/// cannot substitute their own.
pub fn wrapping_key_from_token(payload: &Value) -> KmsResult<(String, RsaPublicKey)> {
    let keys = payload
        .get("x-ms-isolation-tee")
        .and_then(|tee| tee.get("x-ms-runtime"))
        .and_then(|runtime| runtime.get("keys"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            KmsError::Authentication("token carries no isolation-tee runtime keys".to_string())
        })?;
    let jwk = keys
        .iter()
        .find(|key| key.get("kid").and_then(Value::as_str) == Some(WRAP_KEY_KID))
        .ok_or_else(|| {
            KmsError::Authentication(format!("token carries no {WRAP_KEY_KID} key"))
        })?;

    let n = jwk_component(jwk, "n")?;
    let e = jwk_component(jwk, "e")?;
    let key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .map_err(|_| KmsError::Authentication("token wrapping key is invalid".to_string()))?;
    Ok((WRAP_KEY_KID.to_string(), key))
}

fn jwk_component(jwk: &Value, field: &str) -> KmsResult<Vec<u8>> {
    let raw = jwk.get(field).and_then(Value::as_str).ok_or_else(|| {
        KmsError::Authentication(format!("token wrapping key misses {field}"))
    })?;
    URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|_| KmsError::Authentication(format!("token wrapping key {field} not base64url")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_scalars_become_claims() {
        let payload = json!({
            "x-ms-attestation-type": "sevsnpvm",
            "x-ms-sevsnpvm-vmpl": 0,
            "x-ms-sevsnpvm-is-debuggable": false,
            "x-ms-isolation-tee": {"nested": true},
        });
        let claims = claims_from_token(&payload).unwrap();
        assert_eq!(
            claims.get("x-ms-attestation-type"),
            Some(&ClaimScalar::Str("sevsnpvm".into()))
        );
        assert_eq!(
            claims.get("x-ms-sevsnpvm-vmpl"),
            Some(&ClaimScalar::Num(0.0))
        );
        assert!(!claims.contains_key("x-ms-isolation-tee"));
    }

    #[test]
    fn missing_runtime_keys_rejected() {
        let payload = json!({"x-ms-isolation-tee": {}});
        assert!(matches!(
            wrapping_key_from_token(&payload),
            Err(KmsError::Authentication(_))
        ));
    }

    #[test]
    fn wrong_kid_rejected() {
        let payload = json!({
            "x-ms-isolation-tee": {"x-ms-runtime": {"keys": [{"kid": "other"}]}}
        });
        assert!(wrapping_key_from_token(&payload).is_err());
    }
}
