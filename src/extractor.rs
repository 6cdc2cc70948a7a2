use axum::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde_json::Value;

use crate::error::KmsError;

/// Who is calling, and by which authentication method. The release paths
/// dispatch on the variant, never on the payload shape.
pub enum CallerIdentity {
    /// Consortium member authenticated by the fronting layer; the member id
    /// arrives on a trusted header.
    Member { member_id: String },
    /// Workload authenticated by a platform-issued token; the decoded
    /// payload doubles as the attestation claim map.
    PlatformToken { payload: Value },
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = KmsError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(member) = parts.headers.get("x-member-id") {
            let member_id = member
                .to_str()
                .map_err(|_| KmsError::Authentication("invalid member id header".to_string()))?
                .to_string();
            if member_id.is_empty() {
                return Err(KmsError::Authentication("empty member id".to_string()));
            }
            return Ok(CallerIdentity::Member { member_id });
        }

        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| KmsError::Authentication("missing credentials".to_string()))?;

        // The fronting layer already verified the token signature against the
        // issuer policy; here only the payload is extracted.
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        let decoded = decode::<Value>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|_| KmsError::Authentication("malformed token".to_string()))?;
        Ok(CallerIdentity::PlatformToken {
            payload: decoded.claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[tokio::test]
    async fn member_header_wins() {
        let request = Request::builder()
            .header("x-member-id", "member0")
            .body(axum::body::Body::empty())
            .unwrap();
        let mut parts = request.into_parts().0;
        let identity = CallerIdentity::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert!(matches!(
            identity,
            CallerIdentity::Member { member_id } if member_id == "member0"
        ));
    }

    #[tokio::test]
    async fn bearer_token_payload_extracted() {
        let claims = serde_json::json!({"x-ms-attestation-type": "sevsnpvm"});
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        let request = Request::builder()
            .header("Authorization", format!("Bearer {token}"))
            .body(axum::body::Body::empty())
            .unwrap();
        let mut parts = request.into_parts().0;
        let identity = CallerIdentity::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        match identity {
            CallerIdentity::PlatformToken { payload } => {
                assert_eq!(payload["x-ms-attestation-type"], "sevsnpvm");
            }
            _ => panic!("expected token identity"),
        }
    }

    #[tokio::test]
    async fn missing_credentials_rejected() {
        let request = Request::builder().body(axum::body::Body::empty()).unwrap();
        let mut parts = request.into_parts().0;
        let result = CallerIdentity::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(KmsError::Authentication(_))));
    }
}
