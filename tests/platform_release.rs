use std::sync::Arc;

use axum::{Extension, Router};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hyper::{Body, Request, StatusCode};
use jsonwebtoken::{encode, EncodingKey, Header};
use rsa::traits::PublicKeyParts;
use serde_json::{json, Value};
use tower::ServiceExt;

use enclave_kms::attestation::SnpEnvelopeVerifier;
use enclave_kms::ledger::InMemoryLedger;
use enclave_kms::wrapping::{self, WrapFormat};
use enclave_kms::{endpoints, AppState};

fn app() -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(
        Arc::new(InMemoryLedger::new()),
        Arc::new(SnpEnvelopeVerifier),
    ));
    let router = Router::new()
        .merge(endpoints::routes())
        .layer(Extension(state.clone()));
    (router, state)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn propose(router: &Router, created_at: i64, actions: Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/app/proposals")
        .header("content-type", "application/json")
        .header("x-member-id", "member0")
        .header("x-proposal-created-at", created_at.to_string())
        .body(Body::from(json!({ "actions": actions }).to_string()))
        .unwrap();
    let (status, body) = send(router, request).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

async fn refresh(router: &Router) {
    let request = Request::builder()
        .method("POST")
        .uri("/app/refresh")
        .header("x-member-id", "member0")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
}

fn platform_token(wrap_key: &rsa::RsaPublicKey) -> String {
    let payload = json!({
        "x-ms-attestation-type": "sevsnpvm",
        "x-ms-isolation-tee": {
            "x-ms-runtime": {
                "keys": [{
                    "kid": "HCLAkPub",
                    "kty": "RSA",
                    "n": URL_SAFE_NO_PAD.encode(wrap_key.n().to_bytes_be()),
                    "e": URL_SAFE_NO_PAD.encode(wrap_key.e().to_bytes_be()),
                }]
            }
        }
    });
    encode(
        &Header::default(),
        &payload,
        &EncodingKey::from_secret(b"unchecked"),
    )
    .unwrap()
}

fn token_policy() -> Value {
    json!([{
        "name": "set_key_release_policy",
        "args": {"type": "add", "claims": {"x-ms-attestation-type": ["sevsnpvm"]}}
    }])
}

#[tokio::test]
async fn platform_path_releases_compact_record() {
    let (router, state) = app();
    propose(&router, 1_000, token_policy()).await;
    refresh(&router).await;

    let (private, public, _) = wrapping::envelope::generate_wrap_key().unwrap();
    let token = platform_token(&public);

    let request = Request::builder()
        .method("POST")
        .uri("/app/keyRelease")
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let kid = body["wrappedKid"].as_str().unwrap();
    let recovered = wrapping::unwrap_key_item(
        body["wrapped"].as_str().unwrap(),
        &private,
        WrapFormat::Compact,
    )
    .unwrap();
    let stored = state.key_store().get(kid).unwrap();
    assert_eq!(recovered.d, stored.d);
    assert_eq!(recovered.x, stored.x);
    assert_eq!(recovered.id, stored.id);
}

#[tokio::test]
async fn plaintext_mode_gated_by_debug_settings() {
    let (router, _) = app();
    propose(&router, 1_000, token_policy()).await;
    refresh(&router).await;

    let (_, public, _) = wrapping::envelope::generate_wrap_key().unwrap();
    let token = platform_token(&public);
    let request = |uri: &str| {
        Request::builder()
            .method("POST")
            .uri(uri.to_string())
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send(&router, request("/app/keyRelease?mode=plaintext")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "InputValidation");

    propose(
        &router,
        2_000,
        json!([{
            "name": "set_settings_policy",
            "args": {"settings_policy": {"service": {
                "name": "kms-test",
                "description": "debug instance",
                "version": "0.1.0",
                "debug": true
            }}}
        }]),
    )
    .await;

    let (status, body) = send(&router, request("/app/keyRelease?mode=plaintext")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    // hex record, not an envelope
    let raw = hex::decode(body["wrapped"].as_str().unwrap()).unwrap();
    assert_eq!(raw[0], 0xa4);
}

#[tokio::test]
async fn member_identity_rejected_on_platform_path() {
    let (router, _) = app();
    let request = Request::builder()
        .method("POST")
        .uri("/app/keyRelease")
        .header("x-member-id", "member0")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AuthenticationError");
}

#[tokio::test]
async fn token_without_wrap_key_rejected() {
    let (router, _) = app();
    propose(&router, 1_000, token_policy()).await;
    refresh(&router).await;

    let payload = json!({"x-ms-attestation-type": "sevsnpvm"});
    let token = encode(
        &Header::default(),
        &payload,
        &EncodingKey::from_secret(b"unchecked"),
    )
    .unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/app/keyRelease")
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AuthenticationError");
}
