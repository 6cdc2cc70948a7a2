use std::sync::Arc;

use axum::extract::{Extension, Query};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::attestation::{self, SnpEvidence};
use crate::error::{KmsError, KmsResult};
use crate::extractor::CallerIdentity;
use crate::keys::generation::generate_key_item;
use crate::keys::rotation::KeyRotationPolicy;
use crate::keys::{KeyItem, ReceiptOutcome};
use crate::settings::Settings;
use crate::wrapping::{self, WrapFormat};
use crate::AppState;

/// Ids carry a six-digit prefix over the mint ordinal.
const ID_BASE: u32 = 100_000;

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub kid: Option<String>,
    pub fmt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlatformQuery {
    pub kid: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KeyReleaseRequest {
    pub attestation: SnpEvidence,
    #[serde(rename = "wrappingKey")]
    pub wrapping_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnwrapRequest {
    pub attestation: SnpEvidence,
    #[serde(rename = "wrappedKid")]
    pub wrapped_kid: String,
    #[serde(rename = "wrappingKey")]
    pub wrapping_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WrappedKeyResponse {
    #[serde(rename = "wrappedKid")]
    pub wrapped_kid: String,
    pub wrapped: String,
    pub receipt: String,
}

#[derive(Debug, Serialize)]
pub struct ListedKey {
    #[serde(flatten)]
    pub key: KeyItem,
    pub deprecated: bool,
}

fn require_member(identity: &CallerIdentity) -> KmsResult<()> {
    match identity {
        CallerIdentity::Member { .. } => Ok(()),
        CallerIdentity::PlatformToken { .. } => Err(KmsError::Authentication(
            "member identity required".to_string(),
        )),
    }
}

fn hardware_format(fmt: Option<&str>) -> KmsResult<WrapFormat> {
    match WrapFormat::parse(fmt)? {
        WrapFormat::Compact => Err(KmsError::InputValidation(
            "fmt must be jwk or tink".to_string(),
        )),
        format => Ok(format),
    }
}

/// Resolve the requested kid, or walk back from the latest key past fully
/// expired ones.
fn resolve_kid(state: &AppState, requested: Option<String>) -> KmsResult<String> {
    if let Some(kid) = requested {
        return Ok(kid);
    }
    let ids = state.latest_store();
    let keys = state.key_store();
    let Some((latest, _)) = ids.latest() else {
        return Err(KmsError::InputValidation("no keys in store".to_string()));
    };
    let rotation = KeyRotationPolicy::load(&state.ledger);
    let now = Utc::now().timestamp_millis();
    for ordinal in (1..=latest).rev() {
        let Some(kid) = ids.get(ordinal) else { continue };
        let item = keys.get(&kid)?;
        let expired = rotation
            .map(|policy| policy.is_expired(&item, now).0)
            .unwrap_or(false);
        if !expired {
            return Ok(kid);
        }
    }
    Err(KmsError::NotFound("usable key".to_string()))
}

fn receipted_item(state: &AppState, kid: &str) -> KmsResult<(KeyItem, String)> {
    let store = state.key_store();
    let item = store.get(kid)?;
    match store.receipt(kid)? {
        ReceiptOutcome::Ready(receipt) => Ok((item, receipt)),
        ReceiptOutcome::Pending => Err(KmsError::Pending),
    }
}

/// Mint and store a fresh key pair. Returns the public view; the receipt
/// gate opens once the write commits.
pub async fn refresh(
    Extension(state): Extension<Arc<AppState>>,
    _identity: CallerIdentity,
) -> KmsResult<Json<KeyItem>> {
    let ids = state.latest_store();
    let ordinal = ids.size() as u32 + 1;
    let expiry = KeyRotationPolicy::load(&state.ledger)
        .map(|policy| policy.expiry_times(Utc::now().timestamp_millis()).expiry);
    let item = generate_key_item(ID_BASE + ordinal, ordinal, expiry);

    state.key_store().store_item(&item, &item.x)?;
    ids.store_item(ordinal, &item.kid);
    info!(kid = %item.kid, ordinal, "minted key pair");
    Ok(Json(item.public_only()))
}

/// Hardware-attested key release: policy, wrap-key binding and the commit
/// receipt all gate the envelope work.
pub async fn release_key(
    Extension(state): Extension<Arc<AppState>>,
    identity: CallerIdentity,
    Query(query): Query<KeyQuery>,
    Json(body): Json<KeyReleaseRequest>,
) -> KmsResult<Json<WrappedKeyResponse>> {
    require_member(&identity)?;
    let format = hardware_format(query.fmt.as_deref())?;
    let pem = body
        .wrapping_key
        .ok_or_else(|| KmsError::InputValidation("missing wrappingKey".to_string()))?;

    let claims =
        attestation::validate_hardware_attestation(&state.verifier, &state.ledger, &body.attestation)
            .await?;
    let wrapping_key = wrapping::parse_wrapping_key(&pem)?;
    wrapping::verify_wrapping_key_binding(&claims, &pem)?;

    let kid = resolve_kid(&state, query.kid)?;
    let (item, receipt) = receipted_item(&state, &kid)?;
    let wrapped = wrapping::wrap_key_item(&item, &wrapping_key, format)?;
    info!(%kid, ?format, "released wrapped key");
    Ok(Json(WrappedKeyResponse {
        wrapped_kid: kid,
        wrapped,
        receipt,
    }))
}

/// Same gates as `release_key`; answers with the named key re-wrapped under
/// the caller-proved wrap key.
pub async fn unwrap_key(
    Extension(state): Extension<Arc<AppState>>,
    identity: CallerIdentity,
    Query(query): Query<KeyQuery>,
    Json(body): Json<UnwrapRequest>,
) -> KmsResult<Json<WrappedKeyResponse>> {
    require_member(&identity)?;
    let format = hardware_format(query.fmt.as_deref())?;
    let pem = body
        .wrapping_key
        .ok_or_else(|| KmsError::InputValidation("missing wrappingKey".to_string()))?;

    let claims =
        attestation::validate_hardware_attestation(&state.verifier, &state.ledger, &body.attestation)
            .await?;
    let wrapping_key = wrapping::parse_wrapping_key(&pem)?;
    wrapping::verify_wrapping_key_binding(&claims, &pem)?;

    let (item, receipt) = receipted_item(&state, &body.wrapped_kid)?;
    let wrapped = wrapping::wrap_key_item(&item, &wrapping_key, format)?;
    info!(kid = %body.wrapped_kid, ?format, "re-wrapped key for caller");
    Ok(Json(WrappedKeyResponse {
        wrapped_kid: body.wrapped_kid,
        wrapped,
        receipt,
    }))
}

/// Platform-issued release: the token payload is both the claim map and the
/// wrap-key carrier; output is the compact record.
pub async fn platform_release(
    Extension(state): Extension<Arc<AppState>>,
    identity: CallerIdentity,
    Query(query): Query<PlatformQuery>,
) -> KmsResult<Json<WrappedKeyResponse>> {
    let CallerIdentity::PlatformToken { payload } = identity else {
        return Err(KmsError::Authentication(
            "platform token identity required".to_string(),
        ));
    };

    let claims = attestation::validate_token_claims(&state.ledger, &payload)?;
    let (wrap_kid, wrapping_key) = attestation::token::wrapping_key_from_token(&payload)?;

    let kid = resolve_kid(&state, query.kid)?;
    let (item, receipt) = receipted_item(&state, &kid)?;

    let wrapped = match query.mode.as_deref().unwrap_or("encrypted") {
        "encrypted" => wrapping::wrap_key_item(&item, &wrapping_key, WrapFormat::Compact)?,
        "plaintext" => {
            if !Settings::load(&state.ledger).service.debug {
                return Err(KmsError::InputValidation(
                    "plaintext mode requires debug settings".to_string(),
                ));
            }
            hex::encode(wrapping::compact::pack_compact(&item.without_receipt())?)
        }
        other => {
            return Err(KmsError::InputValidation(format!(
                "mode '{other}' must be encrypted or plaintext"
            )))
        }
    };
    info!(%kid, %wrap_kid, claims = claims.len(), "released key on platform path");
    Ok(Json(WrappedKeyResponse {
        wrapped_kid: kid,
        wrapped,
        receipt,
    }))
}

/// Public half of one key, receipt-gated like every other read of material.
pub async fn pubkey(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<KeyQuery>,
) -> KmsResult<Json<KeyItem>> {
    if let Some(fmt) = query.fmt.as_deref() {
        if fmt != "jwk" {
            return Err(KmsError::InputValidation(
                "fmt must be jwk".to_string(),
            ));
        }
    }
    let kid = resolve_kid(&state, query.kid)?;
    let (item, receipt) = receipted_item(&state, &kid)?;
    let mut item = item.public_only();
    item.receipt = Some(receipt);
    Ok(Json(item))
}

/// Every stored public key with its rotation status.
pub async fn listpubkeys(
    Extension(state): Extension<Arc<AppState>>,
) -> KmsResult<Json<Vec<ListedKey>>> {
    let ids = state.latest_store();
    let keys = state.key_store();
    let rotation = KeyRotationPolicy::load(&state.ledger);
    let now = Utc::now().timestamp_millis();

    let mut listed = Vec::new();
    for ordinal in 1..=ids.size() as u32 {
        let Some(kid) = ids.get(ordinal) else { continue };
        let item = keys.get(&kid)?;
        let (expired, deprecated) = rotation
            .map(|policy| policy.is_expired(&item, now))
            .unwrap_or((false, false));
        if expired {
            continue;
        }
        listed.push(ListedKey {
            key: item.public_only(),
            deprecated,
        });
    }
    Ok(Json(listed))
}
