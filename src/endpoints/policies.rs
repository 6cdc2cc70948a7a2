use std::sync::Arc;

use axum::extract::Extension;
use axum::Json;
use serde_json::{json, Value};

use crate::error::{KmsError, KmsResult};
use crate::keys::rotation::KeyRotationPolicy;
use crate::release::ReleasePolicy;
use crate::settings::Settings;
use crate::AppState;

pub async fn key_release_policy(
    Extension(state): Extension<Arc<AppState>>,
) -> KmsResult<Json<ReleasePolicy>> {
    Ok(Json(ReleasePolicy::from_ledger(&state.ledger)?))
}

/// The configured rotation policy, or an empty object when rotation was
/// never proposed and keys never expire.
pub async fn key_rotation_policy(
    Extension(state): Extension<Arc<AppState>>,
) -> KmsResult<Json<Value>> {
    let snapshot = KeyRotationPolicy::load(&state.ledger)
        .map(serde_json::to_value)
        .transpose()
        .map_err(|err| KmsError::Internal(err.into()))?
        .unwrap_or_else(|| json!({}));
    Ok(Json(snapshot))
}

pub async fn settings_policy(
    Extension(state): Extension<Arc<AppState>>,
) -> KmsResult<Json<Settings>> {
    Ok(Json(Settings::load(&state.ledger)))
}
