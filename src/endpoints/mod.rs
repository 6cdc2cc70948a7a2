pub mod keys;
pub mod policies;
pub mod proposals;

use axum::routing::{get, post};
use axum::Router;

pub fn routes() -> Router {
    Router::new()
        .route("/app/key", post(keys::release_key))
        .route("/app/unwrapKey", post(keys::unwrap_key))
        .route("/app/keyRelease", post(keys::platform_release))
        .route("/app/refresh", post(keys::refresh))
        .route("/app/pubkey", get(keys::pubkey))
        .route("/app/listpubkeys", get(keys::listpubkeys))
        .route("/app/keyReleasePolicy", get(policies::key_release_policy))
        .route("/app/keyRotationPolicy", get(policies::key_rotation_policy))
        .route("/app/settingsPolicy", get(policies::settings_policy))
        .route("/app/proposals", post(proposals::submit_proposal))
}
