use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use enclave_kms::attestation::SnpEnvelopeVerifier;
use enclave_kms::ledger::InMemoryLedger;
use enclave_kms::{config, endpoints, AppState};

async fn root() -> &'static str {
    "Enclave KMS API"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();

    let ledger = Arc::new(InMemoryLedger::new());
    let state = Arc::new(AppState::new(ledger, Arc::new(SnpEnvelopeVerifier)));

    let app = Router::new()
        .route("/", get(root))
        .merge(endpoints::routes())
        .layer(Extension(state));

    let addr: SocketAddr =
        format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT).parse()?;
    tracing::info!(%addr, instance = %Uuid::new_v4(), "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
