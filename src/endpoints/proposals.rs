use std::sync::Arc;

use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;

use crate::error::{KmsError, KmsResult};
use crate::extractor::CallerIdentity;
use crate::governance::{ProposalBundle, ProposalLedger, ProposalOutcome};
use crate::AppState;

/// Creation timestamp stamped on the proposal's signing envelope by the
/// member's tooling, epoch milliseconds.
const CREATED_AT_HEADER: &str = "x-proposal-created-at";

pub async fn submit_proposal(
    Extension(state): Extension<Arc<AppState>>,
    identity: CallerIdentity,
    headers: HeaderMap,
    Json(bundle): Json<ProposalBundle>,
) -> KmsResult<Json<Vec<ProposalOutcome>>> {
    let CallerIdentity::Member { member_id } = identity else {
        return Err(KmsError::Authentication(
            "only members can submit proposals".to_string(),
        ));
    };
    let created_at: i64 = headers
        .get(CREATED_AT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| {
            KmsError::InputValidation(format!("missing or invalid {CREATED_AT_HEADER} header"))
        })?;

    let proposals = ProposalLedger::new(state.ledger.clone());
    let outcomes = proposals.submit(&state.registry, &member_id, created_at, &bundle)?;
    Ok(Json(outcomes))
}
