pub mod report;
pub mod snp;
pub mod token;

use std::sync::Arc;

pub use report::{AttestationVerifier, SnpEnvelopeVerifier, SnpEvidence, SnpReport};

use crate::error::KmsResult;
use crate::ledger::LedgerKv;
use crate::release::{AttestationClaims, ReleasePolicy};

/// Hardware path: verify evidence, project claims, evaluate the release
/// policy. Returns the claims for the wrap-key binding check.
pub async fn validate_hardware_attestation(
    verifier: &Arc<dyn AttestationVerifier>,
    ledger: &Arc<dyn LedgerKv>,
    evidence: &SnpEvidence,
) -> KmsResult<AttestationClaims> {
    let report = verifier.verify(evidence).await?;
    let claims = snp::claims_from_report(&report);
    let policy = ReleasePolicy::from_ledger(ledger)?;
    policy.evaluate(&claims)
}

/// Platform path: the token payload is the claim map; same policy engine.
pub fn validate_token_claims(
    ledger: &Arc<dyn LedgerKv>,
    payload: &serde_json::Value,
) -> KmsResult<AttestationClaims> {
    let claims = token::claims_from_token(payload)?;
    let policy = ReleasePolicy::from_ledger(ledger)?;
    policy.evaluate(&claims)
}
