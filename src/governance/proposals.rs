use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{KmsError, KmsResult};
use crate::ledger::{LedgerKv, PROPOSAL_MAP};

use super::actions::ActionRegistry;

/// Accepted proposals retained for inspection; older ones are evicted.
pub const PROPOSAL_RETENTION: usize = 5;

const LAST_ACCEPTED_KEY: &str = "meta.last_accepted_at";
const INDEX_KEY: &str = "meta.index";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalAction {
    pub name: String,
    pub args: Value,
}

/// Proposal body as submitted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalBundle {
    pub actions: Vec<ProposalAction>,
}

/// Accepted proposal as persisted under its digest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub proposal_id: String,
    pub proposer_id: String,
    pub created_at: i64,
    pub actions: Vec<ProposalAction>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalOutcome {
    pub proposal_id: String,
    pub proposer_id: String,
    pub state: String,
}

/// Ordered, bounded ledger of accepted governance proposals.
pub struct ProposalLedger {
    ledger: Arc<dyn LedgerKv>,
}

impl ProposalLedger {
    pub fn new(ledger: Arc<dyn LedgerKv>) -> Self {
        Self { ledger }
    }

    /// Validate and apply a proposal. Ordering is checked first, then every
    /// action validates, then every action applies; a validation failure
    /// leaves the ledger untouched.
    pub fn submit(
        &self,
        registry: &ActionRegistry,
        proposer_id: &str,
        created_at: i64,
        bundle: &ProposalBundle,
    ) -> KmsResult<Vec<ProposalOutcome>> {
        if bundle.actions.is_empty() {
            return Err(KmsError::InputValidation(
                "proposal carries no actions".to_string(),
            ));
        }
        let last_accepted = self.last_accepted_at();
        if created_at <= last_accepted {
            return Err(KmsError::GovernanceOrdering(format!(
                "proposal created at {created_at} does not postdate {last_accepted}"
            )));
        }

        let mut handlers = Vec::with_capacity(bundle.actions.len());
        for action in &bundle.actions {
            let handler = registry.get(&action.name).ok_or_else(|| {
                KmsError::InputValidation(format!("unknown action {}", action.name))
            })?;
            handler.validate(&action.args)?;
            handlers.push(handler);
        }
        for (handler, action) in handlers.iter().zip(&bundle.actions) {
            handler.apply(&self.ledger, &action.args)?;
        }

        // the timestamp is part of the digest: identical bodies resubmitted
        // at later instants are distinct proposals
        let canonical = serde_json::to_vec(&(created_at, &bundle.actions))
            .map_err(|err| KmsError::Internal(err.into()))?;
        let proposal_id = hex::encode(Sha256::digest(&canonical));
        let record = ProposalRecord {
            proposal_id: proposal_id.clone(),
            proposer_id: proposer_id.to_string(),
            created_at,
            actions: bundle.actions.clone(),
        };
        self.persist(&record)?;
        tracing::info!(%proposal_id, proposer = %proposer_id, actions = bundle.actions.len(), "proposal accepted");

        Ok(bundle
            .actions
            .iter()
            .map(|_| ProposalOutcome {
                proposal_id: proposal_id.clone(),
                proposer_id: proposer_id.to_string(),
                state: "Accepted".to_string(),
            })
            .collect())
    }

    /// Accepted proposals still retained, oldest first.
    pub fn retained(&self) -> KmsResult<Vec<ProposalRecord>> {
        let mut records = Vec::new();
        for (_, digest) in self.index() {
            if let Some(raw) = self.ledger.get(PROPOSAL_MAP, &digest) {
                let record =
                    serde_json::from_slice(&raw).map_err(|err| KmsError::Internal(err.into()))?;
                records.push(record);
            }
        }
        Ok(records)
    }

    fn last_accepted_at(&self) -> i64 {
        self.ledger
            .get(PROPOSAL_MAP, LAST_ACCEPTED_KEY)
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .unwrap_or(0)
    }

    fn index(&self) -> Vec<(i64, String)> {
        self.ledger
            .get(PROPOSAL_MAP, INDEX_KEY)
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .unwrap_or_default()
    }

    fn persist(&self, record: &ProposalRecord) -> KmsResult<()> {
        self.ledger.set(
            PROPOSAL_MAP,
            &record.proposal_id,
            serde_json::to_vec(record).map_err(|err| KmsError::Internal(err.into()))?,
        );
        self.ledger.set(
            PROPOSAL_MAP,
            LAST_ACCEPTED_KEY,
            serde_json::to_vec(&record.created_at).map_err(|err| KmsError::Internal(err.into()))?,
        );

        let mut index = self.index();
        index.push((record.created_at, record.proposal_id.clone()));
        while index.len() > PROPOSAL_RETENTION {
            let (_, evicted) = index.remove(0);
            self.ledger.delete(PROPOSAL_MAP, &evicted);
            tracing::debug!(digest = %evicted, "evicted retained proposal");
        }
        self.ledger.set(
            PROPOSAL_MAP,
            INDEX_KEY,
            serde_json::to_vec(&index).map_err(|err| KmsError::Internal(err.into()))?,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::release::ReleasePolicy;
    use serde_json::json;

    fn setup() -> (Arc<dyn LedgerKv>, ProposalLedger, ActionRegistry) {
        let ledger: Arc<dyn LedgerKv> = Arc::new(InMemoryLedger::new());
        let proposals = ProposalLedger::new(ledger.clone());
        (ledger, proposals, ActionRegistry::with_default_actions())
    }

    fn release_bundle(value: &str) -> ProposalBundle {
        ProposalBundle {
            actions: vec![ProposalAction {
                name: "set_key_release_policy".to_string(),
                args: json!({
                    "type": "add",
                    "claims": {"x-ms-attestation-type": [value]}
                }),
            }],
        }
    }

    #[test]
    fn accepted_proposal_reports_digest_id() {
        let (_, proposals, registry) = setup();
        let outcomes = proposals
            .submit(&registry, "member0", 1_000, &release_bundle("snp"))
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].state, "Accepted");
        assert_eq!(outcomes[0].proposal_id.len(), 64);
        assert_eq!(outcomes[0].proposer_id, "member0");
    }

    #[test]
    fn stale_proposal_rejected_and_policy_untouched() {
        let (ledger, proposals, registry) = setup();
        proposals
            .submit(&registry, "member0", 2_000, &release_bundle("snp"))
            .unwrap();
        let err = proposals
            .submit(&registry, "member0", 2_000, &release_bundle("tdx"))
            .unwrap_err();
        assert!(matches!(err, KmsError::GovernanceOrdering(_)));

        let policy = ReleasePolicy::from_ledger(&ledger).unwrap();
        assert_eq!(policy.claims["x-ms-attestation-type"].len(), 1);
    }

    #[test]
    fn validation_failure_aborts_before_any_apply() {
        let (ledger, proposals, registry) = setup();
        let bundle = ProposalBundle {
            actions: vec![
                ProposalAction {
                    name: "set_key_release_policy".to_string(),
                    args: json!({
                        "type": "add",
                        "claims": {"x-ms-attestation-type": "snp"}
                    }),
                },
                ProposalAction {
                    name: "set_key_release_policy".to_string(),
                    args: json!({
                        "type": "add",
                        "claims": {"bogus-claim": "x"}
                    }),
                },
            ],
        };
        assert!(proposals.submit(&registry, "member0", 1_000, &bundle).is_err());
        let policy = ReleasePolicy::from_ledger(&ledger).unwrap();
        assert!(policy.claims.is_empty());
    }

    #[test]
    fn retention_keeps_exactly_five() {
        let (_, proposals, registry) = setup();
        for round in 1..=7i64 {
            proposals
                .submit(
                    &registry,
                    "member0",
                    round * 1_000,
                    &release_bundle(&format!("snp-{round}")),
                )
                .unwrap();
        }
        let retained = proposals.retained().unwrap();
        assert_eq!(retained.len(), PROPOSAL_RETENTION);
        assert_eq!(retained.first().unwrap().created_at, 3_000);
        assert_eq!(retained.last().unwrap().created_at, 7_000);
    }

    #[test]
    fn duplicate_bodies_stay_distinct_and_retained() {
        let (_, proposals, registry) = setup();
        let first = proposals
            .submit(&registry, "member0", 1_000, &release_bundle("snp"))
            .unwrap();
        let second = proposals
            .submit(&registry, "member0", 2_000, &release_bundle("snp"))
            .unwrap();
        assert_ne!(first[0].proposal_id, second[0].proposal_id);

        for round in 3..=6i64 {
            proposals
                .submit(
                    &registry,
                    "member0",
                    round * 1_000,
                    &release_bundle(&format!("snp-{round}")),
                )
                .unwrap();
        }
        let retained = proposals.retained().unwrap();
        assert_eq!(retained.len(), PROPOSAL_RETENTION);
        assert_eq!(retained.first().unwrap().created_at, 2_000);
    }

    #[test]
    fn unknown_action_rejected() {
        let (_, proposals, registry) = setup();
        let bundle = ProposalBundle {
            actions: vec![ProposalAction {
                name: "set_constitution".to_string(),
                args: json!({}),
            }],
        };
        assert!(matches!(
            proposals.submit(&registry, "member0", 1_000, &bundle),
            Err(KmsError::InputValidation(_))
        ));
    }
}
