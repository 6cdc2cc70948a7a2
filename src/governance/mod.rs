//! Governance: the action registry and the proposal ledger that feed every
//! policy the service enforces.

pub mod actions;
pub mod proposals;

pub use actions::{ActionRegistry, GovernanceAction};
pub use proposals::{ProposalAction, ProposalBundle, ProposalLedger, ProposalOutcome};
