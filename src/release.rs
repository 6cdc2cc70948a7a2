use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{KmsError, KmsResult};
use crate::ledger::{LedgerKv, RELEASE_POLICY_MAP};

/// Claim names a release policy may reference.
pub const ALLOWED_CLAIMS: &[&str] = &[
    "x-ms-attestation-type",
    "x-ms-compliance-status",
    "x-ms-policy-hash",
    "vm-configuration-secure-boot",
    "vm-configuration-secure-boot-template-id",
    "vm-configuration-tpm-enabled",
    "vm-configuration-vmUniqueId",
    "x-ms-sevsnpvm-authorkeydigest",
    "x-ms-sevsnpvm-bootloader-svn",
    "x-ms-sevsnpvm-familyId",
    "x-ms-sevsnpvm-guestsvn",
    "x-ms-sevsnpvm-hostdata",
    "x-ms-sevsnpvm-idkeydigest",
    "x-ms-sevsnpvm-imageId",
    "x-ms-sevsnpvm-is-debuggable",
    "x-ms-sevsnpvm-launchmeasurement",
    "x-ms-sevsnpvm-microcode-svn",
    "x-ms-sevsnpvm-migration-allowed",
    "x-ms-sevsnpvm-reportdata",
    "x-ms-sevsnpvm-reportid",
    "x-ms-sevsnpvm-smt-allowed",
    "x-ms-sevsnpvm-snpfw-svn",
    "x-ms-sevsnpvm-tee-svn",
    "x-ms-sevsnpvm-vmpl",
    "x-ms-ver",
];

pub fn is_allowed_claim(name: &str) -> bool {
    ALLOWED_CLAIMS.contains(&name)
}

/// One attested claim value. Untagged so policies and claim maps read and
/// serialize as plain JSON scalars.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimScalar {
    Bool(bool),
    Num(f64),
    Str(String),
}

impl ClaimScalar {
    pub fn as_num(&self) -> Option<f64> {
        match self {
            ClaimScalar::Num(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for ClaimScalar {
    fn from(value: &str) -> Self {
        ClaimScalar::Str(value.to_string())
    }
}

impl From<f64> for ClaimScalar {
    fn from(value: f64) -> Self {
        ClaimScalar::Num(value)
    }
}

impl From<bool> for ClaimScalar {
    fn from(value: bool) -> Self {
        ClaimScalar::Bool(value)
    }
}

/// Claim map produced by the extractor, claim name -> scalar.
pub type AttestationClaims = BTreeMap<String, ClaimScalar>;

/// Release policy: per-claim allowed value sets plus numeric threshold
/// operators. A key can be released only to an environment whose claims
/// satisfy every entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleasePolicy {
    #[serde(default)]
    pub claims: BTreeMap<String, Vec<ClaimScalar>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gt: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gte: BTreeMap<String, f64>,
}

impl ReleasePolicy {
    /// Assemble the policy from the ledger's release-policy map: operator
    /// entries live under the `gt`/`gte` keys, everything else is a claim
    /// name holding an allowed-value array.
    pub fn from_ledger(ledger: &Arc<dyn LedgerKv>) -> KmsResult<ReleasePolicy> {
        let mut policy = ReleasePolicy::default();
        for key in ledger.keys(RELEASE_POLICY_MAP) {
            let Some(raw) = ledger.get(RELEASE_POLICY_MAP, &key) else {
                continue;
            };
            match key.as_str() {
                "gt" => {
                    policy.gt = serde_json::from_slice(&raw)
                        .map_err(|err| KmsError::Internal(err.into()))?;
                }
                "gte" => {
                    policy.gte = serde_json::from_slice(&raw)
                        .map_err(|err| KmsError::Internal(err.into()))?;
                }
                claim => {
                    let values: Vec<ClaimScalar> = serde_json::from_slice(&raw)
                        .map_err(|err| KmsError::Internal(err.into()))?;
                    policy.claims.insert(claim.to_string(), values);
                }
            }
        }
        Ok(policy)
    }

    /// Evaluate attested claims against the policy. Returns the claim map for
    /// the downstream wrap-key binding check, or the first rejection.
    pub fn evaluate(&self, claims: &AttestationClaims) -> KmsResult<AttestationClaims> {
        if self.claims.is_empty() {
            return Err(KmsError::PolicyMissing);
        }
        for (name, allowed) in &self.claims {
            let Some(value) = claims.get(name) else {
                return Err(KmsError::AttestationInvalid(format!(
                    "missing required claim {name}"
                )));
            };
            if !allowed.contains(value) {
                return Err(KmsError::AttestationInvalid(format!(
                    "claim {name} value mismatch"
                )));
            }
        }
        for (name, threshold) in &self.gte {
            let value = numeric_claim(claims, name)?;
            if value < *threshold {
                return Err(KmsError::AttestationInvalid(format!(
                    "claim {name} below threshold"
                )));
            }
        }
        for (name, threshold) in &self.gt {
            let value = numeric_claim(claims, name)?;
            if value <= *threshold {
                return Err(KmsError::AttestationInvalid(format!(
                    "claim {name} not above threshold"
                )));
            }
        }
        tracing::debug!(claims = claims.len(), "release policy satisfied");
        Ok(claims.clone())
    }
}

fn numeric_claim(claims: &AttestationClaims, name: &str) -> KmsResult<f64> {
    claims
        .get(name)
        .and_then(ClaimScalar::as_num)
        .ok_or_else(|| {
            KmsError::AttestationInvalid(format!("claim {name} missing or not numeric"))
        })
}
