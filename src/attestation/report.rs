use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{KmsError, KmsResult};

/// Hardware attestation evidence as submitted by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnpEvidence {
    /// Base64 SNP report.
    pub evidence: String,
    /// Base64 platform certificate chain.
    pub endorsements: String,
    #[serde(default)]
    pub uvm_endorsements: Option<String>,
    #[serde(default)]
    pub endorsed_tcb: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnpGuestPolicy {
    pub smt: u8,
    pub debug: u8,
    #[serde(default)]
    pub migrate_ma: u8,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnpSignature {
    #[serde(default)]
    pub r: Vec<u8>,
    #[serde(default)]
    pub s: Vec<u8>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UvmEndorsements {
    pub did: String,
    pub feed: String,
    pub svn: f64,
}

/// Verified SNP report body. Field layout follows the hardware report; byte
/// fields stay raw here and are hex-projected by the claim extractor.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnpReport {
    pub version: u64,
    pub guest_svn: u64,
    pub policy: SnpGuestPolicy,
    #[serde(default)]
    pub family_id: Vec<u8>,
    #[serde(default)]
    pub image_id: Vec<u8>,
    pub vmpl: u64,
    #[serde(default)]
    pub report_data: Vec<u8>,
    #[serde(default)]
    pub measurement: Vec<u8>,
    #[serde(default)]
    pub host_data: Vec<u8>,
    #[serde(default)]
    pub id_key_digest: Vec<u8>,
    #[serde(default)]
    pub author_key_digest: Vec<u8>,
    #[serde(default)]
    pub report_id: Vec<u8>,
    #[serde(default)]
    pub signature: SnpSignature,
    #[serde(default)]
    pub uvm_endorsements: Option<UvmEndorsements>,
}

/// Verifies hardware evidence and yields the report body.
///
/// The signature chain check is the platform's concern; deployments plug the
/// platform primitive in behind this seam.
#[async_trait]
pub trait AttestationVerifier: Send + Sync {
    async fn verify(&self, evidence: &SnpEvidence) -> KmsResult<SnpReport>;
}

/// Verifier used by the binary and the tests: checks the envelope encoding
/// and decodes the report body without a certificate chain walk.
pub struct SnpEnvelopeVerifier;

#[async_trait]
impl AttestationVerifier for SnpEnvelopeVerifier {
    async fn verify(&self, evidence: &SnpEvidence) -> KmsResult<SnpReport> {
        if evidence.evidence.is_empty() || evidence.endorsements.is_empty() {
            return Err(KmsError::AttestationInvalid(
                "evidence and endorsements are required".to_string(),
            ));
        }
        let raw = STANDARD
            .decode(&evidence.evidence)
            .map_err(|_| KmsError::AttestationInvalid("evidence is not base64".to_string()))?;
        STANDARD
            .decode(&evidence.endorsements)
            .map_err(|_| KmsError::AttestationInvalid("endorsements are not base64".to_string()))?;
        if let Some(uvm) = &evidence.uvm_endorsements {
            STANDARD.decode(uvm).map_err(|_| {
                KmsError::AttestationInvalid("uvm endorsements are not base64".to_string())
            })?;
        }
        let report: SnpReport = serde_json::from_slice(&raw)
            .map_err(|_| KmsError::AttestationInvalid("malformed report body".to_string()))?;
        tracing::debug!(version = report.version, vmpl = report.vmpl, "report decoded");
        Ok(report)
    }
}
