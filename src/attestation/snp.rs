use crate::release::{AttestationClaims, ClaimScalar};

use super::report::SnpReport;

/// Project a verified report into the claim map the release policy engine
/// evaluates. Numbers pass through, single-bit policy flags become booleans,
/// binary fields become lowercase hex. Report fields with no claim mapping
/// are dropped.
pub fn claims_from_report(report: &SnpReport) -> AttestationClaims {
    let mut claims = AttestationClaims::new();
    claims.insert(
        "x-ms-ver".to_string(),
        ClaimScalar::Str(report.version.to_string()),
    );
    claims.insert(
        "x-ms-sevsnpvm-guestsvn".to_string(),
        ClaimScalar::Num(report.guest_svn as f64),
    );
    claims.insert(
        "x-ms-sevsnpvm-smt-allowed".to_string(),
        ClaimScalar::Bool(report.policy.smt == 1),
    );
    claims.insert(
        "x-ms-sevsnpvm-is-debuggable".to_string(),
        ClaimScalar::Bool(report.policy.debug == 1),
    );
    claims.insert(
        "x-ms-sevsnpvm-vmpl".to_string(),
        ClaimScalar::Num(report.vmpl as f64),
    );

    let mut hex_claim = |name: &str, bytes: &[u8]| {
        if !bytes.is_empty() {
            claims.insert(name.to_string(), ClaimScalar::Str(hex::encode(bytes)));
        }
    };
    hex_claim("x-ms-sevsnpvm-familyId", &report.family_id);
    hex_claim("x-ms-sevsnpvm-imageId", &report.image_id);
    hex_claim("x-ms-sevsnpvm-reportdata", &report.report_data);
    hex_claim("x-ms-sevsnpvm-launchmeasurement", &report.measurement);
    hex_claim("x-ms-sevsnpvm-hostdata", &report.host_data);
    hex_claim("x-ms-sevsnpvm-idkeydigest", &report.id_key_digest);
    hex_claim("x-ms-sevsnpvm-authorkeydigest", &report.author_key_digest);
    hex_claim("x-ms-sevsnpvm-reportid", &report.report_id);
    hex_claim("signature-r", &report.signature.r);
    hex_claim("signature-s", &report.signature.s);

    if let Some(uvm) = &report.uvm_endorsements {
        claims.insert(
            "uvm_endorsements-did".to_string(),
            ClaimScalar::Str(uvm.did.clone()),
        );
        claims.insert(
            "uvm_endorsements-feed".to_string(),
            ClaimScalar::Str(uvm.feed.clone()),
        );
        claims.insert(
            "uvm_endorsements-svn".to_string(),
            ClaimScalar::Num(uvm.svn),
        );
    }

    claims
}
