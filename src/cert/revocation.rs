//! Revocation ledger.
//!
//! Revoking a host writes one [`RevocationRecord`] per certificate serial.
//! The ledger only grows: revoking an already revoked certificate returns the
//! existing record.

use crate::cert::name::RequestId;
use crate::error::{CaError, Result};
use crate::storage::repository::Repository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// RFC 5280 CRLReason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

const REASONS: [(RevocationReason, &str, u8); 10] = [
    (RevocationReason::Unspecified, "unspecified", 0),
    (RevocationReason::KeyCompromise, "keyCompromise", 1),
    (RevocationReason::CaCompromise, "CACompromise", 2),
    (RevocationReason::AffiliationChanged, "affiliationChanged", 3),
    (RevocationReason::Superseded, "superseded", 4),
    (RevocationReason::CessationOfOperation, "cessationOfOperation", 5),
    (RevocationReason::CertificateHold, "certificateHold", 6),
    (RevocationReason::RemoveFromCrl, "removeFromCRL", 8),
    (RevocationReason::PrivilegeWithdrawn, "privilegeWithdrawn", 9),
    (RevocationReason::AaCompromise, "AACompromise", 10),
];

impl RevocationReason {
    fn entry(self) -> &'static (RevocationReason, &'static str, u8) {
        &REASONS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.entry().1
    }

    /// The ENUMERATED value carried in a CRL entry's reasonCode.
    pub fn code(self) -> u8 {
        self.entry().2
    }
}

impl FromStr for RevocationReason {
    type Err = CaError;

    /// Names are matched case-insensitively (`keyCompromise`, `keycompromise`).
    fn from_str(s: &str) -> Result<Self> {
        REASONS
            .iter()
            .find(|(_, name, _)| name.eq_ignore_ascii_case(s))
            .map(|(reason, _, _)| *reason)
            .ok_or_else(|| CaError::InvalidEnum {
                field: "reason".to_string(),
                value: s.to_string(),
                expected: REASONS
                    .iter()
                    .map(|(_, name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

impl TryFrom<String> for RevocationReason {
    type Error = CaError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RevocationReason> for String {
    fn from(value: RevocationReason) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A revoked certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevocationRecord {
    pub request_id: RequestId,
    /// Serial of the revoked certificate, upper-case hex.
    pub serial: String,
    pub subject: String,
    pub host: String,
    pub ca_label: String,
    pub revoked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RevocationReason>,
}

/// Result of [`revoke_host`].
#[derive(Debug, Clone, PartialEq)]
pub enum RevocationOutcome {
    /// A new record was written.
    Revoked(RevocationRecord),
    /// The certificate was already revoked; the existing record is returned.
    AlreadyRevoked(RevocationRecord),
}

impl RevocationOutcome {
    pub fn record(&self) -> &RevocationRecord {
        match self {
            RevocationOutcome::Revoked(record) | RevocationOutcome::AlreadyRevoked(record) => {
                record
            }
        }
    }
}

/// Revoke the certificate persisted for `hostname`.
///
/// Fails with [`CaError::NotFound`] and leaves the repository untouched when no
/// certificate is stored for the host.
pub fn revoke_host<R: Repository + ?Sized>(
    repository: &R,
    hostname: &str,
    reason: Option<RevocationReason>,
) -> Result<RevocationOutcome> {
    let certificate = repository.fetch_certificate_by_host(hostname)?;

    if let Some(existing) = repository.find_revocation(&certificate.serial)? {
        debug!(host = hostname, serial = %existing.serial, "certificate already revoked");
        return Ok(RevocationOutcome::AlreadyRevoked(existing));
    }

    let record = RevocationRecord {
        request_id: certificate.request_id.clone(),
        serial: certificate.serial.clone(),
        subject: certificate.subject.to_string(),
        host: hostname.to_string(),
        ca_label: certificate.ca_label.clone(),
        revoked_at: crate::cert::signing::now_seconds(),
        reason,
    };
    repository.record_revocation(&record)?;

    info!(
        host = hostname,
        serial = %record.serial,
        ca = %record.ca_label,
        "certificate revoked"
    );
    Ok(RevocationOutcome::Revoked(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_table_matches_variant_order() {
        for (index, (reason, _, _)) in REASONS.iter().enumerate() {
            assert_eq!(*reason as usize, index);
        }
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(RevocationReason::Unspecified.code(), 0);
        assert_eq!(RevocationReason::KeyCompromise.code(), 1);
        assert_eq!(RevocationReason::RemoveFromCrl.code(), 8);
        assert_eq!(RevocationReason::AaCompromise.code(), 10);
    }

    #[test]
    fn test_reason_parse() {
        assert_eq!(
            "keyCompromise".parse::<RevocationReason>().unwrap(),
            RevocationReason::KeyCompromise
        );
        assert_eq!(
            "cacompromise".parse::<RevocationReason>().unwrap(),
            RevocationReason::CaCompromise
        );
        assert!(matches!(
            "lost".parse::<RevocationReason>(),
            Err(CaError::InvalidEnum { .. })
        ));
    }

    #[test]
    fn test_reason_serde() {
        let json = serde_json::to_string(&RevocationReason::Superseded).unwrap();
        assert_eq!(json, "\"superseded\"");
    }
}
