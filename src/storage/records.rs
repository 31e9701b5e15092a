//! Stored request records and query filters.

use crate::cert::crl::SkippedRecord;
use crate::cert::name::{parse_dn, RequestId};
use crate::cert::revocation::RevocationRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An unsigned request waiting in the repository.
///
/// Attributes are kept as submitted; they are validated when the request is
/// turned into a signable [`CertificateRequest`](crate::cert::request::CertificateRequest).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: RequestId,
    pub subject: String,
    pub cert_type: String,
    pub digest: String,
    pub days: u32,
    /// Name of the CA the request is addressed to.
    pub ca: String,
    pub host: String,
    /// `PUBLIC KEY` or `CERTIFICATE REQUEST` PEM.
    pub public_key_pem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subject_alt_names: Vec<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Restricts a pending request search. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub ca_name: Option<String>,
    pub common_name: Option<String>,
}

impl RequestFilter {
    pub fn for_ca(ca_name: impl Into<String>) -> Self {
        Self {
            ca_name: Some(ca_name.into()),
            common_name: None,
        }
    }

    pub fn matches(&self, request: &PendingRequest) -> bool {
        if let Some(ca) = &self.ca_name {
            if &request.ca != ca {
                return false;
            }
        }
        match &self.common_name {
            Some(cn) => parse_dn(&request.subject)
                .ok()
                .and_then(|dn| dn.common_name().map(|found| found == cn))
                .unwrap_or(false),
            None => true,
        }
    }
}

/// Revocation records for one CA label, plus any record document that could
/// not be read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevokedListing {
    pub records: Vec<RevocationRecord>,
    pub unreadable: Vec<SkippedRecord>,
}
