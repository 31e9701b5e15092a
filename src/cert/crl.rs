//! Certificate revocation lists.
//!
//! A CRL is rebuilt in full from the revocation records on every run and
//! signed by the authority. Entries are ordered by revocation time, then by
//! request id and serial, so the same records always give the same list.

use crate::cert::authority::Authority;
use crate::cert::extensions::authority_key_identifier;
use crate::cert::name::DistinguishedName;
use crate::cert::revocation::RevocationRecord;
use crate::cert::signing::{now_seconds, to_x509_time, validity_end};
use crate::config::CrlPolicy;
use crate::error::{CaError, Result};
use chrono::{DateTime, Utc};
use const_oid::db::rfc5280;
use der::asn1::OctetString;
use der::{Any, Encode, Tag};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::ext::Extension;
use x509_cert::serial_number::SerialNumber;
use x509_cert::Version;

/// One revoked serial as listed in a CRL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlEntry {
    pub serial: String,
    pub revoked_at: DateTime<Utc>,
    pub reason_code: Option<u8>,
}

/// A revocation record left out of a CRL, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    /// Serial or file name identifying the record.
    pub source: String,
    pub error: String,
}

/// A generated, signed CRL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crl {
    pub ca_label: String,
    pub issuer: DistinguishedName,
    pub this_update: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    pub crl_number: u64,
    pub entries: Vec<CrlEntry>,
    #[serde(default)]
    pub skipped: Vec<SkippedRecord>,
    pub pem: String,
}

/// Build and sign a CRL over `records`, with `thisUpdate` set to now.
pub fn generate_crl(
    authority: &Authority,
    records: &[RevocationRecord],
    ca_label: &str,
    policy: &CrlPolicy,
) -> Result<Crl> {
    generate_crl_at(authority, records, ca_label, policy, now_seconds())
}

/// Build and sign a CRL with an explicit `thisUpdate`.
///
/// A record that cannot be listed (an undecodable serial, say) is left out
/// and reported in [`Crl::skipped`]; the rest are still published.
pub fn generate_crl_at(
    authority: &Authority,
    records: &[RevocationRecord],
    ca_label: &str,
    policy: &CrlPolicy,
    this_update: DateTime<Utc>,
) -> Result<Crl> {
    policy.digest.ensure_supported()?;

    let mut ordered: Vec<&RevocationRecord> = records.iter().collect();
    ordered.sort_by(|a, b| {
        a.revoked_at
            .cmp(&b.revoked_at)
            .then_with(|| a.request_id.cmp(&b.request_id))
            .then_with(|| a.serial.cmp(&b.serial))
    });

    let mut entries = Vec::with_capacity(ordered.len());
    let mut revoked = Vec::with_capacity(ordered.len());
    let mut skipped = Vec::new();
    for record in ordered {
        match revoked_entry(record) {
            Ok((cert, entry)) => {
                revoked.push(cert);
                entries.push(entry);
            }
            Err(e) => {
                warn!(serial = %record.serial, error = %e, "revocation left out of CRL");
                skipped.push(SkippedRecord {
                    source: record.serial.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    let next_update = validity_end(this_update, policy.next_update_days, "crl.next_update_days")?;
    let crl_number = u64::try_from(this_update.timestamp()).map_err(|_| CaError::InvalidValue {
        field: "thisUpdate".to_string(),
        reason: "before the unix epoch".to_string(),
    })?;

    let tbs = TbsCertList {
        version: Version::V2,
        signature: policy.digest.signature_algorithm()?,
        issuer: authority.certificate.tbs_certificate.subject.clone(),
        this_update: to_x509_time(this_update)?,
        next_update: Some(to_x509_time(next_update)?),
        revoked_certificates: if revoked.is_empty() { None } else { Some(revoked) },
        crl_extensions: Some(vec![
            authority_key_identifier(authority.public_key_info())?,
            crl_number_extension(crl_number)?,
        ]),
    };

    let tbs_der = tbs
        .to_der()
        .map_err(|e| CaError::Certificate(format!("Failed to encode TBS CRL: {}", e)))?;
    let signature = policy.digest.sign(&authority.private_key, &tbs_der)?;
    let list = CertificateList {
        signature_algorithm: tbs.signature.clone(),
        tbs_cert_list: tbs,
        signature,
    };
    let der = list
        .to_der()
        .map_err(|e| CaError::Certificate(format!("Failed to encode CRL: {}", e)))?;

    info!(
        ca = ca_label,
        entries = entries.len(),
        skipped = skipped.len(),
        number = crl_number,
        "CRL generated"
    );

    Ok(Crl {
        ca_label: ca_label.to_string(),
        issuer: authority.name.clone(),
        this_update,
        next_update,
        crl_number,
        entries,
        skipped,
        pem: pem::encode(&pem::Pem::new("X509 CRL", der)),
    })
}

/// Decode a CRL from PEM.
pub fn crl_from_pem(text: &str) -> Result<CertificateList> {
    use der::Decode;

    let block =
        pem::parse(text.trim()).map_err(|e| CaError::Pem(format!("Failed to parse PEM: {}", e)))?;
    if block.tag() != "X509 CRL" {
        return Err(CaError::Pem(format!("Expected X509 CRL, got {}", block.tag())));
    }
    CertificateList::from_der(block.contents())
        .map_err(|e| CaError::Certificate(format!("Failed to decode CRL: {}", e)))
}

fn revoked_entry(record: &RevocationRecord) -> Result<(RevokedCert, CrlEntry)> {
    let serial_bytes = hex::decode(&record.serial).map_err(|e| {
        CaError::Certificate(format!("Bad serial '{}' in revocation record: {}", record.serial, e))
    })?;
    let reason_code = record.reason.map(|reason| reason.code());
    let crl_entry_extensions = match reason_code {
        Some(code) => Some(vec![reason_code_extension(code)?]),
        None => None,
    };

    let cert = RevokedCert {
        serial_number: SerialNumber::new(&serial_bytes)?,
        revocation_date: to_x509_time(record.revoked_at)?,
        crl_entry_extensions,
    };
    let entry = CrlEntry {
        serial: record.serial.clone(),
        revoked_at: record.revoked_at,
        reason_code,
    };
    Ok((cert, entry))
}

fn reason_code_extension(code: u8) -> Result<Extension> {
    let reason = Any::new(Tag::Enumerated, vec![code])?;
    Ok(Extension {
        extn_id: rfc5280::ID_CE_CRL_REASONS,
        critical: false,
        extn_value: OctetString::new(reason.to_der()?)?,
    })
}

fn crl_number_extension(number: u64) -> Result<Extension> {
    let number: SerialNumber = SerialNumber::new(&number.to_be_bytes())?;
    Ok(Extension {
        extn_id: rfc5280::ID_CE_CRL_NUMBER,
        critical: false,
        extn_value: OctetString::new(number.to_der()?)?,
    })
}
