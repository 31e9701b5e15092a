//! X.509 certificate signing.
//!
//! Certificates are assembled as `TbsCertificate` structures and signed
//! directly with the authority's RSA key, so every digest in
//! [`DigestAlgorithm`] that has a signer can be used.

use crate::cert::authority::Authority;
use crate::cert::extensions::leaf_extensions;
use crate::cert::name::{derive_id, DistinguishedName, RequestId};
use crate::cert::request::{CertificateRequest, CertificateType};
use crate::crypto::digest::DigestAlgorithm;
use crate::error::{CaError, Result};
use chrono::{DateTime, Duration, Utc};
use der::asn1::{GeneralizedTime, UtcTime};
use der::{Decode, Encode};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{info, warn};
use x509_cert::certificate::{Certificate, TbsCertificate, Version};
use x509_cert::ext::Extension;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};

/// Caller choices that affect how a request is signed.
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Label recorded with the certificate; defaults to the authority's DN.
    pub ca_name: Option<String>,
    /// Issuer name to place in the certificate instead of the authority's
    /// subject.
    pub issuer: Option<DistinguishedName>,
}

/// A signed certificate and the bookkeeping stored alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    pub request_id: RequestId,
    pub subject: DistinguishedName,
    pub issuer: DistinguishedName,
    /// Serial number, upper-case hex.
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub digest: DigestAlgorithm,
    /// Colon-separated upper-case hex of the SHA-1 over the DER encoding.
    pub sha1_fingerprint: String,
    pub pem: String,
    pub host: Option<String>,
    pub ca_label: String,
    pub cert_type: CertificateType,
}

impl IssuedCertificate {
    /// Decode the stored PEM back into an X.509 structure.
    pub fn x509(&self) -> Result<Certificate> {
        cert_from_pem(&self.pem)
    }

    /// Length of the validity window in whole days.
    pub fn validity_days(&self) -> i64 {
        (self.not_after - self.not_before).num_days()
    }
}

/// An externally produced certificate attached to a pending request.
#[derive(Debug, Clone)]
pub struct AttachedCertificate {
    pub certificate: IssuedCertificate,
    /// Whether the certificate's subject is the request's subject.
    pub subject_matches: bool,
}

/// Sign a request with the authority's key.
///
/// The validity window starts now and spans `request.requested_days`. The
/// digest is checked before anything is built so an unsupported algorithm
/// never consumes a serial.
///
/// # Example
///
/// ```no_run
/// use casign::cert::authority::load;
/// use casign::cert::request::{build_request, CertificateRequestInput};
/// use casign::cert::signing::{sign_request, SignOptions};
///
/// # fn example() -> casign::error::Result<()> {
/// let authority = load("./myCA".as_ref(), "secret123")?;
/// let generated = build_request(&CertificateRequestInput {
///     ca_path: Some("./myCA".into()),
///     dn: Some("/CN=www.example.com".to_string()),
///     cert_type: Some("server".to_string()),
///     ..Default::default()
/// })?;
/// let cert = sign_request(&generated.request, &authority, &SignOptions::default())?;
/// assert_eq!(cert.issuer, authority.name);
/// # Ok(())
/// # }
/// ```
pub fn sign_request(
    request: &CertificateRequest,
    authority: &Authority,
    options: &SignOptions,
) -> Result<IssuedCertificate> {
    request.digest.ensure_supported()?;

    let issuer_spki = authority.public_key_info();
    let extensions = leaf_extensions(
        request.cert_type,
        &request.extensions,
        &request.subject_alt_names,
        &request.public_key,
        issuer_spki,
    )?;

    let issuer = options.issuer.clone().unwrap_or_else(|| authority.name.clone());
    let not_before = now_seconds();
    let not_after = validity_end(not_before, request.requested_days, "days")?;

    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: generate_serial_number()?,
        signature: request.digest.signature_algorithm()?,
        issuer: issuer.to_x509_name()?,
        validity: Validity {
            not_before: to_x509_time(not_before)?,
            not_after: to_x509_time(not_after)?,
        },
        subject: request.name.to_x509_name()?,
        subject_public_key_info: request.public_key.clone(),
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions),
    };
    let cert = sign_tbs(tbs, request.digest, &authority.private_key)?;

    let ca_label = options
        .ca_name
        .clone()
        .unwrap_or_else(|| authority.name.to_string());
    let issued = IssuedCertificate {
        request_id: request.id.clone(),
        subject: request.name.clone(),
        issuer,
        serial: serial_hex(&cert.tbs_certificate.serial_number),
        not_before,
        not_after,
        digest: request.digest,
        sha1_fingerprint: sha1_fingerprint(&cert)?,
        pem: cert_to_pem(&cert)?,
        host: request.host.clone(),
        ca_label,
        cert_type: request.cert_type,
    };

    info!(
        subject = %issued.subject,
        serial = %issued.serial,
        days = request.requested_days,
        "certificate signed"
    );
    Ok(issued)
}

/// Bind a certificate signed elsewhere to a pending request.
///
/// A subject that differs from the request is reported through
/// `subject_matches` and logged rather than rejected.
pub fn attach_certificate(
    request: &CertificateRequest,
    pem_text: &str,
    ca_label: &str,
) -> Result<AttachedCertificate> {
    let cert = cert_from_pem(pem_text)?;
    let tbs = &cert.tbs_certificate;

    let subject = DistinguishedName::from_x509_name(&tbs.subject)?;
    let subject_matches = derive_id(&subject).ok().as_ref() == Some(&request.id);
    if !subject_matches {
        warn!(
            expected = %request.name,
            found = %subject,
            "attached certificate subject differs from the request"
        );
    }

    let certificate = IssuedCertificate {
        request_id: request.id.clone(),
        subject,
        issuer: DistinguishedName::from_x509_name(&tbs.issuer)?,
        serial: serial_hex(&tbs.serial_number),
        not_before: from_x509_time(&tbs.validity.not_before)?,
        not_after: from_x509_time(&tbs.validity.not_after)?,
        digest: request.digest,
        sha1_fingerprint: sha1_fingerprint(&cert)?,
        pem: cert_to_pem(&cert)?,
        host: request.host.clone(),
        ca_label: ca_label.to_string(),
        cert_type: request.cert_type,
    };

    Ok(AttachedCertificate {
        certificate,
        subject_matches,
    })
}

/// Sign a TBS structure and wrap it into a certificate.
pub(crate) fn sign_tbs(
    tbs: TbsCertificate,
    digest: DigestAlgorithm,
    key: &RsaPrivateKey,
) -> Result<Certificate> {
    let tbs_der = tbs.to_der().map_err(|e| {
        CaError::Certificate(format!("Failed to encode TBS certificate: {}", e))
    })?;
    let signature = digest.sign(key, &tbs_der)?;

    Ok(Certificate {
        signature_algorithm: tbs.signature.clone(),
        tbs_certificate: tbs,
        signature,
    })
}

/// Convert a Certificate to PEM format.
pub fn cert_to_pem(cert: &Certificate) -> Result<String> {
    let der = cert
        .to_der()
        .map_err(|e| CaError::Certificate(format!("Failed to encode certificate: {}", e)))?;

    Ok(pem::encode(&pem::Pem::new("CERTIFICATE", der)))
}

/// Load a Certificate from PEM format.
pub fn cert_from_pem(pem_str: &str) -> Result<Certificate> {
    let block = pem::parse(pem_str.trim())
        .map_err(|e| CaError::Pem(format!("Failed to parse PEM: {}", e)))?;

    if block.tag() != "CERTIFICATE" {
        return Err(CaError::Pem(format!(
            "Expected CERTIFICATE, got {}",
            block.tag()
        )));
    }

    Certificate::from_der(block.contents())
        .map_err(|e| CaError::Certificate(format!("Failed to decode certificate: {}", e)))
}

/// Colon-separated SHA-1 fingerprint of the certificate's DER encoding.
pub fn sha1_fingerprint(cert: &Certificate) -> Result<String> {
    let digest = Sha1::digest(cert.to_der()?);
    Ok(digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":"))
}

pub(crate) fn serial_hex(serial: &SerialNumber) -> String {
    hex::encode_upper(serial.as_bytes())
}

pub(crate) fn generate_serial_number() -> Result<SerialNumber> {
    let mut bytes = [0u8; 20];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    bytes[0] &= 0x7F; // Ensure positive

    SerialNumber::new(&bytes)
        .map_err(|e| CaError::Certificate(format!("Failed to create serial number: {}", e)))
}

/// The current time truncated to whole seconds, the resolution of X.509 time.
pub(crate) fn now_seconds() -> DateTime<Utc> {
    let now = Utc::now();
    now - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos()))
}

/// End of a window of `days` starting at `start`.
///
/// Fails with [`CaError::InvalidValue`] naming `field` when the end falls past
/// 9999-12-31T23:59:59Z, the last instant GeneralizedTime can carry.
pub(crate) fn validity_end(start: DateTime<Utc>, days: u32, field: &str) -> Result<DateTime<Utc>> {
    let out_of_range = || CaError::InvalidValue {
        field: field.to_string(),
        reason: format!("{} days from {} runs past the year 9999", days, start.date_naive()),
    };
    let end = start
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(out_of_range)?;
    if end.timestamp() > GENERALIZED_TIME_LIMIT {
        return Err(out_of_range());
    }
    Ok(end)
}

/// UTCTime through 2049, GeneralizedTime from 2050 on (RFC 5280 4.1.2.5).
pub(crate) fn to_x509_time(at: DateTime<Utc>) -> Result<Time> {
    let secs = u64::try_from(at.timestamp()).map_err(|_| CaError::InvalidValue {
        field: "time".to_string(),
        reason: format!("{} is before the unix epoch", at),
    })?;
    let since_epoch = std::time::Duration::from_secs(secs);

    if at.timestamp() < UTC_TIME_LIMIT {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(since_epoch)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(since_epoch)?))
    }
}

pub(crate) fn from_x509_time(time: &Time) -> Result<DateTime<Utc>> {
    let secs = i64::try_from(time.to_unix_duration().as_secs()).map_err(|_| {
        CaError::Certificate("Certificate time out of range".to_string())
    })?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CaError::Certificate("Certificate time out of range".to_string()))
}

/// 2050-01-01T00:00:00Z
const UTC_TIME_LIMIT: i64 = 2_524_608_000;

/// 9999-12-31T23:59:59Z
const GENERALIZED_TIME_LIMIT: i64 = 253_402_300_799;

/// Extensions of an X.509 certificate, empty when it has none.
pub fn certificate_extensions(cert: &Certificate) -> &[Extension] {
    cert.tbs_certificate.extensions.as_deref().unwrap_or(&[])
}
