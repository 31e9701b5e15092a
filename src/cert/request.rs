//! Certificate request construction.
//!
//! Raw operator input is validated once, in a fixed order, before any key is
//! generated. The result is a [`CertificateRequest`]: a subject name bound to
//! a public key, with everything the signer needs to issue it.

use crate::cert::extensions::{
    encode_custom_extensions, parse_extensions, subject_alt_name, ExtensionEntry,
};
use crate::cert::name::{derive_id, parse_dn, DistinguishedName, RequestId};
use crate::cert::signing::{now_seconds, validity_end};
use crate::crypto::digest::DigestAlgorithm;
use crate::crypto::keys::{generate_rsa_key, public_key_info, public_key_info_from_pem, KeyLength};
use crate::error::{CaError, Result};
use crate::storage::records::PendingRequest;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use spki::SubjectPublicKeyInfoOwned;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, warn};

/// Default validity of a requested certificate (five years).
pub const DEFAULT_REQUEST_DAYS: u32 = 365 * 5;

/// Default size of a freshly generated subject key.
pub const DEFAULT_SUBJECT_KEY_BITS: u32 = 2048;

/// What a certificate is for; selects its extension profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    Server,
    Client,
    Peer,
    Custom,
}

impl CertificateType {
    pub fn as_str(self) -> &'static str {
        match self {
            CertificateType::Server => "server",
            CertificateType::Client => "client",
            CertificateType::Peer => "peer",
            CertificateType::Custom => "custom",
        }
    }
}

impl FromStr for CertificateType {
    type Err = CaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "server" => Ok(CertificateType::Server),
            "client" => Ok(CertificateType::Client),
            "peer" => Ok(CertificateType::Peer),
            "custom" => Ok(CertificateType::Custom),
            other => Err(CaError::InvalidEnum {
                field: "type".to_string(),
                value: other.to_string(),
                expected: "server, client, peer, custom".to_string(),
            }),
        }
    }
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loosely typed attributes as collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct CertificateRequestInput {
    pub ca_path: Option<PathBuf>,
    pub dn: Option<String>,
    pub cert_type: Option<String>,
    pub digest: Option<String>,
    pub days: Option<u32>,
    pub extensions: Option<String>,
    pub subject_alt_names: Vec<String>,
    pub key_bits: Option<u32>,
    /// Target CA label; `None` means the signing authority's own DN.
    pub ca_name: Option<String>,
    pub host: Option<String>,
    /// Whether the signed certificate will be persisted.
    pub save: bool,
}

/// Validated request attributes, not yet bound to a key.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub ca_path: PathBuf,
    pub name: DistinguishedName,
    pub cert_type: CertificateType,
    pub digest: DigestAlgorithm,
    pub requested_days: u32,
    pub extensions: Vec<ExtensionEntry>,
    pub subject_alt_names: Vec<String>,
    pub key_length: KeyLength,
    pub ca_name: Option<String>,
    pub host: Option<String>,
}

/// A signable request.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub id: RequestId,
    pub public_key: SubjectPublicKeyInfoOwned,
    pub name: DistinguishedName,
    pub cert_type: CertificateType,
    pub digest: DigestAlgorithm,
    pub requested_days: u32,
    /// Operator extensions; only honoured for custom certificates.
    pub extensions: Vec<ExtensionEntry>,
    pub subject_alt_names: Vec<String>,
    pub ca_name: Option<String>,
    pub host: Option<String>,
}

/// A request built around a freshly generated key pair.
pub struct GeneratedRequest {
    pub request: CertificateRequest,
    pub private_key: RsaPrivateKey,
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(CaError::MissingField(field.to_string())),
    }
}

/// A validity period must be positive and end by the year 9999.
pub(crate) fn check_days(days: u32) -> Result<u32> {
    if days == 0 {
        return Err(CaError::InvalidValue {
            field: "days".to_string(),
            reason: "validity must be a positive number of days".to_string(),
        });
    }
    validity_end(now_seconds(), days, "days")?;
    Ok(days)
}

/// Validate request input, stopping at the first violation.
///
/// Order: CA path, DN, type, digest, validity, extensions, host, key length.
pub fn validate_request_input(input: &CertificateRequestInput) -> Result<RequestTemplate> {
    let ca_path = input
        .ca_path
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| CaError::MissingField("--ca-path".to_string()))?;

    let name = parse_dn(required(&input.dn, "--dn")?)?;
    if name.common_name().is_none() {
        return Err(CaError::MalformedDn(
            "A certificate subject needs a CN".to_string(),
        ));
    }

    let cert_type: CertificateType = required(&input.cert_type, "--type")?.parse()?;
    let digest: DigestAlgorithm = input.digest.as_deref().unwrap_or("SHA256").parse()?;
    let requested_days = check_days(input.days.unwrap_or(DEFAULT_REQUEST_DAYS))?;

    let extensions = match input.extensions.as_deref() {
        Some(text) => parse_extensions(text)?,
        None => Vec::new(),
    };
    if cert_type == CertificateType::Custom {
        if extensions.is_empty() {
            return Err(CaError::MissingExtensions);
        }
        encode_custom_extensions(&extensions)?;
    } else if !extensions.is_empty() {
        warn!(cert_type = %cert_type, "extensions are ignored unless type is custom");
    }
    if !input.subject_alt_names.is_empty() {
        subject_alt_name(&input.subject_alt_names)?;
    }

    let host = input.host.as_deref().map(str::trim).filter(|h| !h.is_empty());
    if input.save && host.is_none() {
        return Err(CaError::MissingField("--host (required with --save)".to_string()));
    }

    let key_length = KeyLength::try_from(input.key_bits.unwrap_or(DEFAULT_SUBJECT_KEY_BITS))?;

    Ok(RequestTemplate {
        ca_path,
        name,
        cert_type,
        digest,
        requested_days,
        extensions,
        subject_alt_names: input.subject_alt_names.clone(),
        key_length,
        ca_name: input.ca_name.clone(),
        host: host.map(str::to_string),
    })
}

impl RequestTemplate {
    /// Bind the template to a public key.
    pub fn with_public_key(self, public_key: SubjectPublicKeyInfoOwned) -> Result<CertificateRequest> {
        Ok(CertificateRequest {
            id: derive_id(&self.name)?,
            public_key,
            name: self.name,
            cert_type: self.cert_type,
            digest: self.digest,
            requested_days: self.requested_days,
            extensions: self.extensions,
            subject_alt_names: self.subject_alt_names,
            ca_name: self.ca_name,
            host: self.host,
        })
    }
}

/// Validate input and build a request around a fresh RSA key pair.
///
/// # Example
///
/// ```
/// use casign::cert::request::{build_request, CertificateRequestInput};
///
/// let input = CertificateRequestInput {
///     ca_path: Some("./myCA".into()),
///     dn: Some("/CN=www.example.com".to_string()),
///     cert_type: Some("server".to_string()),
///     key_bits: Some(1024),
///     ..Default::default()
/// };
/// let generated = build_request(&input).unwrap();
/// assert_eq!(generated.request.requested_days, 1825);
/// ```
pub fn build_request(input: &CertificateRequestInput) -> Result<GeneratedRequest> {
    generate_request(validate_request_input(input)?)
}

/// Generate the subject key for an already validated template.
pub fn generate_request(template: RequestTemplate) -> Result<GeneratedRequest> {
    let private_key = generate_rsa_key(template.key_length)?;
    let public_key = public_key_info(&private_key.to_public_key())?;
    debug!(subject = %template.name, bits = %template.key_length, "generated subject key");

    Ok(GeneratedRequest {
        request: template.with_public_key(public_key)?,
        private_key,
    })
}

/// Build a request from a stored, externally keyed request.
///
/// The id is always recomputed from the subject so a stored id can never
/// diverge from the name it claims to identify.
pub fn request_from_pending(pending: &PendingRequest) -> Result<CertificateRequest> {
    let name = parse_dn(&pending.subject)?;
    let id = derive_id(&name)?;
    if id != pending.id {
        warn!(stored = %pending.id, derived = %id, "stored request id does not match its subject");
    }

    let cert_type: CertificateType = pending.cert_type.parse()?;
    let digest: DigestAlgorithm = pending.digest.parse()?;
    let extensions = match pending.extensions.as_deref() {
        Some(text) => parse_extensions(text)?,
        None => Vec::new(),
    };
    if cert_type == CertificateType::Custom && extensions.is_empty() {
        return Err(CaError::MissingExtensions);
    }

    Ok(CertificateRequest {
        id,
        public_key: public_key_info_from_pem(&pending.public_key_pem)?,
        name,
        cert_type,
        digest,
        requested_days: check_days(pending.days)?,
        extensions,
        subject_alt_names: pending.subject_alt_names.clone(),
        ca_name: Some(pending.ca.clone()),
        host: Some(pending.host.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn server_input() -> CertificateRequestInput {
        CertificateRequestInput {
            ca_path: Some(PathBuf::from("./myCA")),
            dn: Some("/CN=www.example.com".to_string()),
            cert_type: Some("server".to_string()),
            digest: Some("SHA256".to_string()),
            days: Some(365),
            key_bits: Some(1024),
            ..Default::default()
        }
    }

    fn kind_of(input: &CertificateRequestInput) -> ErrorKind {
        validate_request_input(input).unwrap_err().kind()
    }

    #[test]
    fn test_validate_server_request() {
        let template = validate_request_input(&server_input()).unwrap();
        assert_eq!(template.cert_type, CertificateType::Server);
        assert_eq!(template.digest, DigestAlgorithm::Sha256);
        assert_eq!(template.requested_days, 365);
        assert!(template.host.is_none());
    }

    #[test]
    fn test_defaults() {
        let input = CertificateRequestInput {
            digest: None,
            days: None,
            key_bits: None,
            ..server_input()
        };
        let template = validate_request_input(&input).unwrap();
        assert_eq!(template.digest, DigestAlgorithm::Sha256);
        assert_eq!(template.requested_days, DEFAULT_REQUEST_DAYS);
        assert_eq!(template.key_length, KeyLength::Bits2048);
    }

    #[test]
    fn test_missing_fields() {
        let mut input = server_input();
        input.ca_path = None;
        assert_eq!(kind_of(&input), ErrorKind::MissingField);

        let mut input = server_input();
        input.dn = None;
        assert_eq!(kind_of(&input), ErrorKind::MissingField);

        let mut input = server_input();
        input.cert_type = None;
        assert_eq!(kind_of(&input), ErrorKind::MissingField);
    }

    #[test]
    fn test_missing_dn_differs_from_malformed_dn() {
        let mut input = server_input();
        input.dn = Some("   ".to_string());
        assert_eq!(kind_of(&input), ErrorKind::MissingField);

        input.dn = Some("not a dn".to_string());
        assert_eq!(kind_of(&input), ErrorKind::MalformedDn);
    }

    #[test]
    fn test_invalid_enums() {
        let mut input = server_input();
        input.cert_type = Some("router".to_string());
        assert_eq!(kind_of(&input), ErrorKind::InvalidEnum);

        let mut input = server_input();
        input.digest = Some("SHA3".to_string());
        assert_eq!(kind_of(&input), ErrorKind::InvalidEnum);
    }

    #[test]
    fn test_zero_days_rejected() {
        let mut input = server_input();
        input.days = Some(0);
        assert_eq!(kind_of(&input), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_days_past_year_9999_rejected() {
        let mut input = server_input();
        input.days = Some(u32::MAX);
        let err = validate_request_input(&input).unwrap_err();
        assert!(matches!(err, CaError::InvalidValue { ref field, .. } if field == "days"));

        input.days = Some(2_000_000);
        assert_eq!(validate_request_input(&input).unwrap().requested_days, 2_000_000);
    }

    #[test]
    fn test_custom_requires_extensions() {
        let mut input = server_input();
        input.cert_type = Some("custom".to_string());
        assert_eq!(kind_of(&input), ErrorKind::MissingExtensions);

        input.extensions = Some(" ; ".to_string());
        assert_eq!(kind_of(&input), ErrorKind::MissingExtensions);

        input.extensions = Some("keyUsage:digitalSignature".to_string());
        assert!(validate_request_input(&input).is_ok());
    }

    #[test]
    fn test_custom_malformed_extension() {
        let mut input = server_input();
        input.cert_type = Some("custom".to_string());
        input.extensions = Some("keyUsage".to_string());
        assert_eq!(kind_of(&input), ErrorKind::MalformedExtension);

        input.extensions = Some("frobnicate:yes".to_string());
        assert_eq!(kind_of(&input), ErrorKind::MalformedExtension);
    }

    #[test]
    fn test_non_custom_accepts_extensions() {
        let mut input = server_input();
        input.extensions = Some("keyUsage:cRLSign".to_string());
        let template = validate_request_input(&input).unwrap();
        assert_eq!(template.extensions.len(), 1);
    }

    #[test]
    fn test_save_requires_host() {
        let mut input = server_input();
        input.save = true;
        assert_eq!(kind_of(&input), ErrorKind::MissingField);

        input.host = Some("www.example.com".to_string());
        let template = validate_request_input(&input).unwrap();
        assert_eq!(template.host.as_deref(), Some("www.example.com"));
    }

    #[test]
    fn test_invalid_key_bits() {
        let mut input = server_input();
        input.key_bits = Some(3072);
        assert_eq!(kind_of(&input), ErrorKind::InvalidKeyLength);
    }

    #[test]
    fn test_build_request_binds_id_and_key() {
        let generated = build_request(&server_input()).unwrap();
        let expected = derive_id(&parse_dn("/CN=www.example.com").unwrap()).unwrap();
        assert_eq!(generated.request.id, expected);

        let spki = public_key_info(&generated.private_key.to_public_key()).unwrap();
        assert_eq!(generated.request.public_key, spki);
    }
}
