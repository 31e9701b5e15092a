//! Certificate extensions.
//!
//! Standard certificate types get a fixed extension profile. Custom
//! certificates carry operator-written entries such as
//! `keyUsage:digitalSignature; extendedKeyUsage:serverAuth`, interpreted
//! against a closed vocabulary.

use crate::cert::request::CertificateType;
use crate::error::{CaError, Result};
use const_oid::db::rfc5280;
use const_oid::ObjectIdentifier;
use der::asn1::{Ia5String, OctetString};
use der::Encode;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use spki::SubjectPublicKeyInfoOwned;
use std::net::IpAddr;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, KeyUsages,
    SubjectAltName, SubjectKeyIdentifier,
};
use x509_cert::ext::Extension;

/// One `name:value` extension entry as written by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionEntry {
    pub name: String,
    pub value: String,
}

/// Parse `;`-separated extension text.
///
/// All whitespace is removed first, then each entry is split on its first
/// `:`. An entry without a `:` (or with an empty name or value) fails with
/// [`CaError::MalformedExtension`]. Empty segments from stray separators are
/// skipped.
///
/// # Example
///
/// ```
/// use casign::cert::extensions::parse_extensions;
///
/// let entries = parse_extensions("keyUsage:digitalSignature; extendedKeyUsage:serverAuth").unwrap();
/// assert_eq!(entries.len(), 2);
/// assert_eq!(entries[1].value, "serverAuth");
/// ```
pub fn parse_extensions(text: &str) -> Result<Vec<ExtensionEntry>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();

    compact
        .split(';')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (name, value) = segment.split_once(':').ok_or_else(|| {
                CaError::MalformedExtension(format!("'{}' has no ':' separator", segment))
            })?;
            if name.is_empty() || value.is_empty() {
                return Err(CaError::MalformedExtension(format!(
                    "'{}' needs both a name and a value",
                    segment
                )));
            }
            Ok(ExtensionEntry {
                name: name.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

/// Interpret every entry and encode it, failing on the first one outside the
/// supported vocabulary.
pub fn encode_custom_extensions(entries: &[ExtensionEntry]) -> Result<Vec<Extension>> {
    let mut extensions = Vec::with_capacity(entries.len());
    for entry in entries {
        let extension = encode_custom_extension(entry)?;
        if extensions
            .iter()
            .any(|existing: &Extension| existing.extn_id == extension.extn_id)
        {
            return Err(CaError::MalformedExtension(format!(
                "{} specified more than once",
                entry.name
            )));
        }
        extensions.push(extension);
    }
    Ok(extensions)
}

fn encode_custom_extension(entry: &ExtensionEntry) -> Result<Extension> {
    let (critical, value) = match entry.value.strip_prefix("critical,") {
        Some(rest) => (true, rest),
        None => (false, entry.value.as_str()),
    };

    match entry.name.as_str() {
        "basicConstraints" => {
            encode_extension(rfc5280::ID_CE_BASIC_CONSTRAINTS, critical, &parse_basic_constraints(value)?)
        }
        "keyUsage" => encode_extension(rfc5280::ID_CE_KEY_USAGE, critical, &parse_key_usage(value)?),
        "extendedKeyUsage" => encode_extension(
            rfc5280::ID_CE_EXT_KEY_USAGE,
            critical,
            &parse_extended_key_usage(value)?,
        ),
        "subjectAltName" => {
            let names = value.split(',').map(str::to_string).collect::<Vec<_>>();
            encode_extension(rfc5280::ID_CE_SUBJECT_ALT_NAME, critical, &subject_alt_name(&names)?)
        }
        other => Err(CaError::MalformedExtension(format!(
            "Unsupported extension '{}'",
            other
        ))),
    }
}

fn parse_basic_constraints(value: &str) -> Result<BasicConstraints> {
    let mut constraints = BasicConstraints {
        ca: false,
        path_len_constraint: None,
    };
    for part in value.split(',') {
        match part.split_once(':') {
            Some((key, flag)) if key.eq_ignore_ascii_case("CA") => {
                constraints.ca = match flag.to_ascii_uppercase().as_str() {
                    "TRUE" => true,
                    "FALSE" => false,
                    _ => {
                        return Err(CaError::MalformedExtension(format!(
                            "basicConstraints CA must be TRUE or FALSE, got '{}'",
                            flag
                        )))
                    }
                };
            }
            Some((key, len)) if key.eq_ignore_ascii_case("pathlen") => {
                let len = len.parse::<u8>().map_err(|_| {
                    CaError::MalformedExtension(format!("Invalid pathlen '{}'", len))
                })?;
                constraints.path_len_constraint = Some(len);
            }
            _ => {
                return Err(CaError::MalformedExtension(format!(
                    "Unsupported basicConstraints value '{}'",
                    part
                )))
            }
        }
    }
    Ok(constraints)
}

fn key_usage_flag(name: &str) -> Option<KeyUsages> {
    let flag = match name {
        "digitalSignature" => KeyUsages::DigitalSignature,
        "nonRepudiation" => KeyUsages::NonRepudiation,
        "keyEncipherment" => KeyUsages::KeyEncipherment,
        "dataEncipherment" => KeyUsages::DataEncipherment,
        "keyAgreement" => KeyUsages::KeyAgreement,
        "keyCertSign" => KeyUsages::KeyCertSign,
        "cRLSign" => KeyUsages::CRLSign,
        "encipherOnly" => KeyUsages::EncipherOnly,
        "decipherOnly" => KeyUsages::DecipherOnly,
        _ => return None,
    };
    Some(flag)
}

fn parse_key_usage(value: &str) -> Result<KeyUsage> {
    let mut flags = value.split(',').map(|name| {
        key_usage_flag(name)
            .ok_or_else(|| CaError::MalformedExtension(format!("Unknown key usage '{}'", name)))
    });

    let first = flags
        .next()
        .ok_or_else(|| CaError::MalformedExtension("keyUsage is empty".to_string()))??;
    let mut usage = KeyUsage(first.into());
    for flag in flags {
        usage.0 |= flag?;
    }
    Ok(usage)
}

fn extended_key_usage_oid(name: &str) -> Option<ObjectIdentifier> {
    let oid = match name {
        "serverAuth" => rfc5280::ID_KP_SERVER_AUTH,
        "clientAuth" => rfc5280::ID_KP_CLIENT_AUTH,
        "codeSigning" => rfc5280::ID_KP_CODE_SIGNING,
        "emailProtection" => rfc5280::ID_KP_EMAIL_PROTECTION,
        "timeStamping" => rfc5280::ID_KP_TIME_STAMPING,
        "OCSPSigning" => rfc5280::ID_KP_OCSP_SIGNING,
        _ => return None,
    };
    Some(oid)
}

fn parse_extended_key_usage(value: &str) -> Result<ExtendedKeyUsage> {
    value
        .split(',')
        .map(|name| {
            extended_key_usage_oid(name).ok_or_else(|| {
                CaError::MalformedExtension(format!("Unknown extended key usage '{}'", name))
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(ExtendedKeyUsage)
}

/// Build a subjectAltName from `DNS:`, `IP:` or `email:` prefixed entries.
/// Unprefixed entries are DNS names.
pub fn subject_alt_name(names: &[String]) -> Result<SubjectAltName> {
    let mut general_names = Vec::with_capacity(names.len());
    for name in names {
        let (kind, value) = name.split_once(':').unwrap_or(("DNS", name.as_str()));
        let general_name = match kind {
            "DNS" => GeneralName::DnsName(ia5(value)?),
            "email" => GeneralName::Rfc822Name(ia5(value)?),
            "IP" => {
                let addr = value.parse::<IpAddr>().map_err(|_| {
                    CaError::MalformedExtension(format!("Invalid IP address '{}'", value))
                })?;
                let octets = match addr {
                    IpAddr::V4(v4) => v4.octets().to_vec(),
                    IpAddr::V6(v6) => v6.octets().to_vec(),
                };
                GeneralName::IpAddress(OctetString::new(octets)?)
            }
            other => {
                return Err(CaError::MalformedExtension(format!(
                    "Unsupported subjectAltName type '{}'",
                    other
                )))
            }
        };
        general_names.push(general_name);
    }
    if general_names.is_empty() {
        return Err(CaError::MalformedExtension("subjectAltName is empty".to_string()));
    }
    Ok(SubjectAltName(general_names))
}

fn ia5(value: &str) -> Result<Ia5String> {
    Ia5String::new(value)
        .map_err(|_| CaError::MalformedExtension(format!("'{}' is not an IA5 string", value)))
}

fn encode_extension<T: Encode>(oid: ObjectIdentifier, critical: bool, value: &T) -> Result<Extension> {
    Ok(Extension {
        extn_id: oid,
        critical,
        extn_value: OctetString::new(value.to_der()?)?,
    })
}

/// SHA-1 over the subject public key bits (RFC 5280 method 1).
pub fn key_identifier(spki: &SubjectPublicKeyInfoOwned) -> Result<OctetString> {
    let digest = Sha1::digest(spki.subject_public_key.raw_bytes());
    Ok(OctetString::new(digest.to_vec())?)
}

/// Extensions for a self-signed CA certificate.
pub fn authority_extensions(spki: &SubjectPublicKeyInfoOwned) -> Result<Vec<Extension>> {
    let constraints = BasicConstraints {
        ca: true,
        path_len_constraint: None,
    };
    let usage = KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign);
    Ok(vec![
        encode_extension(rfc5280::ID_CE_BASIC_CONSTRAINTS, true, &constraints)?,
        encode_extension(rfc5280::ID_CE_KEY_USAGE, true, &usage)?,
        encode_extension(
            rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER,
            false,
            &SubjectKeyIdentifier(key_identifier(spki)?),
        )?,
    ])
}

/// The authorityKeyIdentifier extension pointing at an issuer key.
pub fn authority_key_identifier(issuer_spki: &SubjectPublicKeyInfoOwned) -> Result<Extension> {
    let aki = AuthorityKeyIdentifier {
        key_identifier: Some(key_identifier(issuer_spki)?),
        authority_cert_issuer: None,
        authority_cert_serial_number: None,
    };
    encode_extension(rfc5280::ID_CE_AUTHORITY_KEY_IDENTIFIER, false, &aki)
}

/// Select the extensions for a leaf certificate of the given type.
///
/// Custom certificates get exactly the operator's entries; every other type
/// gets its fixed profile and ignores `custom`.
pub fn leaf_extensions(
    cert_type: CertificateType,
    custom: &[ExtensionEntry],
    subject_alt_names: &[String],
    subject_spki: &SubjectPublicKeyInfoOwned,
    issuer_spki: &SubjectPublicKeyInfoOwned,
) -> Result<Vec<Extension>> {
    let (usage, purposes) = match cert_type {
        CertificateType::Custom => {
            if custom.is_empty() {
                return Err(CaError::MissingExtensions);
            }
            return encode_custom_extensions(custom);
        }
        CertificateType::Server => (
            KeyUsage(KeyUsages::DigitalSignature | KeyUsages::KeyEncipherment),
            vec![rfc5280::ID_KP_SERVER_AUTH],
        ),
        CertificateType::Client => (
            KeyUsage(KeyUsages::DigitalSignature.into()),
            vec![rfc5280::ID_KP_CLIENT_AUTH],
        ),
        CertificateType::Peer => (
            KeyUsage(KeyUsages::DigitalSignature | KeyUsages::KeyEncipherment),
            vec![rfc5280::ID_KP_SERVER_AUTH, rfc5280::ID_KP_CLIENT_AUTH],
        ),
    };

    let constraints = BasicConstraints {
        ca: false,
        path_len_constraint: None,
    };
    let mut extensions = vec![
        encode_extension(rfc5280::ID_CE_BASIC_CONSTRAINTS, true, &constraints)?,
        encode_extension(rfc5280::ID_CE_KEY_USAGE, true, &usage)?,
        encode_extension(rfc5280::ID_CE_EXT_KEY_USAGE, false, &ExtendedKeyUsage(purposes))?,
        encode_extension(
            rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER,
            false,
            &SubjectKeyIdentifier(key_identifier(subject_spki)?),
        )?,
        authority_key_identifier(issuer_spki)?,
    ];
    if !subject_alt_names.is_empty() {
        extensions.push(encode_extension(
            rfc5280::ID_CE_SUBJECT_ALT_NAME,
            false,
            &subject_alt_name(subject_alt_names)?,
        )?);
    }
    Ok(extensions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::Decode;

    #[test]
    fn test_parse_strips_whitespace_and_splits_on_first_colon() {
        let entries =
            parse_extensions(" keyUsage : digitalSignature ;subjectAltName:DNS:a.example.com; ")
                .unwrap();
        assert_eq!(
            entries,
            vec![
                ExtensionEntry {
                    name: "keyUsage".to_string(),
                    value: "digitalSignature".to_string(),
                },
                ExtensionEntry {
                    name: "subjectAltName".to_string(),
                    value: "DNS:a.example.com".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_rejects_entry_without_colon() {
        assert!(matches!(
            parse_extensions("keyUsage:digitalSignature;serverAuth"),
            Err(CaError::MalformedExtension(_))
        ));
        assert!(matches!(
            parse_extensions("keyUsage:"),
            Err(CaError::MalformedExtension(_))
        ));
    }

    #[test]
    fn test_encode_custom_vocabulary() {
        let entries = parse_extensions(
            "basicConstraints:critical,CA:FALSE;keyUsage:digitalSignature,keyEncipherment;\
             extendedKeyUsage:serverAuth,clientAuth;subjectAltName:DNS:a.example.com,IP:10.0.0.1",
        )
        .unwrap();
        let extensions = encode_custom_extensions(&entries).unwrap();

        assert_eq!(extensions.len(), 4);
        assert!(extensions[0].critical);
        assert!(!extensions[1].critical);

        let eku = ExtendedKeyUsage::from_der(extensions[2].extn_value.as_bytes()).unwrap();
        assert_eq!(
            eku.0,
            vec![rfc5280::ID_KP_SERVER_AUTH, rfc5280::ID_KP_CLIENT_AUTH]
        );
    }

    #[test]
    fn test_encode_custom_rejects_unknown_names_and_values() {
        for text in [
            "nsComment:hello",
            "keyUsage:flyingCar",
            "extendedKeyUsage:serverAuth,teleport",
            "basicConstraints:CA:MAYBE",
            "subjectAltName:URI:http://x",
            "keyUsage:digitalSignature;keyUsage:cRLSign",
        ] {
            let entries = parse_extensions(text).unwrap();
            assert!(
                matches!(encode_custom_extensions(&entries), Err(CaError::MalformedExtension(_))),
                "expected MalformedExtension for {}",
                text
            );
        }
    }

    #[test]
    fn test_subject_alt_name_defaults_to_dns() {
        let san = subject_alt_name(&["www.example.com".to_string(), "email:a@b.c".to_string()])
            .unwrap();
        assert!(matches!(san.0[0], GeneralName::DnsName(_)));
        assert!(matches!(san.0[1], GeneralName::Rfc822Name(_)));
    }
}
