//! Distinguished names and content-addressed request identifiers.
//!
//! Two textual layouts are accepted: the OpenSSL slash form
//! (`/C=GB/O=Example/CN=www.example.com`) and the comma form
//! (`CN=www.example.com,O=Example,C=GB`). Attributes keep their input order,
//! which is also their encoding order in certificates. A backslash escapes the
//! next character, so separators may appear inside values.
//!
//! Repeating an attribute type is allowed. Every occurrence is encoded, but
//! [`DistinguishedName::get`] answers with the last one.

use crate::error::{CaError, Result};
use const_oid::db::rfc4519;
use const_oid::ObjectIdentifier;
use der::asn1::{Ia5StringRef, PrintableStringRef, SetOfVec};
use der::{Any, Tag};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};

const EMAIL_ADDRESS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.1");

/// The attribute types a distinguished name may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Country,
    State,
    Locality,
    Organization,
    OrganizationalUnit,
    CommonName,
    Email,
    DomainComponent,
}

struct AttributeEntry {
    kind: AttributeType,
    short: &'static str,
    long: &'static str,
    oid: ObjectIdentifier,
    tag: Tag,
}

static ATTRIBUTES: [AttributeEntry; 8] = [
    AttributeEntry {
        kind: AttributeType::Country,
        short: "C",
        long: "countryName",
        oid: rfc4519::C,
        tag: Tag::PrintableString,
    },
    AttributeEntry {
        kind: AttributeType::State,
        short: "ST",
        long: "stateOrProvinceName",
        oid: rfc4519::ST,
        tag: Tag::Utf8String,
    },
    AttributeEntry {
        kind: AttributeType::Locality,
        short: "L",
        long: "localityName",
        oid: rfc4519::L,
        tag: Tag::Utf8String,
    },
    AttributeEntry {
        kind: AttributeType::Organization,
        short: "O",
        long: "organizationName",
        oid: rfc4519::O,
        tag: Tag::Utf8String,
    },
    AttributeEntry {
        kind: AttributeType::OrganizationalUnit,
        short: "OU",
        long: "organizationalUnitName",
        oid: rfc4519::OU,
        tag: Tag::Utf8String,
    },
    AttributeEntry {
        kind: AttributeType::CommonName,
        short: "CN",
        long: "commonName",
        oid: rfc4519::CN,
        tag: Tag::Utf8String,
    },
    AttributeEntry {
        kind: AttributeType::Email,
        short: "emailAddress",
        long: "email",
        oid: EMAIL_ADDRESS,
        tag: Tag::Ia5String,
    },
    AttributeEntry {
        kind: AttributeType::DomainComponent,
        short: "DC",
        long: "domainComponent",
        oid: rfc4519::DC,
        tag: Tag::Ia5String,
    },
];

impl AttributeType {
    fn entry(self) -> &'static AttributeEntry {
        &ATTRIBUTES[self as usize]
    }

    /// The short name used in the textual forms (`CN`, `O`, `emailAddress`...).
    pub fn short_name(self) -> &'static str {
        self.entry().short
    }

    /// The attribute's object identifier.
    pub fn oid(self) -> ObjectIdentifier {
        self.entry().oid
    }

    fn from_key(key: &str) -> Option<Self> {
        ATTRIBUTES
            .iter()
            .find(|entry| entry.short.eq_ignore_ascii_case(key) || entry.long.eq_ignore_ascii_case(key))
            .map(|entry| entry.kind)
    }

    fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        ATTRIBUTES
            .iter()
            .find(|entry| entry.oid == *oid)
            .map(|entry| entry.kind)
    }

    /// The attribute's ASN.1 string value, checked against its character set.
    fn encode_value(self, value: &str) -> Result<Any> {
        let entry = self.entry();
        let checked = match entry.tag {
            Tag::Ia5String => Ia5StringRef::new(value).map(|_| ()),
            Tag::PrintableString => PrintableStringRef::new(value).map(|_| ()),
            _ => Ok(()),
        };
        checked.map_err(|_| {
            CaError::MalformedDn(format!(
                "{} value '{}' is not a valid {}",
                entry.short, value, entry.tag
            ))
        })?;
        Ok(Any::new(entry.tag, value.as_bytes())?)
    }
}

/// An ordered list of (attribute type, value) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DistinguishedName {
    attributes: Vec<(AttributeType, String)>,
}

impl DistinguishedName {
    /// An empty name.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute, keeping any earlier one of the same type.
    pub fn push(&mut self, kind: AttributeType, value: impl Into<String>) {
        self.attributes.push((kind, value.into()));
    }

    /// Look an attribute up by type. With duplicates, the last one wins.
    pub fn get(&self, kind: AttributeType) -> Option<&str> {
        self.attributes
            .iter()
            .rev()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v.as_str())
    }

    /// The common name, if present.
    pub fn common_name(&self) -> Option<&str> {
        self.get(AttributeType::CommonName)
    }

    /// Iterate attributes in input order.
    pub fn iter(&self) -> impl Iterator<Item = (AttributeType, &str)> {
        self.attributes.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Canonical slash form. Backslashes and slashes inside values are escaped
    /// so distinct names never share a canonical form.
    pub fn canonical_string(&self) -> String {
        let mut out = String::new();
        for (kind, value) in &self.attributes {
            out.push('/');
            out.push_str(kind.short_name());
            out.push('=');
            for c in value.chars() {
                if c == '\\' || c == '/' {
                    out.push('\\');
                }
                out.push(c);
            }
        }
        out
    }

    /// Bytes fed to the identifier digest.
    pub fn canonicalize(&self) -> Vec<u8> {
        self.canonical_string().into_bytes()
    }

    /// Encode as an X.509 `Name`, one attribute per RDN, in input order.
    pub fn to_x509_name(&self) -> Result<Name> {
        let mut rdns = Vec::with_capacity(self.attributes.len());
        for (kind, value) in &self.attributes {
            let atv = AttributeTypeAndValue {
                oid: kind.oid(),
                value: kind.encode_value(value)?,
            };
            let set = SetOfVec::try_from(vec![atv])?;
            rdns.push(RelativeDistinguishedName(set));
        }
        Ok(RdnSequence(rdns))
    }

    /// Decode an X.509 `Name` produced by this crate or a compatible CA.
    pub fn from_x509_name(name: &Name) -> Result<Self> {
        let mut dn = DistinguishedName::new();
        for rdn in name.0.iter() {
            for atv in rdn.0.iter() {
                let kind = AttributeType::from_oid(&atv.oid).ok_or_else(|| {
                    CaError::MalformedDn(format!("Unsupported attribute {}", atv.oid))
                })?;
                let value = std::str::from_utf8(atv.value.value()).map_err(|_| {
                    CaError::MalformedDn(format!("{} is not a string", kind.short_name()))
                })?;
                dn.push(kind, value);
            }
        }
        Ok(dn)
    }
}

/// Parse a distinguished name from slash or comma form.
///
/// # Example
///
/// ```
/// use casign::cert::name::parse_dn;
///
/// let dn = parse_dn("/C=GB/O=Example/CN=www.example.com").unwrap();
/// assert_eq!(dn.common_name(), Some("www.example.com"));
/// ```
pub fn parse_dn(text: &str) -> Result<DistinguishedName> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CaError::MalformedDn("Distinguished name is empty".to_string()));
    }

    let (body, separator) = match trimmed.strip_prefix('/') {
        Some(rest) => (rest, '/'),
        None => (trimmed, ','),
    };

    let mut dn = DistinguishedName::new();
    for component in split_components(body, separator)? {
        let (key, value) = component.split_once('=').ok_or_else(|| {
            CaError::MalformedDn(format!("Missing '=' in component '{}'", component))
        })?;
        let key = key.trim();
        let value = value.trim();

        let kind = AttributeType::from_key(key)
            .ok_or_else(|| CaError::MalformedDn(format!("Unknown attribute type '{}'", key)))?;
        if value.is_empty() {
            return Err(CaError::MalformedDn(format!("Empty value for {}", key)));
        }
        if kind == AttributeType::Country
            && (value.len() != 2 || !value.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(CaError::MalformedDn(format!(
                "Country must be a two-letter code, got '{}'",
                value
            )));
        }
        kind.encode_value(value)?;
        dn.push(kind, value);
    }

    Ok(dn)
}

/// Split on `separator`, honouring backslash escapes. Escaped characters are
/// kept literally, the backslash itself is dropped.
fn split_components(body: &str, separator: char) -> Result<Vec<String>> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            let escaped = chars
                .next()
                .ok_or_else(|| CaError::MalformedDn("Trailing escape character".to_string()))?;
            current.push(escaped);
        } else if c == separator {
            components.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    components.push(current);

    if components.iter().any(|c| c.trim().is_empty()) {
        return Err(CaError::MalformedDn("Empty component".to_string()));
    }
    Ok(components)
}

impl FromStr for DistinguishedName {
    type Err = CaError;

    fn from_str(s: &str) -> Result<Self> {
        parse_dn(s)
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

impl Serialize for DistinguishedName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical_string())
    }
}

impl<'de> Deserialize<'de> for DistinguishedName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_dn(&text).map_err(serde::de::Error::custom)
    }
}

/// Hex-encoded SHA-256 of a name's canonical form; the primary key of
/// requests and certificates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the content-addressed identifier for a subject name.
///
/// Fails with [`CaError::MissingField`] when the name has no common name.
pub fn derive_id(dn: &DistinguishedName) -> Result<RequestId> {
    if dn.common_name().is_none() {
        return Err(CaError::MissingField("CN in distinguished name".to_string()));
    }
    let digest = Sha256::digest(dn.canonicalize());
    Ok(RequestId(hex::encode(digest)))
}
