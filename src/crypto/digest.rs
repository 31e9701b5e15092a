//! Digest algorithms and RSA PKCS#1 v1.5 signing.
//!
//! The digest set is closed. Each algorithm resolves through [`DIGEST_TABLE`]
//! to its name, its `*WithRSAEncryption` OID and a signing function; an entry
//! without a signer is enumerated but unavailable in this build.

use crate::error::{CaError, Result};
use const_oid::{AssociatedOid, ObjectIdentifier};
use der::asn1::BitString;
use der::{Any, Tag};
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use spki::AlgorithmIdentifierOwned;
use std::fmt;
use std::str::FromStr;

type SignFn = fn(&RsaPrivateKey, &[u8]) -> Result<Vec<u8>>;

/// A digest algorithm a certificate or CRL may be signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DigestAlgorithm {
    Sha,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Md5,
}

struct DigestEntry {
    algorithm: DigestAlgorithm,
    name: &'static str,
    signature_oid: ObjectIdentifier,
    signer: Option<SignFn>,
}

/// `shaWithRSASignature` (OIW); there is no SHA-0 implementation to back it.
const SHA_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.15");
const MD5_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.4");
const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
const SHA224_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.14");

static DIGEST_TABLE: [DigestEntry; 7] = [
    DigestEntry {
        algorithm: DigestAlgorithm::Sha,
        name: "SHA",
        signature_oid: SHA_WITH_RSA,
        signer: None,
    },
    DigestEntry {
        algorithm: DigestAlgorithm::Sha1,
        name: "SHA1",
        signature_oid: SHA1_WITH_RSA,
        signer: Some(sign_pkcs1v15::<sha1::Sha1>),
    },
    DigestEntry {
        algorithm: DigestAlgorithm::Sha224,
        name: "SHA224",
        signature_oid: SHA224_WITH_RSA,
        signer: Some(sign_pkcs1v15::<sha2::Sha224>),
    },
    DigestEntry {
        algorithm: DigestAlgorithm::Sha256,
        name: "SHA256",
        signature_oid: SHA256_WITH_RSA,
        signer: Some(sign_pkcs1v15::<sha2::Sha256>),
    },
    DigestEntry {
        algorithm: DigestAlgorithm::Sha384,
        name: "SHA384",
        signature_oid: SHA384_WITH_RSA,
        signer: Some(sign_pkcs1v15::<sha2::Sha384>),
    },
    DigestEntry {
        algorithm: DigestAlgorithm::Sha512,
        name: "SHA512",
        signature_oid: SHA512_WITH_RSA,
        signer: Some(sign_pkcs1v15::<sha2::Sha512>),
    },
    DigestEntry {
        algorithm: DigestAlgorithm::Md5,
        name: "MD5",
        signature_oid: MD5_WITH_RSA,
        signer: Some(sign_pkcs1v15::<md5::Md5>),
    },
];

fn sign_pkcs1v15<D>(key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>>
where
    D: sha2::Digest + AssociatedOid,
{
    let signing_key = SigningKey::<D>::new(key.clone());
    let signature = signing_key
        .try_sign(message)
        .map_err(|e| CaError::SigningFailed(e.to_string()))?;
    Ok(signature.to_vec())
}

impl DigestAlgorithm {
    /// Every algorithm, in the order the CLI lists them.
    pub const ALL: [DigestAlgorithm; 7] = [
        DigestAlgorithm::Sha,
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha224,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
        DigestAlgorithm::Md5,
    ];

    fn entry(self) -> &'static DigestEntry {
        // The table holds one entry per variant, in declaration order.
        &DIGEST_TABLE[self as usize]
    }

    /// The operator-facing name (`SHA256`, `MD5`, ...).
    pub fn name(self) -> &'static str {
        self.entry().name
    }

    /// Whether a signer exists for this algorithm.
    pub fn is_supported(self) -> bool {
        self.entry().signer.is_some()
    }

    /// Fail with [`CaError::UnsupportedDigest`] unless a signer exists.
    pub fn ensure_supported(self) -> Result<()> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(CaError::UnsupportedDigest(self.name().to_string()))
        }
    }

    /// The `AlgorithmIdentifier` placed in certificates and CRLs.
    pub fn signature_algorithm(self) -> Result<AlgorithmIdentifierOwned> {
        self.ensure_supported()?;
        // RSA PKCS#1 v1.5 identifiers carry an explicit NULL parameter.
        let null = Any::new(Tag::Null, Vec::<u8>::new())?;
        Ok(AlgorithmIdentifierOwned {
            oid: self.entry().signature_oid,
            parameters: Some(null),
        })
    }

    /// Sign `message` with `key` using this digest.
    pub fn sign(self, key: &RsaPrivateKey, message: &[u8]) -> Result<BitString> {
        let signer = self
            .entry()
            .signer
            .ok_or_else(|| CaError::UnsupportedDigest(self.name().to_string()))?;
        let signature = signer(key, message)?;
        BitString::from_bytes(&signature)
            .map_err(|e| CaError::SigningFailed(format!("Failed to encode signature: {}", e)))
    }

    fn expected() -> String {
        DIGEST_TABLE
            .iter()
            .map(|entry| entry.name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for DigestAlgorithm {
    type Err = CaError;

    fn from_str(s: &str) -> Result<Self> {
        DIGEST_TABLE
            .iter()
            .find(|entry| entry.name == s)
            .map(|entry| entry.algorithm)
            .ok_or_else(|| CaError::InvalidEnum {
                field: "digest".to_string(),
                value: s.to_string(),
                expected: Self::expected(),
            })
    }
}

impl TryFrom<String> for DigestAlgorithm {
    type Error = CaError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DigestAlgorithm> for String {
    fn from(value: DigestAlgorithm) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{generate_rsa_key, KeyLength};
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::signature::Verifier;

    #[test]
    fn test_table_matches_variant_order() {
        for algorithm in DigestAlgorithm::ALL {
            assert_eq!(algorithm.entry().algorithm, algorithm);
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("SHA256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert_eq!("MD5".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Md5);
        assert_eq!("SHA".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha);
    }

    #[test]
    fn test_parse_rejects_unknown_and_lowercase() {
        for name in ["sha256", "SHA3", "", "OpenSSL::Digest::SHA256"] {
            assert!(matches!(
                name.parse::<DigestAlgorithm>(),
                Err(CaError::InvalidEnum { .. })
            ));
        }
    }

    #[test]
    fn test_sha0_is_enumerated_but_unsupported() {
        let key = generate_rsa_key(KeyLength::Bits1024).unwrap();
        assert!(!DigestAlgorithm::Sha.is_supported());
        assert!(matches!(
            DigestAlgorithm::Sha.sign(&key, b"tbs"),
            Err(CaError::UnsupportedDigest(_))
        ));
        assert!(matches!(
            DigestAlgorithm::Sha.signature_algorithm(),
            Err(CaError::UnsupportedDigest(_))
        ));
    }

    #[test]
    fn test_sign_sha256_verifies() {
        let key = generate_rsa_key(KeyLength::Bits1024).unwrap();
        let signature = DigestAlgorithm::Sha256.sign(&key, b"tbs bytes").unwrap();

        let verifying_key = VerifyingKey::<sha2::Sha256>::new(key.to_public_key());
        let signature = Signature::try_from(signature.raw_bytes()).unwrap();
        assert!(verifying_key.verify(b"tbs bytes", &signature).is_ok());
    }

    #[test]
    fn test_every_supported_digest_signs() {
        let key = generate_rsa_key(KeyLength::Bits1024).unwrap();
        for algorithm in DigestAlgorithm::ALL.into_iter().filter(|a| a.is_supported()) {
            assert!(algorithm.sign(&key, b"tbs").is_ok(), "{} failed", algorithm);
            assert!(algorithm.signature_algorithm().is_ok());
        }
    }

    #[test]
    fn test_serde_uses_names() {
        let json = serde_json::to_string(&DigestAlgorithm::Sha384).unwrap();
        assert_eq!(json, "\"SHA384\"");
        let parsed: DigestAlgorithm = serde_json::from_str("\"SHA1\"").unwrap();
        assert_eq!(parsed, DigestAlgorithm::Sha1);
    }
}
