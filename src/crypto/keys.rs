//! RSA key operations.
//!
//! Key generation for CAs and ad hoc subjects, plus the PKCS#8 and SPKI
//! conversions the rest of the crate needs.

use crate::error::{CaError, Result};
use der::{Decode, Encode};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use spki::SubjectPublicKeyInfoOwned;
use std::fmt;
use zeroize::Zeroizing;

/// The RSA modulus sizes this CA will generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLength {
    Bits1024,
    Bits2048,
    Bits4096,
    Bits8192,
}

impl KeyLength {
    /// The modulus size in bits.
    pub fn bits(self) -> usize {
        match self {
            KeyLength::Bits1024 => 1024,
            KeyLength::Bits2048 => 2048,
            KeyLength::Bits4096 => 4096,
            KeyLength::Bits8192 => 8192,
        }
    }
}

impl TryFrom<u32> for KeyLength {
    type Error = CaError;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            1024 => Ok(KeyLength::Bits1024),
            2048 => Ok(KeyLength::Bits2048),
            4096 => Ok(KeyLength::Bits4096),
            8192 => Ok(KeyLength::Bits8192),
            other => Err(CaError::InvalidKeyLength(other)),
        }
    }
}

impl fmt::Display for KeyLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Generate a new RSA private key.
///
/// # Example
///
/// ```
/// use casign::crypto::keys::{generate_rsa_key, KeyLength};
///
/// let key = generate_rsa_key(KeyLength::Bits1024).unwrap();
/// ```
pub fn generate_rsa_key(length: KeyLength) -> Result<RsaPrivateKey> {
    RsaPrivateKey::new(&mut rand::thread_rng(), length.bits())
        .map_err(|e| CaError::Crypto(format!("RSA key generation failed: {}", e)))
}

/// Encode a private key as PKCS#8 DER. The buffer is zeroed on drop.
pub fn private_key_to_der(key: &RsaPrivateKey) -> Result<Zeroizing<Vec<u8>>> {
    let document = key
        .to_pkcs8_der()
        .map_err(|e| CaError::Crypto(format!("Failed to encode private key: {}", e)))?;
    Ok(Zeroizing::new(document.as_bytes().to_vec()))
}

/// Decode a PKCS#8 DER private key.
pub fn private_key_from_der(der: &[u8]) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_der(der)
        .map_err(|e| CaError::Crypto(format!("Failed to decode private key: {}", e)))
}

/// Encode a private key as PKCS#8 PEM for handing to the operator.
pub fn private_key_to_pem(key: &RsaPrivateKey) -> Result<Zeroizing<String>> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CaError::Crypto(format!("Failed to encode private key: {}", e)))
}

/// Build the SubjectPublicKeyInfo for an RSA public key.
pub fn public_key_info(key: &RsaPublicKey) -> Result<SubjectPublicKeyInfoOwned> {
    let document = key
        .to_public_key_der()
        .map_err(|e| CaError::Crypto(format!("Failed to encode public key: {}", e)))?;
    Ok(SubjectPublicKeyInfoOwned::from_der(document.as_bytes())?)
}

/// Recover an RSA public key from a SubjectPublicKeyInfo.
pub fn rsa_public_key(spki: &SubjectPublicKeyInfoOwned) -> Result<RsaPublicKey> {
    let der = spki.to_der()?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| CaError::Crypto(format!("Not an RSA public key: {}", e)))
}

/// Encode a SubjectPublicKeyInfo as a `PUBLIC KEY` PEM block.
pub fn public_key_info_to_pem(spki: &SubjectPublicKeyInfoOwned) -> Result<String> {
    let der = spki.to_der()?;
    Ok(pem::encode(&pem::Pem::new("PUBLIC KEY", der)))
}

/// Parse a public key from PEM.
///
/// Accepts a bare `PUBLIC KEY` block or a `CERTIFICATE REQUEST`, in which case
/// the key is taken from the request info.
pub fn public_key_info_from_pem(text: &str) -> Result<SubjectPublicKeyInfoOwned> {
    let block =
        pem::parse(text).map_err(|e| CaError::Pem(format!("Failed to parse PEM: {}", e)))?;

    match block.tag() {
        "PUBLIC KEY" => Ok(SubjectPublicKeyInfoOwned::from_der(block.contents())?),
        "CERTIFICATE REQUEST" | "NEW CERTIFICATE REQUEST" => {
            let csr = x509_cert::request::CertReq::from_der(block.contents())?;
            Ok(csr.info.public_key)
        }
        other => Err(CaError::Pem(format!(
            "Expected PUBLIC KEY or CERTIFICATE REQUEST, got {}",
            other
        ))),
    }
}
