//! Certificate authority bootstrap and loading.
//!
//! A CA lives in a directory holding its self-signed certificate
//! (`cacert.pem`) and a JSON bundle (`authority.json`) with the
//! passphrase-sealed private key. The key is only ever held decrypted inside
//! an [`Authority`], which is dropped at the end of the signing session.

use crate::cert::extensions::authority_extensions;
use crate::cert::name::{parse_dn, DistinguishedName};
use crate::cert::request::check_days;
use crate::cert::signing::{
    cert_from_pem, cert_to_pem, generate_serial_number, now_seconds, sign_tbs, to_x509_time,
    validity_end,
};
use crate::crypto::digest::DigestAlgorithm;
use crate::crypto::encryption::{open_private_key, seal_private_key};
use crate::crypto::keys::{
    generate_rsa_key, private_key_from_der, private_key_to_der, public_key_info, KeyLength,
};
use crate::error::{CaError, Result};
use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use spki::SubjectPublicKeyInfoOwned;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use x509_cert::certificate::{Certificate, TbsCertificate, Version};
use x509_cert::time::Validity;

/// File name of the CA certificate inside the CA directory.
pub const CA_CERT_FILENAME: &str = "cacert.pem";

/// File name of the sealed key bundle inside the CA directory.
pub const CA_BUNDLE_FILENAME: &str = "authority.json";

pub const DEFAULT_CA_KEY_BITS: u32 = 4096;
pub const DEFAULT_CA_DAYS: u32 = 3650;

/// Raw `makeca` input.
#[derive(Debug, Clone, Default)]
pub struct AuthorityBootstrapInput {
    pub dn: Option<String>,
    pub key_bits: Option<u32>,
    pub days: Option<u32>,
    pub digest: Option<String>,
}

/// Validated bootstrap parameters.
#[derive(Debug, Clone)]
pub struct AuthorityParams {
    pub name: DistinguishedName,
    pub key_length: KeyLength,
    pub validity_days: u32,
    pub digest: DigestAlgorithm,
}

impl AuthorityBootstrapInput {
    /// Validate and apply defaults (4096-bit key, 3650 days, SHA256).
    pub fn validate(&self) -> Result<AuthorityParams> {
        let dn = self
            .dn
            .as_deref()
            .map(str::trim)
            .filter(|dn| !dn.is_empty())
            .ok_or_else(|| CaError::MissingField("--dn".to_string()))?;
        let name = parse_dn(dn)?;

        let key_length = KeyLength::try_from(self.key_bits.unwrap_or(DEFAULT_CA_KEY_BITS))?;

        let validity_days = check_days(self.days.unwrap_or(DEFAULT_CA_DAYS))?;

        let digest: DigestAlgorithm = self.digest.as_deref().unwrap_or("SHA256").parse()?;
        digest.ensure_supported()?;

        Ok(AuthorityParams {
            name,
            key_length,
            validity_days,
            digest,
        })
    }
}

/// An unlocked certificate authority.
pub struct Authority {
    pub name: DistinguishedName,
    pub certificate: Certificate,
    pub certificate_pem: String,
    pub private_key: RsaPrivateKey,
    /// Digest the CA certificate was signed with.
    pub digest: DigestAlgorithm,
    /// The CA directory.
    pub path: PathBuf,
}

impl Authority {
    pub fn public_key_info(&self) -> &SubjectPublicKeyInfoOwned {
        &self.certificate.tbs_certificate.subject_public_key_info
    }
}

impl fmt::Debug for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authority")
            .field("name", &self.name)
            .field("digest", &self.digest)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// On-disk metadata and sealed key of a CA.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthorityBundle {
    name: DistinguishedName,
    digest: DigestAlgorithm,
    key_bits: usize,
    /// Hex of `[salt][nonce][ciphertext]` over the PKCS#8 DER key.
    encrypted_key: String,
    created_at: DateTime<Utc>,
}

impl AuthorityBundle {
    fn save(&self, directory: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(directory.join(CA_BUNDLE_FILENAME), json)?;
        Ok(())
    }
}

fn check_destination(destination: &Path) -> Result<()> {
    for file in [CA_CERT_FILENAME, CA_BUNDLE_FILENAME] {
        let path = destination.join(file);
        if path.exists() {
            return Err(CaError::DestinationExists(path.display().to_string()));
        }
    }
    Ok(())
}

/// Create a new CA in `destination`.
///
/// Input is validated and the destination checked before the key pair is
/// generated; nothing is written when either check fails. Passphrase
/// confirmation is the caller's job.
///
/// # Example
///
/// ```
/// use casign::cert::authority::{bootstrap, AuthorityBootstrapInput};
///
/// # fn example() -> casign::error::Result<()> {
/// let dir = tempfile::tempdir()?;
/// let input = AuthorityBootstrapInput {
///     dn: Some("/CN=Test CA".to_string()),
///     key_bits: Some(1024),
///     ..Default::default()
/// };
/// let authority = bootstrap(&input, "secret123", dir.path())?;
/// assert_eq!(authority.name.to_string(), "/CN=Test CA");
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub fn bootstrap(
    input: &AuthorityBootstrapInput,
    passphrase: &str,
    destination: &Path,
) -> Result<Authority> {
    let params = input.validate()?;
    if passphrase.is_empty() {
        return Err(CaError::MissingField("passphrase".to_string()));
    }
    check_destination(destination)?;

    debug!(bits = %params.key_length, "generating CA key");
    let private_key = generate_rsa_key(params.key_length)?;
    let spki = public_key_info(&private_key.to_public_key())?;

    let not_before = now_seconds();
    let not_after = validity_end(not_before, params.validity_days, "days")?;
    let subject = params.name.to_x509_name()?;

    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: generate_serial_number()?,
        signature: params.digest.signature_algorithm()?,
        issuer: subject.clone(), // Self-signed
        validity: Validity {
            not_before: to_x509_time(not_before)?,
            not_after: to_x509_time(not_after)?,
        },
        subject,
        subject_public_key_info: spki.clone(),
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(authority_extensions(&spki)?),
    };
    let certificate = sign_tbs(tbs, params.digest, &private_key)?;
    let certificate_pem = cert_to_pem(&certificate)?;

    let key_der = private_key_to_der(&private_key)?;
    let bundle = AuthorityBundle {
        name: params.name.clone(),
        digest: params.digest,
        key_bits: params.key_length.bits(),
        encrypted_key: hex::encode(seal_private_key(&key_der, passphrase)?),
        created_at: not_before,
    };

    fs::create_dir_all(destination)?;
    fs::write(destination.join(CA_CERT_FILENAME), &certificate_pem)?;
    bundle.save(destination)?;

    info!(
        name = %params.name,
        path = %destination.display(),
        days = params.validity_days,
        "certificate authority created"
    );

    Ok(Authority {
        name: params.name,
        certificate,
        certificate_pem,
        private_key,
        digest: params.digest,
        path: destination.to_path_buf(),
    })
}

/// Unlock the CA stored at `path`.
///
/// Fails with [`CaError::NotFound`] when the directory holds no CA and with
/// [`CaError::WrongPassphrase`] when the key cannot be decrypted.
pub fn load(path: &Path, passphrase: &str) -> Result<Authority> {
    let bundle_path = path.join(CA_BUNDLE_FILENAME);
    let cert_path = path.join(CA_CERT_FILENAME);
    if !bundle_path.is_file() || !cert_path.is_file() {
        return Err(CaError::NotFound(format!(
            "No certificate authority at {}",
            path.display()
        )));
    }

    let bundle: AuthorityBundle = serde_json::from_str(&fs::read_to_string(&bundle_path)?)?;
    let sealed = hex::decode(&bundle.encrypted_key)
        .map_err(|e| CaError::Encryption(format!("Corrupt sealed key: {}", e)))?;
    let key_der = open_private_key(&sealed, passphrase)?;
    let private_key = private_key_from_der(&key_der)?;

    let certificate_pem = fs::read_to_string(&cert_path)?;
    let certificate = cert_from_pem(&certificate_pem)?;
    let spki = &certificate.tbs_certificate.subject_public_key_info;
    if &public_key_info(&private_key.to_public_key())? != spki {
        return Err(CaError::Crypto(
            "CA private key does not match the CA certificate".to_string(),
        ));
    }

    let name = DistinguishedName::from_x509_name(&certificate.tbs_certificate.subject)?;
    debug!(name = %name, "certificate authority unlocked");

    Ok(Authority {
        name,
        certificate,
        certificate_pem,
        private_key,
        digest: bundle.digest,
        path: path.to_path_buf(),
    })
}
