//! Private key wrapping with AES-256-GCM.
//!
//! The sealed output format is:
//! `[salt (32 bytes)][nonce (12 bytes)][ciphertext + tag]`

use crate::crypto::password::{derive_key, generate_salt, SALT_LENGTH};
use crate::error::{CaError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
};
use zeroize::Zeroizing;

/// The length of the nonce used for AES-GCM encryption.
const NONCE_LENGTH: usize = 12;

/// Seal private key bytes under a passphrase.
///
/// # Example
///
/// ```
/// use casign::crypto::encryption::{seal_private_key, open_private_key};
///
/// let sealed = seal_private_key(b"pkcs8 bytes", "secret123").unwrap();
/// let opened = open_private_key(&sealed, "secret123").unwrap();
/// assert_eq!(opened.as_slice(), b"pkcs8 bytes");
/// ```
pub fn seal_private_key(key: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let salt = generate_salt();
    let wrapping_key = derive_key(passphrase, &salt)?;

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(wrapping_key.as_ref())
        .map_err(|e| CaError::Encryption(format!("Invalid key length: {}", e)))?;
    let ciphertext = cipher
        .encrypt(&nonce_bytes.into(), key)
        .map_err(|e| CaError::Encryption(format!("Encryption failed: {}", e)))?;

    let mut output = Vec::with_capacity(SALT_LENGTH + NONCE_LENGTH + ciphertext.len());
    output.extend_from_slice(&salt);
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);

    Ok(output)
}

/// Open a sealed private key.
///
/// An authentication failure means the passphrase is wrong (or the data was
/// tampered with, which is indistinguishable) and is reported as
/// [`CaError::WrongPassphrase`].
pub fn open_private_key(sealed: &[u8], passphrase: &str) -> Result<Zeroizing<Vec<u8>>> {
    let min_length = SALT_LENGTH + NONCE_LENGTH;
    if sealed.len() < min_length {
        return Err(CaError::Encryption(format!(
            "Sealed key too short: expected at least {} bytes, got {}",
            min_length,
            sealed.len()
        )));
    }

    let (salt, rest) = sealed.split_at(SALT_LENGTH);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LENGTH);

    let wrapping_key = derive_key(passphrase, salt)?;
    let cipher = Aes256Gcm::new_from_slice(wrapping_key.as_ref())
        .map_err(|e| CaError::Encryption(format!("Invalid key length: {}", e)))?;

    let plaintext = cipher
        .decrypt(nonce_bytes.into(), ciphertext)
        .map_err(|_| CaError::WrongPassphrase)?;

    Ok(Zeroizing::new(plaintext))
}
