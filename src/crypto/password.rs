//! Passphrase-based key derivation.
//!
//! CA private keys are never stored in the clear; the wrapping key is derived
//! from the operator's passphrase with Argon2id.

use crate::error::{CaError, Result};
use argon2::Argon2;
use rand::RngCore;
use zeroize::Zeroizing;

/// The length of the salt used for key derivation.
pub const SALT_LENGTH: usize = 32;

/// The length of the derived wrapping key.
pub const KEY_LENGTH: usize = 32;

/// Generate a random salt for key derivation.
///
/// # Example
///
/// ```
/// use casign::crypto::password::{generate_salt, SALT_LENGTH};
///
/// let salt = generate_salt();
/// assert_eq!(salt.len(), SALT_LENGTH);
/// ```
pub fn generate_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive a wrapping key from a passphrase and salt using Argon2id.
///
/// The returned key is zeroed when dropped.
///
/// # Example
///
/// ```
/// use casign::crypto::password::{derive_key, generate_salt, KEY_LENGTH};
///
/// let salt = generate_salt();
/// let key = derive_key("ca passphrase", &salt).unwrap();
/// assert_eq!(key.len(), KEY_LENGTH);
/// ```
pub fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    if salt.len() != SALT_LENGTH {
        return Err(CaError::KeyDerivation(format!(
            "Salt must be {} bytes, got {}",
            SALT_LENGTH,
            salt.len()
        )));
    }

    let mut output = Zeroizing::new([0u8; KEY_LENGTH]);
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, output.as_mut())
        .map_err(|e| CaError::KeyDerivation(format!("Argon2 error: {}", e)))?;

    Ok(output)
}

/// Check that a passphrase and its confirmation match.
///
/// Bootstrap callers run this before any key material is generated.
pub fn confirm_passphrase(passphrase: &str, confirmation: &str) -> Result<()> {
    if passphrase != confirmation {
        return Err(CaError::PassphraseMismatch);
    }
    if passphrase.is_empty() {
        return Err(CaError::MissingField("passphrase".to_string()));
    }
    Ok(())
}
