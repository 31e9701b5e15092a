//! Cryptographic operations module.
//!
//! This module wraps the primitives the CA workflow relies on:
//!
//! - RSA key generation and PKCS#8/SPKI conversion
//! - The closed digest set and PKCS#1 v1.5 signing
//! - Passphrase-based key wrapping using Argon2 and AES-GCM
//!
//! # Example
//!
//! ```rust
//! use casign::crypto::keys::{generate_rsa_key, private_key_to_der, KeyLength};
//! use casign::crypto::encryption::{seal_private_key, open_private_key};
//!
//! # fn example() -> casign::error::Result<()> {
//! let key = generate_rsa_key(KeyLength::Bits1024)?;
//! let der = private_key_to_der(&key)?;
//!
//! let sealed = seal_private_key(&der, "secret123")?;
//! let opened = open_private_key(&sealed, "secret123")?;
//! assert_eq!(der.as_slice(), opened.as_slice());
//! # Ok(())
//! # }
//! ```

pub mod digest;
pub mod encryption;
pub mod keys;
pub mod password;
