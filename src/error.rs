//! Error types for the casign library.
//!
//! This module defines all error types used throughout the library.
//! Every operation fails with a [`CaError`]; [`CaError::kind`] exposes the
//! stable failure category so callers can branch without matching on messages.

use thiserror::Error;

/// The main error type for casign operations.
#[derive(Error, Debug)]
pub enum CaError {
    /// A required input was not supplied
    #[error("{0} is required")]
    MissingField(String),

    /// A value outside a closed set of choices
    #[error("Invalid {field} '{value}': expected one of {expected}")]
    InvalidEnum {
        field: String,
        value: String,
        expected: String,
    },

    /// A value of the right type but out of range
    #[error("Invalid {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Distinguished name text violates DN grammar
    #[error("Malformed distinguished name: {0}")]
    MalformedDn(String),

    /// An extension entry could not be interpreted
    #[error("Malformed extension: {0}")]
    MalformedExtension(String),

    /// A custom certificate was requested without extensions
    #[error("Extensions need to be specified for type custom")]
    MissingExtensions,

    /// RSA key length outside the recognized set
    #[error("Invalid key length {0}: expected one of 1024, 2048, 4096, 8192")]
    InvalidKeyLength(u32),

    /// CA material already present at the bootstrap destination
    #[error("Destination already contains CA material: {0}")]
    DestinationExists(String),

    /// Passphrase confirmation did not match
    #[error("Passphrases do not match")]
    PassphraseMismatch,

    /// The CA private key could not be decrypted with the given passphrase
    #[error("Wrong passphrase")]
    WrongPassphrase,

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The authority key failed to produce a signature
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Digest enumerated but not implemented by the crypto backend
    #[error("Unsupported digest: {0}")]
    UnsupportedDigest(String),

    /// A record already exists under the same id
    #[error("Save conflict: a certificate with id {0} already exists")]
    SaveConflict(String),

    /// CA signing policy could not be read or parsed
    #[error("Invalid CA configuration: {0}")]
    ConfigInvalid(String),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Key derivation failed
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Encryption or decryption failed for reasons other than the passphrase
    #[error("Encryption/decryption error: {0}")]
    Encryption(String),

    /// Certificate encoding or decoding error
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// PEM encoding/decoding error
    #[error("PEM error: {0}")]
    Pem(String),

    /// Storage I/O error
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stable category of a [`CaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingField,
    InvalidEnum,
    InvalidValue,
    MalformedDn,
    MalformedExtension,
    MissingExtensions,
    InvalidKeyLength,
    DestinationExists,
    PassphraseMismatch,
    WrongPassphrase,
    NotFound,
    SigningFailed,
    UnsupportedDigest,
    SaveConflict,
    ConfigInvalid,
    Internal,
}

impl CaError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaError::MissingField(_) => ErrorKind::MissingField,
            CaError::InvalidEnum { .. } => ErrorKind::InvalidEnum,
            CaError::InvalidValue { .. } => ErrorKind::InvalidValue,
            CaError::MalformedDn(_) => ErrorKind::MalformedDn,
            CaError::MalformedExtension(_) => ErrorKind::MalformedExtension,
            CaError::MissingExtensions => ErrorKind::MissingExtensions,
            CaError::InvalidKeyLength(_) => ErrorKind::InvalidKeyLength,
            CaError::DestinationExists(_) => ErrorKind::DestinationExists,
            CaError::PassphraseMismatch => ErrorKind::PassphraseMismatch,
            CaError::WrongPassphrase => ErrorKind::WrongPassphrase,
            CaError::NotFound(_) => ErrorKind::NotFound,
            CaError::SigningFailed(_) => ErrorKind::SigningFailed,
            CaError::UnsupportedDigest(_) => ErrorKind::UnsupportedDigest,
            CaError::SaveConflict(_) => ErrorKind::SaveConflict,
            CaError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            CaError::Crypto(_)
            | CaError::KeyDerivation(_)
            | CaError::Encryption(_)
            | CaError::Certificate(_)
            | CaError::Pem(_)
            | CaError::Io(_)
            | CaError::Json(_) => ErrorKind::Internal,
        }
    }
}

impl From<der::Error> for CaError {
    fn from(err: der::Error) -> Self {
        CaError::Certificate(format!("DER error: {}", err))
    }
}

/// A specialized Result type for casign operations.
pub type Result<T> = std::result::Result<T, CaError>;
