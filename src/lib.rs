//! casign: a small certificate authority workflow engine.
//!
//! This library manages the lifecycle of certificates issued by a single
//! RSA certificate authority:
//!
//! - Create a CA whose private key is sealed under a passphrase
//! - Build certificate requests from operator input or stored public keys
//! - Sign requests as server, client, peer or custom certificates
//! - Revoke certificates by host and publish signed CRLs
//!
//! Requests, certificates and revocations live in a [`storage::Repository`].
//! All operations return [`Result`]; nothing panics on bad input.
//!
//! # Example
//!
//! ```rust,no_run
//! use casign::cert::authority::{bootstrap, AuthorityBootstrapInput};
//! use casign::cert::request::{build_request, CertificateRequestInput};
//! use casign::cert::signing::{sign_request, SignOptions};
//! use casign::error::Result;
//! use std::path::Path;
//!
//! fn example() -> Result<()> {
//!     let ca = AuthorityBootstrapInput {
//!         dn: Some("/CN=Test CA".to_string()),
//!         ..Default::default()
//!     };
//!     let authority = bootstrap(&ca, "secret123", Path::new("./myCA"))?;
//!
//!     let generated = build_request(&CertificateRequestInput {
//!         ca_path: Some("./myCA".into()),
//!         dn: Some("/CN=www.example.com".to_string()),
//!         cert_type: Some("server".to_string()),
//!         days: Some(365),
//!         ..Default::default()
//!     })?;
//!     let cert = sign_request(&generated.request, &authority, &SignOptions::default())?;
//!     println!("{}", cert.pem);
//!     Ok(())
//! }
//! ```

pub mod cert;
pub mod config;
pub mod crypto;
pub mod error;
pub mod storage;
pub mod workflow;

// Re-export commonly used types
pub use error::{CaError, ErrorKind, Result};
