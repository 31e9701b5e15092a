//! Certificate lifecycle.
//!
//! Names and identifiers, request construction, the authority, signing,
//! revocation and CRL generation, leaf-first.

pub mod authority;
pub mod crl;
pub mod extensions;
pub mod name;
pub mod request;
pub mod revocation;
pub mod signing;
