//! Repository storage.
//!
//! Pending requests, issued certificates, revocation records and CRLs are
//! kept behind the [`Repository`] trait.

pub mod records;
pub mod repository;

pub use records::{PendingRequest, RequestFilter, RevokedListing};
pub use repository::{FileRepository, Repository};
