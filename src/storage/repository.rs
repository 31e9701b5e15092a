//! The request and certificate repository.
//!
//! [`Repository`] is the store every workflow reads pending requests from and
//! writes certificates, revocations and CRLs to. [`FileRepository`] keeps each
//! collection as a directory of JSON documents, one `<id>.json` per item.

use crate::cert::crl::{Crl, SkippedRecord};
use crate::cert::name::RequestId;
use crate::cert::revocation::RevocationRecord;
use crate::cert::signing::IssuedCertificate;
use crate::error::{CaError, Result};
use crate::storage::records::{PendingRequest, RequestFilter, RevokedListing};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const REQUESTS_DIR: &str = "requests";
const CERTIFICATES_DIR: &str = "certificates";
const REVOKED_DIR: &str = "revoked";
const CRLS_DIR: &str = "crls";

/// Queryable store of requests, certificates, revocations and CRLs.
pub trait Repository {
    /// Unsigned requests matching `filter`, in a stable order.
    fn search_pending_requests(&self, filter: &RequestFilter) -> Result<Vec<PendingRequest>>;

    /// Store a request for later signing.
    fn submit_request(&self, request: &PendingRequest) -> Result<()>;

    /// Store a signed certificate under its request id.
    ///
    /// Fails with [`CaError::SaveConflict`] if one is already stored, unless
    /// `overwrite` is set.
    fn persist_certificate(&self, certificate: &IssuedCertificate, overwrite: bool) -> Result<()>;

    /// The certificate most recently issued for `hostname`.
    fn fetch_certificate_by_host(&self, hostname: &str) -> Result<IssuedCertificate>;

    fn record_revocation(&self, record: &RevocationRecord) -> Result<()>;

    /// The revocation record for a certificate serial, if any.
    fn find_revocation(&self, serial: &str) -> Result<Option<RevocationRecord>>;

    /// Every revocation recorded for certificates issued under `ca_label`.
    ///
    /// Record documents that cannot be read are reported alongside rather
    /// than failing the listing.
    fn list_revoked(&self, ca_label: &str) -> Result<RevokedListing>;

    fn persist_crl(&self, crl: &Crl) -> Result<()>;
}

/// A [`Repository`] backed by a directory tree of JSON documents.
#[derive(Debug, Clone)]
pub struct FileRepository {
    root: PathBuf,
    revoked_dir: PathBuf,
}

impl FileRepository {
    /// Open the repository at `root`, creating its collections as needed.
    ///
    /// # Example
    ///
    /// ```
    /// use casign::storage::{FileRepository, Repository, RequestFilter};
    ///
    /// # fn example() -> casign::error::Result<()> {
    /// let dir = tempfile::tempdir()?;
    /// let repository = FileRepository::open(dir.path())?;
    /// assert!(repository.search_pending_requests(&RequestFilter::default())?.is_empty());
    /// # Ok(())
    /// # }
    /// # example().unwrap();
    /// ```
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [REQUESTS_DIR, CERTIFICATES_DIR, CRLS_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }
        let revoked_dir = root.join(REVOKED_DIR);
        fs::create_dir_all(&revoked_dir)?;
        Ok(Self { root, revoked_dir })
    }

    /// Keep revocation records in `dir` instead of `<root>/revoked`.
    pub fn with_revoked_dir(mut self, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        self.revoked_dir = dir;
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn revoked_dir(&self) -> &Path {
        &self.revoked_dir
    }

    fn collection(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn certificate_path(&self, id: &RequestId) -> PathBuf {
        self.collection(CERTIFICATES_DIR)
            .join(format!("{}.json", id.as_str()))
    }

    /// Load every document in a collection, ordered by file name, along
    /// with the paths of documents that failed to load.
    fn list_documents<T: DeserializeOwned>(dir: &Path) -> Result<(Vec<T>, Vec<(PathBuf, CaError)>)> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        let mut unreadable = Vec::new();
        for path in paths {
            match read_document(&path) {
                Ok(document) => documents.push(document),
                Err(e) => unreadable.push((path, e)),
            }
        }
        Ok((documents, unreadable))
    }

    /// Like [`Self::list_documents`], logging and dropping unreadable ones.
    fn list_readable<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
        let (documents, unreadable) = Self::list_documents(dir)?;
        for (path, e) in unreadable {
            warn!(path = %path.display(), error = %e, "skipping unreadable document");
        }
        Ok(documents)
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(document)?;
    fs::write(path, json)?;
    Ok(())
}

/// File stem for a value that may contain path separators.
fn hashed_name(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

impl Repository for FileRepository {
    fn search_pending_requests(&self, filter: &RequestFilter) -> Result<Vec<PendingRequest>> {
        let requests: Vec<PendingRequest> = Self::list_readable(&self.collection(REQUESTS_DIR))?;
        Ok(requests
            .into_iter()
            .filter(|request| filter.matches(request))
            .filter(|request| !self.certificate_path(&request.id).exists())
            .collect())
    }

    fn submit_request(&self, request: &PendingRequest) -> Result<()> {
        let path = self
            .collection(REQUESTS_DIR)
            .join(format!("{}.json", request.id.as_str()));
        write_document(&path, request)?;
        debug!(id = %request.id, subject = %request.subject, "request submitted");
        Ok(())
    }

    fn persist_certificate(&self, certificate: &IssuedCertificate, overwrite: bool) -> Result<()> {
        let path = self.certificate_path(&certificate.request_id);
        if path.exists() && !overwrite {
            return Err(CaError::SaveConflict(certificate.request_id.to_string()));
        }
        write_document(&path, certificate)?;
        debug!(id = %certificate.request_id, overwrite, "certificate persisted");
        Ok(())
    }

    fn fetch_certificate_by_host(&self, hostname: &str) -> Result<IssuedCertificate> {
        let certificates: Vec<IssuedCertificate> =
            Self::list_readable(&self.collection(CERTIFICATES_DIR))?;
        certificates
            .into_iter()
            .filter(|cert| cert.host.as_deref() == Some(hostname))
            .max_by_key(|cert| cert.not_before)
            .ok_or_else(|| CaError::NotFound(format!("No certificate for host {}", hostname)))
    }

    fn record_revocation(&self, record: &RevocationRecord) -> Result<()> {
        let path = self.revoked_dir.join(format!("{}.json", record.serial));
        write_document(&path, record)
    }

    fn find_revocation(&self, serial: &str) -> Result<Option<RevocationRecord>> {
        let path = self.revoked_dir.join(format!("{}.json", serial));
        if !path.is_file() {
            return Ok(None);
        }
        read_document(&path).map(Some)
    }

    fn list_revoked(&self, ca_label: &str) -> Result<RevokedListing> {
        let (records, unreadable) = Self::list_documents::<RevocationRecord>(&self.revoked_dir)?;
        Ok(RevokedListing {
            records: records
                .into_iter()
                .filter(|record| record.ca_label == ca_label)
                .collect(),
            unreadable: unreadable
                .into_iter()
                .map(|(path, e)| SkippedRecord {
                    source: path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string()),
                    error: e.to_string(),
                })
                .collect(),
        })
    }

    fn persist_crl(&self, crl: &Crl) -> Result<()> {
        let path = self
            .collection(CRLS_DIR)
            .join(format!("{}.json", hashed_name(&crl.ca_label)));
        write_document(&path, crl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::name::{derive_id, parse_dn, DistinguishedName};
    use crate::cert::request::CertificateType;
    use crate::crypto::digest::DigestAlgorithm;
    use chrono::{DateTime, Duration, Utc};
    use tempfile::TempDir;

    fn certificate(cn: &str, host: &str, serial: &str, issued: i64) -> IssuedCertificate {
        let subject: DistinguishedName = parse_dn(&format!("/CN={}", cn)).unwrap();
        let not_before = DateTime::from_timestamp(issued, 0).unwrap();
        IssuedCertificate {
            request_id: derive_id(&subject).unwrap(),
            subject,
            issuer: parse_dn("/CN=Test CA").unwrap(),
            serial: serial.to_string(),
            not_before,
            not_after: not_before + Duration::days(365),
            digest: DigestAlgorithm::Sha256,
            sha1_fingerprint: String::new(),
            pem: String::new(),
            host: Some(host.to_string()),
            ca_label: "/CN=Test CA".to_string(),
            cert_type: CertificateType::Server,
        }
    }

    fn pending(cn: &str, ca: &str) -> PendingRequest {
        let subject = format!("/CN={}", cn);
        PendingRequest {
            id: derive_id(&parse_dn(&subject).unwrap()).unwrap(),
            subject,
            cert_type: "server".to_string(),
            digest: "SHA256".to_string(),
            days: 365,
            ca: ca.to_string(),
            host: cn.to_string(),
            public_key_pem: String::new(),
            extensions: None,
            subject_alt_names: Vec::new(),
            submitted_at: Utc::now(),
        }
    }

    fn revocation(cert: &IssuedCertificate) -> RevocationRecord {
        RevocationRecord {
            request_id: cert.request_id.clone(),
            serial: cert.serial.clone(),
            subject: cert.subject.to_string(),
            host: cert.host.clone().unwrap_or_default(),
            ca_label: cert.ca_label.clone(),
            revoked_at: Utc::now(),
            reason: None,
        }
    }

    #[test]
    fn test_open_creates_collections() {
        let dir = TempDir::new().unwrap();
        let repository = FileRepository::open(dir.path().join("repo")).unwrap();
        for name in [REQUESTS_DIR, CERTIFICATES_DIR, REVOKED_DIR, CRLS_DIR] {
            assert!(repository.root().join(name).is_dir());
        }
    }

    #[test]
    fn test_persist_conflict_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let repository = FileRepository::open(dir.path()).unwrap();
        let first = certificate("www.example.com", "www", "01", 1_000);
        repository.persist_certificate(&first, false).unwrap();

        let second = certificate("www.example.com", "www", "02", 2_000);
        let err = repository.persist_certificate(&second, false).unwrap_err();
        assert!(matches!(err, CaError::SaveConflict(_)));
        assert_eq!(repository.fetch_certificate_by_host("www").unwrap().serial, "01");

        repository.persist_certificate(&second, true).unwrap();
        assert_eq!(repository.fetch_certificate_by_host("www").unwrap().serial, "02");
    }

    #[test]
    fn test_fetch_by_host_not_found() {
        let dir = TempDir::new().unwrap();
        let repository = FileRepository::open(dir.path()).unwrap();
        let err = repository.fetch_certificate_by_host("nowhere").unwrap_err();
        assert!(matches!(err, CaError::NotFound(_)));
    }

    #[test]
    fn test_fetch_by_host_prefers_latest() {
        let dir = TempDir::new().unwrap();
        let repository = FileRepository::open(dir.path()).unwrap();
        repository
            .persist_certificate(&certificate("a.example.com", "shared", "01", 1_000), false)
            .unwrap();
        repository
            .persist_certificate(&certificate("b.example.com", "shared", "02", 5_000), false)
            .unwrap();
        assert_eq!(repository.fetch_certificate_by_host("shared").unwrap().serial, "02");
    }

    #[test]
    fn test_search_excludes_signed_requests() {
        let dir = TempDir::new().unwrap();
        let repository = FileRepository::open(dir.path()).unwrap();
        repository.submit_request(&pending("a.example.com", "ops")).unwrap();
        repository.submit_request(&pending("b.example.com", "ops")).unwrap();
        repository.submit_request(&pending("c.example.com", "dev")).unwrap();

        let ops = repository
            .search_pending_requests(&RequestFilter::for_ca("ops"))
            .unwrap();
        assert_eq!(ops.len(), 2);

        repository
            .persist_certificate(&certificate("a.example.com", "a", "01", 1_000), false)
            .unwrap();
        let ops = repository
            .search_pending_requests(&RequestFilter::for_ca("ops"))
            .unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].subject, "/CN=b.example.com");
    }

    #[test]
    fn test_search_order_is_stable() {
        let dir = TempDir::new().unwrap();
        let repository = FileRepository::open(dir.path()).unwrap();
        for cn in ["z.example.com", "m.example.com", "a.example.com"] {
            repository.submit_request(&pending(cn, "ops")).unwrap();
        }
        let first = repository.search_pending_requests(&RequestFilter::default()).unwrap();
        let second = repository.search_pending_requests(&RequestFilter::default()).unwrap();
        assert_eq!(first, second);
        let ids: Vec<_> = first.iter().map(|r| r.id.clone()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_revocations_filtered_by_label() {
        let dir = TempDir::new().unwrap();
        let repository = FileRepository::open(dir.path()).unwrap();
        let cert = certificate("www.example.com", "www", "0A", 1_000);
        let mut other = certificate("db.example.com", "db", "0B", 1_000);
        other.ca_label = "other".to_string();

        repository.record_revocation(&revocation(&cert)).unwrap();
        repository.record_revocation(&revocation(&other)).unwrap();

        assert_eq!(repository.list_revoked("/CN=Test CA").unwrap().records.len(), 1);
        assert_eq!(repository.list_revoked("other").unwrap().records.len(), 1);
        assert!(repository.find_revocation("0A").unwrap().is_some());
        assert!(repository.find_revocation("FF").unwrap().is_none());
    }

    #[test]
    fn test_relocated_revoked_dir() {
        let dir = TempDir::new().unwrap();
        let repository = FileRepository::open(dir.path().join("repo"))
            .unwrap()
            .with_revoked_dir(dir.path().join("revoked-elsewhere"))
            .unwrap();
        let cert = certificate("www.example.com", "www", "0A", 1_000);
        repository.record_revocation(&revocation(&cert)).unwrap();

        assert!(dir.path().join("revoked-elsewhere/0A.json").is_file());
        assert_eq!(repository.list_revoked("/CN=Test CA").unwrap().records.len(), 1);
    }

    #[test]
    fn test_unreadable_revocation_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let repository = FileRepository::open(dir.path()).unwrap();
        let cert = certificate("www.example.com", "www", "0A", 1_000);
        repository.record_revocation(&revocation(&cert)).unwrap();
        fs::write(repository.revoked_dir().join("ZZ.json"), "{ truncated").unwrap();

        let listing = repository.list_revoked("/CN=Test CA").unwrap();
        assert_eq!(listing.records.len(), 1);
        assert_eq!(listing.unreadable.len(), 1);
        assert_eq!(listing.unreadable[0].source, "ZZ.json");
    }

    #[test]
    fn test_unreadable_request_skipped_in_search() {
        let dir = TempDir::new().unwrap();
        let repository = FileRepository::open(dir.path()).unwrap();
        repository.submit_request(&pending("a.example.com", "ops")).unwrap();
        fs::write(repository.root().join(REQUESTS_DIR).join("broken.json"), "[").unwrap();

        let found = repository.search_pending_requests(&RequestFilter::default()).unwrap();
        assert_eq!(found.len(), 1);
    }
}
