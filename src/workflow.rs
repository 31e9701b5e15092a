//! End-to-end CA operations.
//!
//! Each function here is one command's worth of work over the certificate
//! modules and a [`Repository`]. Prompting stays with the caller: decisions
//! such as whether to sign or save arrive as arguments or callbacks.

use crate::cert::authority::Authority;
use crate::cert::crl::{generate_crl, Crl};
use crate::cert::extensions::parse_extensions;
use crate::cert::name::{derive_id, parse_dn, RequestId};
use crate::cert::request::{
    check_days, generate_request, request_from_pending, CertificateRequest, CertificateType,
    RequestTemplate, DEFAULT_REQUEST_DAYS,
};
use crate::cert::signing::{
    attach_certificate, sign_request, AttachedCertificate, IssuedCertificate, SignOptions,
};
use crate::config::CaPolicy;
use crate::crypto::digest::DigestAlgorithm;
use crate::crypto::keys::{private_key_to_pem, public_key_info_from_pem};
use crate::error::{CaError, Result};
use crate::storage::{PendingRequest, Repository, RequestFilter};
use chrono::Utc;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// A certificate issued around a freshly generated key.
pub struct Issued {
    pub certificate: IssuedCertificate,
    pub private_key_pem: Zeroizing<String>,
}

/// Generate a key for `template`, sign it, and persist the certificate when
/// `save` is set.
///
/// A [`CaError::SaveConflict`] is returned as is; the signed certificate is
/// not retried.
pub fn issue<R: Repository + ?Sized>(
    template: RequestTemplate,
    authority: &Authority,
    options: &SignOptions,
    repository: &R,
    save: bool,
    overwrite: bool,
) -> Result<Issued> {
    let generated = generate_request(template)?;
    let certificate = sign_request(&generated.request, authority, options)?;
    if save {
        repository.persist_certificate(&certificate, overwrite)?;
    }

    Ok(Issued {
        certificate,
        private_key_pem: private_key_to_pem(&generated.private_key)?,
    })
}

/// Attributes of a request submitted with an external public key.
#[derive(Debug, Clone, Default)]
pub struct SubmitInput {
    pub dn: Option<String>,
    pub cert_type: Option<String>,
    pub digest: Option<String>,
    pub days: Option<u32>,
    pub ca_name: Option<String>,
    pub host: Option<String>,
    pub extensions: Option<String>,
    pub subject_alt_names: Vec<String>,
    pub public_key_pem: String,
}

/// Validate and store a pending request.
pub fn submit<R: Repository + ?Sized>(repository: &R, input: &SubmitInput) -> Result<PendingRequest> {
    let dn = input
        .dn
        .as_deref()
        .filter(|dn| !dn.trim().is_empty())
        .ok_or_else(|| CaError::MissingField("--dn".to_string()))?;
    let name = parse_dn(dn)?;
    let id = derive_id(&name)?;

    let cert_type: CertificateType = input.cert_type.as_deref().unwrap_or("server").parse()?;
    let digest: DigestAlgorithm = input.digest.as_deref().unwrap_or("SHA256").parse()?;
    let days = check_days(input.days.unwrap_or(DEFAULT_REQUEST_DAYS))?;
    if let Some(text) = input.extensions.as_deref() {
        let entries = parse_extensions(text)?;
        if cert_type == CertificateType::Custom && entries.is_empty() {
            return Err(CaError::MissingExtensions);
        }
    } else if cert_type == CertificateType::Custom {
        return Err(CaError::MissingExtensions);
    }

    let ca = required(&input.ca_name, "--ca-name")?;
    let host = required(&input.host, "--host")?;
    public_key_info_from_pem(&input.public_key_pem)?;

    let pending = PendingRequest {
        id,
        subject: name.to_string(),
        cert_type: cert_type.to_string(),
        digest: digest.to_string(),
        days,
        ca,
        host,
        public_key_pem: input.public_key_pem.trim().to_string(),
        extensions: input.extensions.clone(),
        subject_alt_names: input.subject_alt_names.clone(),
        submitted_at: Utc::now(),
    };
    repository.submit_request(&pending)?;
    info!(subject = %pending.subject, ca = %pending.ca, "request submitted");
    Ok(pending)
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CaError::MissingField(field.to_string()))
}

/// Bind a certificate signed elsewhere to a stored request.
pub fn attach_pending(pending: &PendingRequest, pem_text: &str) -> Result<AttachedCertificate> {
    let request = request_from_pending(pending)?;
    attach_certificate(&request, pem_text, &pending.ca)
}

/// Outcome of an [`autosign`] or [`attach_batch`] run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub signed: Vec<IssuedCertificate>,
    pub declined: Vec<RequestId>,
    /// Requests addressed to a CA other than the one signing.
    pub foreign: Vec<RequestId>,
    pub failed: Vec<(RequestId, CaError)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Attach externally signed certificates to the pending requests matching
/// `filter`.
///
/// `supply` returns the PEM for a request, or `None` to pass it over; its
/// errors end the batch. `approve` decides whether an attached certificate
/// is saved. A bad certificate or a failed save is recorded against its
/// request and the batch moves on.
pub fn attach_batch<R, S, A>(
    repository: &R,
    filter: &RequestFilter,
    overwrite: bool,
    mut supply: S,
    mut approve: A,
) -> Result<BatchReport>
where
    R: Repository + ?Sized,
    S: FnMut(&PendingRequest) -> Result<Option<String>>,
    A: FnMut(&PendingRequest, &AttachedCertificate) -> bool,
{
    let pending = repository.search_pending_requests(filter)?;
    let mut report = BatchReport::default();

    for item in &pending {
        let pem_text = match supply(item)? {
            Some(text) => text,
            None => {
                report.declined.push(item.id.clone());
                continue;
            }
        };
        let attached = match attach_pending(item, &pem_text) {
            Ok(attached) => attached,
            Err(e) => {
                warn!(id = %item.id, error = %e, "certificate not attached");
                report.failed.push((item.id.clone(), e));
                continue;
            }
        };
        if !approve(item, &attached) {
            report.declined.push(item.id.clone());
            continue;
        }
        match repository.persist_certificate(&attached.certificate, overwrite) {
            Ok(()) => report.signed.push(attached.certificate),
            Err(e) => {
                warn!(id = %item.id, error = %e, "certificate not saved");
                report.failed.push((item.id.clone(), e));
            }
        }
    }

    Ok(report)
}

/// Sign every pending request matching `filter` that `decide` approves.
///
/// Only requests addressed to the label being signed under (`options.ca_name`,
/// or the authority's DN) are considered; others are listed in
/// [`BatchReport::foreign`]. Items are handled one at a time and each is
/// persisted before the next is considered. A failing item is recorded in
/// the report and the batch moves on.
pub fn autosign<R, F>(
    repository: &R,
    authority: &Authority,
    filter: &RequestFilter,
    options: &SignOptions,
    overwrite: bool,
    mut decide: F,
) -> Result<BatchReport>
where
    R: Repository + ?Sized,
    F: FnMut(&CertificateRequest) -> bool,
{
    let label = options
        .ca_name
        .clone()
        .unwrap_or_else(|| authority.name.to_string());
    let pending = repository.search_pending_requests(filter)?;
    let mut report = BatchReport::default();

    for item in &pending {
        if item.ca != label {
            debug!(id = %item.id, ca = %item.ca, "request addressed to another CA");
            report.foreign.push(item.id.clone());
            continue;
        }
        let request = match request_from_pending(item) {
            Ok(request) => request,
            Err(e) => {
                warn!(id = %item.id, error = %e, "skipping unusable request");
                report.failed.push((item.id.clone(), e));
                continue;
            }
        };
        if !decide(&request) {
            report.declined.push(request.id);
            continue;
        }

        let signed = sign_request(&request, authority, options)
            .and_then(|cert| repository.persist_certificate(&cert, overwrite).map(|_| cert));
        match signed {
            Ok(cert) => report.signed.push(cert),
            Err(e) => {
                warn!(id = %request.id, error = %e, "signing failed");
                report.failed.push((request.id, e));
            }
        }
    }

    info!(
        signed = report.signed.len(),
        declined = report.declined.len(),
        foreign = report.foreign.len(),
        failed = report.failed.len(),
        "autosign finished"
    );
    Ok(report)
}

/// Rebuild the CRL for `ca_label`, write it to `crl_path` and record it in
/// the repository.
///
/// Revocation records that cannot be read or listed are reported in
/// [`Crl::skipped`]; the CRL is still written with the rest.
pub fn gencrl<R: Repository + ?Sized>(
    repository: &R,
    authority: &Authority,
    policy: &CaPolicy,
    ca_label: &str,
    crl_path: &Path,
) -> Result<Crl> {
    let listing = repository.list_revoked(ca_label)?;
    let mut crl = generate_crl(authority, &listing.records, ca_label, &policy.crl)?;
    crl.skipped.extend(listing.unreadable);

    if let Some(parent) = crl_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(crl_path, &crl.pem)?;
    repository.persist_crl(&crl)?;
    Ok(crl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::authority::{bootstrap, AuthorityBootstrapInput};
    use crate::cert::request::{validate_request_input, CertificateRequestInput};
    use crate::crypto::keys::{generate_rsa_key, public_key_info, public_key_info_to_pem, KeyLength};
    use crate::error::ErrorKind;
    use crate::storage::FileRepository;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        authority: Authority,
        repository: FileRepository,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let input = AuthorityBootstrapInput {
            dn: Some("/CN=Workflow CA".to_string()),
            key_bits: Some(1024),
            ..Default::default()
        };
        let authority = bootstrap(&input, "secret123", &dir.path().join("ca")).unwrap();
        let repository = FileRepository::open(dir.path().join("repo")).unwrap();
        Fixture {
            _dir: dir,
            authority,
            repository,
        }
    }

    fn public_key_pem() -> String {
        let key = generate_rsa_key(KeyLength::Bits1024).unwrap();
        public_key_info_to_pem(&public_key_info(&key.to_public_key()).unwrap()).unwrap()
    }

    fn submit_input(cn: &str, cert_type: &str) -> SubmitInput {
        SubmitInput {
            dn: Some(format!("/CN={}", cn)),
            cert_type: Some(cert_type.to_string()),
            ca_name: Some("/CN=Workflow CA".to_string()),
            host: Some(cn.to_string()),
            public_key_pem: public_key_pem(),
            ..Default::default()
        }
    }

    #[test]
    fn test_issue_and_save() {
        let f = fixture();
        let template = validate_request_input(&CertificateRequestInput {
            ca_path: Some("ca".into()),
            dn: Some("/CN=www.example.com".to_string()),
            cert_type: Some("server".to_string()),
            key_bits: Some(1024),
            host: Some("www".to_string()),
            save: true,
            ..Default::default()
        })
        .unwrap();

        let issued = issue(template.clone(), &f.authority, &SignOptions::default(), &f.repository, true, false)
            .unwrap();
        assert!(issued.private_key_pem.contains("PRIVATE KEY"));
        assert_eq!(
            f.repository.fetch_certificate_by_host("www").unwrap().serial,
            issued.certificate.serial
        );

        let err = issue(template, &f.authority, &SignOptions::default(), &f.repository, true, false)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::SaveConflict);
    }

    #[test]
    fn test_submit_validation() {
        let f = fixture();
        let mut input = submit_input("a.example.com", "custom");
        assert_eq!(submit(&f.repository, &input).unwrap_err().kind(), ErrorKind::MissingExtensions);

        input.cert_type = Some("server".to_string());
        input.host = None;
        assert_eq!(submit(&f.repository, &input).unwrap_err().kind(), ErrorKind::MissingField);

        input.host = Some("a".to_string());
        input.public_key_pem = "garbage".to_string();
        assert!(matches!(submit(&f.repository, &input), Err(CaError::Pem(_))));

        assert!(f
            .repository
            .search_pending_requests(&RequestFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_autosign_reports_each_item() {
        let f = fixture();
        submit(&f.repository, &submit_input("a.example.com", "server")).unwrap();
        submit(&f.repository, &submit_input("b.example.com", "client")).unwrap();
        let mut broken = submit_input("c.example.com", "server");
        broken.digest = Some("SHA".to_string());
        submit(&f.repository, &broken).unwrap();

        let filter = RequestFilter::for_ca("/CN=Workflow CA");
        let report = autosign(
            &f.repository,
            &f.authority,
            &filter,
            &SignOptions::default(),
            false,
            |request| request.name.common_name() != Some("b.example.com"),
        )
        .unwrap();

        assert_eq!(report.signed.len(), 1);
        assert_eq!(report.declined.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].1.kind(), ErrorKind::UnsupportedDigest);
        assert!(!report.is_clean());

        let remaining = f.repository.search_pending_requests(&filter).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(report.signed[0].ca_label, "/CN=Workflow CA");
    }

    #[test]
    fn test_attach_pending() {
        let f = fixture();
        let pending = submit(&f.repository, &submit_input("a.example.com", "server")).unwrap();
        let request = request_from_pending(&pending).unwrap();
        let signed = sign_request(&request, &f.authority, &SignOptions::default()).unwrap();

        let attached = attach_pending(&pending, &signed.pem).unwrap();
        assert!(attached.subject_matches);
        assert_eq!(attached.certificate.host.as_deref(), Some("a.example.com"));
    }

    #[test]
    fn test_gencrl_writes_file() {
        let f = fixture();
        let crl_path = f.repository.root().join("out/crl.pem");
        let crl = gencrl(
            &f.repository,
            &f.authority,
            &CaPolicy::default(),
            "/CN=Workflow CA",
            &crl_path,
        )
        .unwrap();
        assert_eq!(fs::read_to_string(&crl_path).unwrap(), crl.pem);
    }

    #[test]
    fn test_autosign_leaves_other_cas_requests() {
        let f = fixture();
        submit(&f.repository, &submit_input("a.example.com", "server")).unwrap();
        let mut foreign = submit_input("foreign.example.com", "server");
        foreign.ca_name = Some("OtherCA".to_string());
        let foreign = submit(&f.repository, &foreign).unwrap();

        let report = autosign(
            &f.repository,
            &f.authority,
            &RequestFilter::default(),
            &SignOptions::default(),
            false,
            |_| true,
        )
        .unwrap();

        assert_eq!(report.signed.len(), 1);
        assert_eq!(report.signed[0].subject.to_string(), "/CN=a.example.com");
        assert_eq!(report.foreign, vec![foreign.id]);
        let remaining = f
            .repository
            .search_pending_requests(&RequestFilter::for_ca("OtherCA"))
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_autosign_under_explicit_label() {
        let f = fixture();
        let mut input = submit_input("a.example.com", "server");
        input.ca_name = Some("ops".to_string());
        submit(&f.repository, &input).unwrap();

        let options = SignOptions {
            ca_name: Some("ops".to_string()),
            issuer: None,
        };
        let report = autosign(&f.repository, &f.authority, &RequestFilter::for_ca("ops"), &options, false, |_| true)
            .unwrap();
        assert_eq!(report.signed.len(), 1);
        assert_eq!(report.signed[0].ca_label, "ops");
        assert!(report.foreign.is_empty());
    }

    #[test]
    fn test_attach_batch_continues_past_failures() {
        let f = fixture();
        let a = submit(&f.repository, &submit_input("a.example.com", "server")).unwrap();
        let b = submit(&f.repository, &submit_input("b.example.com", "server")).unwrap();
        submit(&f.repository, &submit_input("c.example.com", "server")).unwrap();

        let sign = |pending: &PendingRequest| {
            let request = request_from_pending(pending).unwrap();
            sign_request(&request, &f.authority, &SignOptions::default()).unwrap()
        };
        let report = attach_batch(
            &f.repository,
            &RequestFilter::default(),
            false,
            |pending| {
                if pending.id == a.id {
                    return Ok(Some("not a certificate".to_string()));
                }
                let signed = sign(pending);
                if pending.id == b.id {
                    // Another operator saves first.
                    f.repository.persist_certificate(&signed, false)?;
                }
                Ok(Some(signed.pem))
            },
            |_, attached| attached.subject_matches,
        )
        .unwrap();

        assert_eq!(report.failed.len(), 2);
        let failure = |id: &RequestId| {
            &report
                .failed
                .iter()
                .find(|(failed_id, _)| failed_id == id)
                .unwrap()
                .1
        };
        assert!(matches!(failure(&a.id), CaError::Pem(_)));
        assert_eq!(failure(&b.id).kind(), ErrorKind::SaveConflict);
        assert_eq!(report.signed.len(), 1);
        assert_eq!(report.signed[0].subject.to_string(), "/CN=c.example.com");
        assert_eq!(
            f.repository.fetch_certificate_by_host("c.example.com").unwrap().serial,
            report.signed[0].serial
        );
    }

    #[test]
    fn test_attach_batch_passed_over_requests_stay_pending() {
        let f = fixture();
        submit(&f.repository, &submit_input("a.example.com", "server")).unwrap();

        let report = attach_batch(
            &f.repository,
            &RequestFilter::default(),
            false,
            |_| Ok(None),
            |_, _| true,
        )
        .unwrap();
        assert_eq!(report.declined.len(), 1);
        assert!(report.is_clean());
        assert_eq!(
            f.repository
                .search_pending_requests(&RequestFilter::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_gencrl_reports_unreadable_records() {
        let f = fixture();
        let label = "/CN=Workflow CA";
        f.repository
            .record_revocation(&crate::cert::revocation::RevocationRecord {
                request_id: derive_id(&parse_dn("/CN=a.example.com").unwrap()).unwrap(),
                serial: "0A".to_string(),
                subject: "/CN=a.example.com".to_string(),
                host: "a.example.com".to_string(),
                ca_label: label.to_string(),
                revoked_at: Utc::now(),
                reason: None,
            })
            .unwrap();
        fs::write(f.repository.revoked_dir().join("ZZ.json"), "{ 1").unwrap();

        let crl_path = f.repository.root().join("crl.pem");
        let crl = gencrl(&f.repository, &f.authority, &CaPolicy::default(), label, &crl_path).unwrap();
        assert_eq!(crl.entries.len(), 1);
        assert_eq!(crl.skipped.len(), 1);
        assert_eq!(crl.skipped[0].source, "ZZ.json");
        assert!(crl_path.is_file());
    }
}
