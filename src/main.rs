//! casign CLI application.
//!
//! Thin command layer over the library: parses arguments, collects
//! passphrases and yes/no decisions, and prints results.

use casign::cert::authority::{bootstrap, load, Authority, AuthorityBootstrapInput};
use casign::cert::request::{validate_request_input, CertificateRequestInput};
use casign::cert::revocation::{revoke_host, RevocationOutcome, RevocationReason};
use casign::cert::signing::SignOptions;
use casign::config::{resolve_in_ca_dir, CaPolicy};
use casign::crypto::keys::public_key_info_to_pem;
use casign::crypto::password::confirm_passphrase;
use casign::error::{CaError, Result};
use casign::storage::{FileRepository, PendingRequest, Repository, RequestFilter};
use casign::workflow::{attach_batch, autosign, gencrl, issue, submit, BatchReport, SubmitInput};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "casign")]
#[command(about = "Certificate authority workflow: issue, sign, revoke, publish CRLs", long_about = None)]
struct Cli {
    /// Repository directory holding requests, certificates and CRL records
    #[arg(long, global = true, env = "CASIGN_REPOSITORY", default_value = "./repository")]
    repository: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key and certificate in one step, signed by a CA
    Issue {
        /// CA directory
        #[arg(long)]
        ca_path: Option<PathBuf>,

        /// Subject, e.g. "/C=GB/O=Example/CN=www.example.com"
        #[arg(long)]
        dn: Option<String>,

        /// server, client, peer or custom
        #[arg(long = "type")]
        cert_type: Option<String>,

        /// SHA, SHA1, SHA224, SHA256, SHA384, SHA512 or MD5 (default SHA256)
        #[arg(long)]
        digest: Option<String>,

        /// Validity in days (default 1825)
        #[arg(long)]
        days: Option<u32>,

        /// Extensions for custom certificates, e.g. "keyUsage:digitalSignature;extendedKeyUsage:serverAuth"
        #[arg(long)]
        extensions: Option<String>,

        /// Subject alternative name (DNS:, IP:, email:); repeatable
        #[arg(long = "san")]
        subject_alt_names: Vec<String>,

        /// Subject key length (default 2048)
        #[arg(long)]
        key_bits: Option<u32>,

        /// CA label recorded with the certificate (default: the CA's DN)
        #[arg(long)]
        ca_name: Option<String>,

        /// Host the certificate belongs to (required with --save)
        #[arg(long)]
        host: Option<String>,

        /// Persist the certificate to the repository
        #[arg(long)]
        save: bool,

        /// Replace an existing certificate for the same subject
        #[arg(long)]
        force: bool,

        /// Write the certificate here instead of stdout
        #[arg(long)]
        cert_out: Option<PathBuf>,

        /// Write the private key here instead of stdout
        #[arg(long)]
        key_out: Option<PathBuf>,
    },

    /// Create a new certificate authority
    Makeca {
        /// Destination directory
        #[arg(long)]
        path: PathBuf,

        /// CA subject, e.g. "/CN=Test CA"
        #[arg(long)]
        dn: Option<String>,

        /// Key length: 1024, 2048, 4096 or 8192 (default 4096)
        #[arg(long)]
        key_bits: Option<u32>,

        /// Validity in days (default 3650)
        #[arg(long)]
        days: Option<u32>,

        /// Signature digest (default SHA256)
        #[arg(long)]
        digest: Option<String>,
    },

    /// Store a request for a public key generated elsewhere
    Submit {
        #[arg(long)]
        dn: Option<String>,

        #[arg(long = "type")]
        cert_type: Option<String>,

        #[arg(long)]
        digest: Option<String>,

        #[arg(long)]
        days: Option<u32>,

        /// CA the request is addressed to
        #[arg(long)]
        ca_name: Option<String>,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        extensions: Option<String>,

        #[arg(long = "san")]
        subject_alt_names: Vec<String>,

        /// PUBLIC KEY or CERTIFICATE REQUEST PEM file
        #[arg(long)]
        public_key: PathBuf,
    },

    /// List pending requests
    Search {
        #[arg(long)]
        ca_name: Option<String>,

        /// Restrict to a common name
        #[arg(long)]
        cn: Option<String>,
    },

    /// Attach certificates signed elsewhere to pending requests
    Sign {
        #[arg(long)]
        ca_name: Option<String>,

        #[arg(long)]
        cn: Option<String>,

        /// Replace an existing certificate for the same subject
        #[arg(long)]
        force: bool,
    },

    /// Sign pending requests with a CA, asking for each one
    Autosign {
        #[arg(long)]
        ca_path: PathBuf,

        /// Only requests addressed to this CA; also the recorded CA label
        /// (default: the CA's DN)
        #[arg(long)]
        ca_name: Option<String>,

        /// Sign without asking
        #[arg(long)]
        yes: bool,

        #[arg(long)]
        force: bool,
    },

    /// Revoke the certificate issued for a host
    Revoke {
        #[arg(long)]
        host: String,

        /// CA directory the revoked-items directory belongs to
        #[arg(long)]
        ca_path: PathBuf,

        /// Revoked-items directory, absolute or relative to the CA directory
        #[arg(long, default_value = "./revoked")]
        revoked_path: PathBuf,

        /// CRL reason, e.g. keyCompromise or superseded
        #[arg(long)]
        reason: Option<String>,
    },

    /// Generate the CRL for a CA
    Gencrl {
        #[arg(long)]
        ca_path: PathBuf,

        /// CA label whose revocations are listed (default: the CA's DN)
        #[arg(long)]
        ca_name: Option<String>,

        /// Signing policy file, absolute or relative to the CA directory
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output file, absolute or relative to the CA directory
        #[arg(long, default_value = "crl.pem")]
        crl_file: PathBuf,

        /// Revoked-items directory, absolute or relative to the CA directory
        #[arg(long, default_value = "./revoked")]
        revoked_path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("casign=info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let open_repository = || FileRepository::open(&cli.repository);
    let open_with_revoked = |ca_path: &Path, revoked_path: &Path| -> Result<FileRepository> {
        FileRepository::open(&cli.repository)?.with_revoked_dir(resolve_in_ca_dir(ca_path, revoked_path))
    };

    match cli.command {
        Commands::Issue {
            ca_path,
            dn,
            cert_type,
            digest,
            days,
            extensions,
            subject_alt_names,
            key_bits,
            ca_name,
            host,
            save,
            force,
            cert_out,
            key_out,
        } => {
            let input = CertificateRequestInput {
                ca_path,
                dn,
                cert_type,
                digest,
                days,
                extensions,
                subject_alt_names,
                key_bits,
                ca_name: ca_name.clone(),
                host,
                save,
            };
            let template = validate_request_input(&input)?;
            let repository = open_repository()?;
            let authority = unlock(&template.ca_path)?;
            let options = SignOptions {
                ca_name,
                issuer: None,
            };

            let issued = issue(template, &authority, &options, &repository, save, force)?;
            write_or_print(cert_out.as_deref(), &issued.certificate.pem)?;
            write_or_print(key_out.as_deref(), &issued.private_key_pem)?;
            eprintln!("SHA1 fingerprint: {}", issued.certificate.sha1_fingerprint);
            Ok(())
        }

        Commands::Makeca {
            path,
            dn,
            key_bits,
            days,
            digest,
        } => {
            let input = AuthorityBootstrapInput {
                dn,
                key_bits,
                days,
                digest,
            };
            input.validate()?;

            let passphrase = rpassword::prompt_password("Enter CA passphrase: ")?;
            let confirmation = rpassword::prompt_password("Confirm CA passphrase: ")?;
            confirm_passphrase(&passphrase, &confirmation)?;

            let authority = bootstrap(&input, &passphrase, &path)?;
            println!("Created CA {} in {}", authority.name, path.display());
            println!("{}", authority.certificate_pem);
            Ok(())
        }

        Commands::Submit {
            dn,
            cert_type,
            digest,
            days,
            ca_name,
            host,
            extensions,
            subject_alt_names,
            public_key,
        } => {
            let input = SubmitInput {
                dn,
                cert_type,
                digest,
                days,
                ca_name,
                host,
                extensions,
                subject_alt_names,
                public_key_pem: fs::read_to_string(&public_key)?,
            };
            let pending = submit(&open_repository()?, &input)?;
            println!("Submitted request {} for {}", pending.id, pending.subject);
            Ok(())
        }

        Commands::Search { ca_name, cn } => {
            let repository = open_repository()?;
            let filter = RequestFilter {
                ca_name,
                common_name: cn,
            };
            let pending = repository.search_pending_requests(&filter)?;
            if pending.is_empty() {
                println!("No pending requests");
            }
            for request in &pending {
                print_request(request);
            }
            Ok(())
        }

        Commands::Sign { ca_name, cn, force } => {
            let repository = open_repository()?;
            let filter = RequestFilter {
                ca_name,
                common_name: cn,
            };
            let report = attach_batch(
                &repository,
                &filter,
                force,
                |request| {
                    print_request(request);
                    if !confirm("Attach a signed certificate to this request?")? {
                        return Ok(None);
                    }
                    read_pasted_certificate().map(Some)
                },
                |request, attached| {
                    if !attached.subject_matches {
                        println!(
                            "Warning: certificate subject {} does not match request {}",
                            attached.certificate.subject, request.subject
                        );
                    }
                    confirm("Save this certificate?").unwrap_or(false)
                },
            )?;

            for cert in &report.signed {
                println!(
                    "Saved certificate for {}",
                    cert.host.as_deref().unwrap_or("-")
                );
            }
            for (id, error) in &report.failed {
                eprintln!("Error saving {}: {}", id, error);
            }
            println!("All requests processed.");
            finish_batch(&report)
        }

        Commands::Autosign {
            ca_path,
            ca_name,
            yes,
            force,
        } => {
            let repository = open_repository()?;
            let authority = unlock(&ca_path)?;
            let label = ca_name.unwrap_or_else(|| authority.name.to_string());
            let filter = RequestFilter::for_ca(label.clone());
            let options = SignOptions {
                ca_name: Some(label),
                issuer: None,
            };

            let report = autosign(&repository, &authority, &filter, &options, force, |request| {
                if yes {
                    return true;
                }
                println!(
                    "{} ({}, {} days, {})",
                    request.name, request.cert_type, request.requested_days, request.digest
                );
                confirm("Sign this request?").unwrap_or(false)
            })?;

            for cert in &report.signed {
                println!("Signed {} serial {}", cert.subject, cert.serial);
            }
            for (id, error) in &report.failed {
                eprintln!("Failed {}: {}", id, error);
            }
            finish_batch(&report)
        }

        Commands::Revoke {
            host,
            ca_path,
            revoked_path,
            reason,
        } => {
            let reason = reason
                .as_deref()
                .map(str::parse::<RevocationReason>)
                .transpose()?;
            match revoke_host(&open_with_revoked(&ca_path, &revoked_path)?, &host, reason)? {
                RevocationOutcome::Revoked(record) => {
                    println!("Revoked {} (serial {})", host, record.serial)
                }
                RevocationOutcome::AlreadyRevoked(record) => {
                    println!("{} was already revoked on {}", host, record.revoked_at)
                }
            }
            Ok(())
        }

        Commands::Gencrl {
            ca_path,
            ca_name,
            config,
            crl_file,
            revoked_path,
        } => {
            let policy = CaPolicy::resolve(&ca_path, config.as_deref())?;
            let repository = open_with_revoked(&ca_path, &revoked_path)?;
            let crl_file = resolve_in_ca_dir(&ca_path, &crl_file);
            let authority = unlock(&ca_path)?;
            let label = ca_name.unwrap_or_else(|| authority.name.to_string());

            let crl = gencrl(&repository, &authority, &policy, &label, &crl_file)?;
            for skipped in &crl.skipped {
                eprintln!("Left out {}: {}", skipped.source, skipped.error);
            }
            println!(
                "Wrote CRL #{} with {} entries to {}",
                crl.crl_number,
                crl.entries.len(),
                crl_file.display()
            );
            Ok(())
        }
    }
}

/// Non-zero exit once a batch had failing items.
fn finish_batch(report: &BatchReport) -> Result<()> {
    if report.is_clean() {
        Ok(())
    } else {
        Err(CaError::SigningFailed(format!(
            "{} request(s) could not be completed",
            report.failed.len()
        )))
    }
}

fn unlock(ca_path: &Path) -> Result<Authority> {
    let passphrase = rpassword::prompt_password("Enter CA passphrase: ")?;
    load(ca_path, &passphrase)
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn read_pasted_certificate() -> Result<String> {
    println!("Paste the certificate PEM:");
    let mut text = String::new();
    for line in io::stdin().lock().lines() {
        let line = line?;
        let done = line.trim() == "-----END CERTIFICATE-----";
        text.push_str(&line);
        text.push('\n');
        if done {
            break;
        }
    }
    Ok(text)
}

fn write_or_print(path: Option<&Path>, contents: &str) -> Result<()> {
    match path {
        Some(path) => {
            fs::write(path, contents)?;
            eprintln!("Wrote {}", path.display());
        }
        None => print!("{}", contents),
    }
    Ok(())
}

fn print_request(request: &PendingRequest) {
    println!("Host:     {}", request.host);
    println!("Type:     {}", request.cert_type);
    println!("DN:       {}", request.subject);
    println!("CA:       {}", request.ca);
    println!("Validity: {} days", request.days);
    println!("Digest:   {}", request.digest);
    if let Some(extensions) = &request.extensions {
        println!("Extensions: {}", extensions);
    }
    match casign::crypto::keys::public_key_info_from_pem(&request.public_key_pem)
        .and_then(|spki| public_key_info_to_pem(&spki))
    {
        Ok(pem_text) => println!("{}", pem_text),
        Err(e) => println!("Public key: unreadable ({})", e),
    }
}
