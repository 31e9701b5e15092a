//! CA signing policy.
//!
//! The policy is a small TOML file kept with the CA:
//!
//! ```toml
//! [crl]
//! next_update_days = 30
//! digest = "SHA256"
//! ```
//!
//! A relative path is resolved against the CA directory. Anything that can't
//! be read or parsed is reported as [`CaError::ConfigInvalid`].

use crate::cert::signing::{now_seconds, validity_end};
use crate::crypto::digest::DigestAlgorithm;
use crate::error::{CaError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default policy file name inside the CA directory.
pub const DEFAULT_POLICY_FILENAME: &str = "policy.toml";

fn default_next_update_days() -> u32 {
    30
}

fn default_crl_digest() -> DigestAlgorithm {
    DigestAlgorithm::Sha256
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrlPolicy {
    /// Days between thisUpdate and nextUpdate.
    #[serde(default = "default_next_update_days")]
    pub next_update_days: u32,
    #[serde(default = "default_crl_digest")]
    pub digest: DigestAlgorithm,
}

impl Default for CrlPolicy {
    fn default() -> Self {
        Self {
            next_update_days: default_next_update_days(),
            digest: default_crl_digest(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaPolicy {
    #[serde(default)]
    pub crl: CrlPolicy,
}

impl CaPolicy {
    /// Parse policy text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let policy: CaPolicy =
            toml::from_str(text).map_err(|e| CaError::ConfigInvalid(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Read the policy at `path`, relative to `ca_dir` unless absolute.
    pub fn load(ca_dir: &Path, path: &Path) -> Result<Self> {
        let path = resolve_in_ca_dir(ca_dir, path);
        let text = fs::read_to_string(&path).map_err(|e| {
            CaError::ConfigInvalid(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
            .map_err(|e| CaError::ConfigInvalid(format!("{}: {}", path.display(), e)))
    }

    /// Read an explicitly named policy, or `policy.toml` in the CA directory
    /// when present, or fall back to defaults.
    pub fn resolve(ca_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(ca_dir, path),
            None => {
                let default_path = ca_dir.join(DEFAULT_POLICY_FILENAME);
                if default_path.exists() {
                    Self::load(ca_dir, &default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.crl.next_update_days == 0 {
            return Err(CaError::ConfigInvalid(
                "crl.next_update_days must be positive".to_string(),
            ));
        }
        validity_end(now_seconds(), self.crl.next_update_days, "crl.next_update_days")
            .map_err(|e| CaError::ConfigInvalid(e.to_string()))?;
        if !self.crl.digest.is_supported() {
            return Err(CaError::ConfigInvalid(format!(
                "crl.digest {} is not available",
                self.crl.digest
            )));
        }
        Ok(())
    }
}

/// Resolve a path kept with the CA (policy file, CRL file, revoked-items
/// directory): absolute paths are used as given, others join `ca_dir`.
pub fn resolve_in_ca_dir(ca_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        ca_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_policy() {
        let policy = CaPolicy::from_toml(
            r#"
            [crl]
            next_update_days = 7
            digest = "SHA512"
            "#,
        )
        .unwrap();
        assert_eq!(policy.crl.next_update_days, 7);
        assert_eq!(policy.crl.digest, DigestAlgorithm::Sha512);
    }

    #[test]
    fn test_empty_policy_uses_defaults() {
        let policy = CaPolicy::from_toml("").unwrap();
        assert_eq!(policy, CaPolicy::default());
        assert_eq!(policy.crl.next_update_days, 30);
    }

    #[test]
    fn test_invalid_policies() {
        for text in [
            "[crl]\nnext_update_days = 0",
            "[crl]\nnext_update_days = 4294967295",
            "[crl]\ndigest = \"SHA\"",
            "[crl]\ndigest = \"sha256\"",
            "[crl]\nnext_update = 30",
            "[signing]\nfoo = 1",
            "[crl",
        ] {
            let err = CaPolicy::from_toml(text).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ConfigInvalid, "{}", text);
        }
    }

    #[test]
    fn test_load_relative_to_ca_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("policy.toml"), "[crl]\nnext_update_days = 14\n").unwrap();

        let policy = CaPolicy::load(dir.path(), Path::new("policy.toml")).unwrap();
        assert_eq!(policy.crl.next_update_days, 14);

        let absolute = dir.path().join("policy.toml");
        let policy = CaPolicy::load(Path::new("/nonexistent"), &absolute).unwrap();
        assert_eq!(policy.crl.next_update_days, 14);
    }

    #[test]
    fn test_resolve_default_file_or_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(CaPolicy::resolve(dir.path(), None).unwrap(), CaPolicy::default());

        fs::write(dir.path().join(DEFAULT_POLICY_FILENAME), "[crl]\nnext_update_days = 3\n").unwrap();
        let policy = CaPolicy::resolve(dir.path(), None).unwrap();
        assert_eq!(policy.crl.next_update_days, 3);

        let err = CaPolicy::resolve(dir.path(), Some(Path::new("other.toml"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_resolve_in_ca_dir() {
        let ca_dir = Path::new("/srv/ca");
        assert_eq!(resolve_in_ca_dir(ca_dir, Path::new("crl.pem")), ca_dir.join("crl.pem"));
        assert_eq!(
            resolve_in_ca_dir(ca_dir, Path::new("./revoked")),
            ca_dir.join("./revoked")
        );
        assert_eq!(
            resolve_in_ca_dir(ca_dir, Path::new("/var/crl.pem")),
            PathBuf::from("/var/crl.pem")
        );
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = CaPolicy::load(dir.path(), Path::new("missing.toml")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }
}
