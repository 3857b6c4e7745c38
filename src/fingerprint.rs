//! Identity of the collection configuration.
//!
//! Caches written under one configuration must not be trusted under another.
//! The fingerprint is a content hash over the canonical key/value form of the
//! invocation arguments, so argument order and diagnostic flags never change it.

use crate::cache::config::CONFIG_HASH_SUFFIX;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Flags that only change diagnostics or force a refresh.
const IGNORED_FLAGS: &[&str] = &["debug", "verbose", "no-cache"];

/// Canonical key/value form of the relevant invocation arguments.
#[must_use]
pub fn canonicalize<S: AsRef<str>>(args: &[S]) -> BTreeMap<String, Vec<String>> {
    let mut canonical: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for arg in args.iter().map(AsRef::as_ref) {
        if let Some(flag) = arg.strip_prefix("--") {
            let (key, inline_value) = match flag.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (flag, None),
            };
            let values = canonical.entry(key.to_string()).or_default();
            if let Some(value) = inline_value {
                values.push(value.to_string());
            }
            current = Some(key.to_string());
        } else if let Some(key) = &current {
            canonical.entry(key.clone()).or_default().push(arg.to_string());
        } else {
            canonical.entry(String::new()).or_default().push(arg.to_string());
        }
    }

    canonical.retain(|key, _| !IGNORED_FLAGS.contains(&key.as_str()));
    canonical
}

/// Stable 64-bit hash of the canonicalized arguments.
#[must_use]
pub fn fingerprint<S: AsRef<str>>(args: &[S]) -> u64 {
    let canonical = canonicalize(args);
    // Serializing a BTreeMap of strings cannot fail
    let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&encoded);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// The fingerprint of this run together with where the previous one is kept.
#[derive(Debug, Clone)]
pub struct ConfigFingerprint {
    hostname: String,
    path: PathBuf,
    current: u64,
}

impl ConfigFingerprint {
    #[must_use]
    pub fn new<S: AsRef<str>>(cache_root: &Path, hostname: &str, args: &[S]) -> Self {
        Self {
            hostname: hostname.to_string(),
            path: cache_root.join(format!("{hostname}.{CONFIG_HASH_SUFFIX}")),
            current: fingerprint(args),
        }
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.current
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compare against the persisted fingerprint, persisting the current one
    /// when it is new or differs.
    pub async fn is_current(&self) -> bool {
        let previous = tokio::fs::read_to_string(&self.path)
            .await
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok());

        match previous {
            Some(previous) if previous == self.current => {
                info!("{}: config is up-to-date: '{}'", self.hostname, self.current);
                return true;
            }
            Some(previous) => info!(
                "{}: config has changed: '{}' -> '{}'",
                self.hostname, previous, self.current
            ),
            None => info!("{}: new config: '{}'", self.hostname, self.current),
        }

        if let Err(e) = self.persist().await {
            warn!("{}: cannot write config hash {}: {}", self.hostname, self.path.display(), e);
        }
        false
    }

    async fn persist(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, format!("{}\n", self.current)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_order_and_diagnostics() {
        let a = fingerprint(&["--a", "1", "--b", "2"]);
        assert_eq!(a, fingerprint(&["--b", "2", "--a", "1"]));
        assert_eq!(a, fingerprint(&["--a", "1", "--b", "2", "--debug"]));
        assert_eq!(a, fingerprint(&["--verbose", "--a=1", "--no-cache", "--b", "2"]));
        assert_ne!(a, fingerprint(&["--a", "1", "--b", "3"]));
        assert_ne!(a, fingerprint(&["--a", "1"]));
    }

    #[test]
    fn test_canonical_form() {
        let canonical = canonicalize(&["--regions", "eu-west-1", "us-east-1", "--ec2-limits", "--debug"]);
        assert_eq!(canonical.len(), 2);
        assert_eq!(canonical["regions"], vec!["eu-west-1", "us-east-1"]);
        assert!(canonical["ec2-limits"].is_empty());
    }

    #[tokio::test]
    async fn test_is_current_persists_changes() {
        let dir = tempfile::tempdir().unwrap();
        let first = ConfigFingerprint::new(dir.path(), "aws-host", &["--regions", "eu-west-1"]);

        assert!(!first.is_current().await);
        assert!(first.is_current().await);

        let changed = ConfigFingerprint::new(dir.path(), "aws-host", &["--regions", "us-east-1"]);
        assert!(!changed.is_current().await);
        assert!(changed.is_current().await);
        assert!(!first.is_current().await);

        let stored = std::fs::read_to_string(dir.path().join("aws-host.config_hash")).unwrap();
        assert_eq!(stored.trim(), first.value().to_string());
    }

    #[tokio::test]
    async fn test_garbage_fingerprint_file_counts_as_changed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("aws-host.config_hash"), "not a number").unwrap();
        let fp = ConfigFingerprint::new(dir.path(), "aws-host", &["--services", "ec2"]);
        assert!(!fp.is_current().await);
        assert!(fp.is_current().await);
    }
}
