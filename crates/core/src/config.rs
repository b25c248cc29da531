//! Configuration loading
//!
//! The backup is described by a TOML file naming the bucket, the local roots
//! to back up and the exclusion patterns to apply. Paths may start with `~`,
//! which is expanded to the current user's home directory.

use std::path::{Component, Path, PathBuf};

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::acl::AccessPolicy;
use crate::error::{Error, Result};

/// Retry policy for transient remote failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per remote call, including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
        }
    }
}

/// Static credentials for the object store
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Backup configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Destination bucket
    pub bucket: String,

    /// Local directories to back up
    pub roots: Vec<PathBuf>,

    /// Regular expressions; a file whose absolute path matches any of them is skipped
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Derive object keys relative to each root instead of from the absolute path
    #[serde(default)]
    pub relative_paths: bool,

    /// Location of the metadata cache; no cache is used when absent
    #[serde(default)]
    pub cache: Option<PathBuf>,

    /// Canned ACL passed when creating the bucket
    #[serde(default)]
    pub bucket_acl: Option<AccessPolicy>,

    /// Canned ACL applied to every uploaded object
    #[serde(default)]
    pub object_acl: Option<AccessPolicy>,

    /// Static credentials; the default AWS credential chain is used when absent
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Custom S3-compatible endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    /// Force path-style bucket addressing
    #[serde(default)]
    pub path_style: bool,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("config file {}", path.display()))
            }
            _ => Error::Config(format!("cannot read {}: {e}", path.display())),
        })?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), roots = config.roots.len(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    fn expand_paths(&mut self) {
        for root in &mut self.roots {
            *root = expand_tilde(root);
        }
        if let Some(cache) = &self.cache {
            self.cache = Some(expand_tilde(cache));
        }
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::Config("bucket must not be empty".into()));
        }
        if self.roots.is_empty() {
            return Err(Error::Config("at least one root is required".into()));
        }
        for root in &self.roots {
            if !root.is_absolute() {
                return Err(Error::Config(format!(
                    "root must be an absolute path: {}",
                    root.display()
                )));
            }
            if root.components().any(|c| c == Component::ParentDir) {
                return Err(Error::Config(format!(
                    "root must not contain '..': {}",
                    root.display()
                )));
            }
            if root.to_str().is_none() {
                return Err(Error::Config(format!(
                    "root is not valid UTF-8: {}",
                    root.display()
                )));
            }
        }
        self.exclusions()?;
        if let Some(endpoint) = &self.endpoint {
            url::Url::parse(endpoint)
                .map_err(|e| Error::Config(format!("invalid endpoint {endpoint}: {e}")))?;
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Compile the exclusion patterns
    pub fn exclusions(&self) -> Result<RegexSet> {
        RegexSet::new(&self.ignore).map_err(|e| Error::Config(format!("invalid ignore pattern: {e}")))
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        bucket = "backups"
        roots = ["/srv/data", "/etc"]
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.bucket, "backups");
        assert!(config.ignore.is_empty());
        assert!(!config.relative_paths);
        assert!(config.cache.is_none());
        assert!(config.bucket_acl.is_none());
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml(
            r#"
            bucket = "backups"
            roots = ["/srv/data"]
            ignore = ['\.git/', '~$']
            relative_paths = true
            cache = "/var/cache/clonus.db"
            bucket_acl = "private"
            object_acl = "public-read"
            endpoint = "http://localhost:9000"
            path_style = true

            [credentials]
            access_key_id = "AKIA"
            secret_access_key = "secret"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert!(config.relative_paths);
        assert_eq!(config.object_acl, Some(AccessPolicy::PublicRead));
        assert_eq!(config.cache, Some(PathBuf::from("/var/cache/clonus.db")));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 100);
        assert!(!format!("{:?}", config.credentials).contains("secret\""));
        assert_eq!(config.exclusions().unwrap().len(), 2);
    }

    #[test]
    fn test_rejects_relative_root() {
        let err = Config::from_toml("bucket = \"b\"\nroots = [\"data\"]").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_empty_roots_and_bucket() {
        assert!(Config::from_toml("bucket = \"b\"\nroots = []").is_err());
        assert!(Config::from_toml("bucket = \"\"\nroots = [\"/a\"]").is_err());
    }

    #[test]
    fn test_rejects_bad_regex() {
        let err = Config::from_toml("bucket = \"b\"\nroots = [\"/a\"]\nignore = [\"(\"]").unwrap_err();
        assert!(err.to_string().contains("invalid ignore pattern"));
    }

    #[test]
    fn test_rejects_root_with_parent_component() {
        let err = Config::from_toml("bucket = \"b\"\nroots = [\"/srv/other/../data\"]").unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("..")));
    }

    #[test]
    fn test_rejects_unknown_acl() {
        let err =
            Config::from_toml("bucket = \"b\"\nroots = [\"/a\"]\nobject_acl = \"everyone\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clonus.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.roots.len(), 2);
    }

    #[test]
    fn test_tilde_expansion() {
        if let Some(home) = dirs::home_dir() {
            let config =
                Config::from_toml("bucket = \"b\"\nroots = [\"/a\"]\ncache = \"~/clonus.db\"").unwrap();
            assert_eq!(config.cache, Some(home.join("clonus.db")));
        }
    }
}
