//! Error types for clonus
//!
//! One error enum is shared by the whole workspace. Variants are grouped by
//! how the reconciliation engine treats them: per-file failures are skipped
//! and collected, while cache and bucket failures end the run.

use thiserror::Error;

/// Result type alias for clonus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for clonus operations
#[derive(Debug, Error)]
pub enum Error {
    /// Local filesystem error (unreadable file, vanished path)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport failure talking to the object store
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials rejected by the object store
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A required local resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A path that cannot be mapped to an object key
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metadata cache could not be read or written
    #[error("Cache error: {0}")]
    Cache(String),

    /// The bucket could not be created or listed
    #[error("Bucket error: {0}")]
    Bucket(String),

    /// Anything else
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Whether this error must abort the whole run.
    ///
    /// Cache failures are fatal because a damaged cache can produce a false
    /// "unchanged" verdict. Bucket and credential failures are fatal because
    /// no reconciliation can proceed without a reachable bucket.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Cache(_) | Error::Bucket(_) | Error::Auth(_) | Error::Config(_)
        )
    }

    /// Whether a remote call that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(msg) => {
                let msg = msg.to_lowercase();
                [
                    "timeout",
                    "dispatch",
                    "connection reset",
                    "connection refused",
                    "503",
                    "service unavailable",
                    "slowdown",
                    "slow down",
                    "429",
                    "too many requests",
                    "internalerror",
                    "500",
                ]
                .iter()
                .any(|needle| msg.contains(needle))
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Cache(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
