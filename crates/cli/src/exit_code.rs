//! Process exit codes
//!
//! Scripts driving nightly backups rely on these values, so they must stay
//! stable.

use clonus_core::Error;

/// Exit status of a clonus run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Every file was processed
    Success = 0,
    /// The run completed but some files failed, or an unexpected error occurred
    GeneralError = 1,
    /// Invalid arguments or configuration
    UsageError = 2,
    /// Transport failure, or the bucket could not be created or listed
    NetworkError = 3,
    /// Credentials were rejected
    AuthError = 4,
    /// Configuration file or another required local resource is missing
    NotFound = 5,
    /// The metadata cache could not be read or written
    CacheError = 6,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Exit code for an error that ended the run
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Config(_) | Error::InvalidPath(_) => ExitCode::UsageError,
            Error::Network(_) | Error::Bucket(_) => ExitCode::NetworkError,
            Error::Auth(_) => ExitCode::AuthError,
            Error::NotFound(_) => ExitCode::NotFound,
            Error::Cache(_) => ExitCode::CacheError,
            Error::Io(_) | Error::General(_) => ExitCode::GeneralError,
        }
    }

    /// Exit code for an error chain built at the binary's edge
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        error
            .chain()
            .find_map(|cause| cause.downcast_ref::<Error>())
            .map(Self::from_error)
            .unwrap_or(ExitCode::GeneralError)
    }
}
