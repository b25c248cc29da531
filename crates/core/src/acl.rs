//! Canned access policies for buckets and objects

use serde::{Deserialize, Serialize};

/// A provider-defined, named access policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AccessPolicy {
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl AccessPolicy {
    /// Wire name of the policy as understood by S3
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessPolicy::Private => "private",
            AccessPolicy::PublicRead => "public-read",
            AccessPolicy::PublicReadWrite => "public-read-write",
            AccessPolicy::AuthenticatedRead => "authenticated-read",
            AccessPolicy::BucketOwnerRead => "bucket-owner-read",
            AccessPolicy::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }
}

impl std::fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccessPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "private" => Ok(AccessPolicy::Private),
            "public-read" => Ok(AccessPolicy::PublicRead),
            "public-read-write" => Ok(AccessPolicy::PublicReadWrite),
            "authenticated-read" => Ok(AccessPolicy::AuthenticatedRead),
            "bucket-owner-read" => Ok(AccessPolicy::BucketOwnerRead),
            "bucket-owner-full-control" => Ok(AccessPolicy::BucketOwnerFullControl),
            _ => Err(format!("Invalid access policy: {s}")),
        }
    }
}

impl TryFrom<String> for AccessPolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccessPolicy> for String {
    fn from(policy: AccessPolicy) -> Self {
        policy.as_str().to_string()
    }
}
