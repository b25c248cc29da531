//! Object store abstraction
//!
//! The engine talks to remote storage only through [`ObjectStore`], which keeps
//! it independent of any particular SDK and lets tests substitute an
//! in-memory or mocked store.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::acl::AccessPolicy;
use crate::error::Result;

/// What the system believes is stored remotely for one key
///
/// Values are kept string-encoded as they travel in object metadata and in
/// the persisted cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    /// Local modification time (whole seconds) recorded at upload
    pub mtime: String,
    /// Object size in bytes
    pub size: String,
    /// Content checksum reported by the store (ETag without quotes)
    pub etag: String,
}

impl RemoteMetadata {
    pub fn new(mtime: i64, size: u64, etag: impl Into<String>) -> Self {
        Self {
            mtime: mtime.to_string(),
            size: size.to_string(),
            etag: etag.into(),
        }
    }

    /// Whether the remote copy describes a local file with this mtime and size
    pub fn matches(&self, mtime: i64, size: u64) -> bool {
        self.mtime == mtime.to_string() && self.size == size.to_string()
    }
}

/// One object from a bucket listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub etag: String,
    pub size: u64,
}

/// One page of a bucket listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    /// Token for the next page; `None` on the last page
    pub continuation_token: Option<String>,
}

/// Operations the engine needs from remote object storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the bucket, succeeding if it already exists
    async fn create_bucket(&self, bucket: &str, acl: Option<AccessPolicy>) -> Result<()>;

    /// Fetch metadata for a key, `None` if no such object exists
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<RemoteMetadata>>;

    /// Upload the file at `source`, recording `mtime` as object metadata
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        mtime: i64,
        acl: Option<AccessPolicy>,
    ) -> Result<()>;

    /// Apply an access policy to an existing object
    async fn set_object_acl(&self, bucket: &str, key: &str, acl: AccessPolicy) -> Result<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// List one page of objects, starting after `continuation_token`
    async fn list_objects(
        &self,
        bucket: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage>;
}
