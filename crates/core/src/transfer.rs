//! Upload and delete execution
//!
//! Every mutation follows the same order: invalidate the cache entry, then
//! touch the bucket. The cache is never repopulated here; the next run that
//! observes the key through a HEAD or a listing writes it again.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::acl::AccessPolicy;
use crate::cache::MetadataCache;
use crate::config::RetryConfig;
use crate::error::Result;
use crate::retry::retry_with_backoff;
use crate::scanner::{self, LocalFile};
use crate::traits::ObjectStore;

/// Size and duration of one completed upload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferStats {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferStats {
    /// Effective throughput in bytes per second
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            self.bytes as f64
        }
    }
}

/// Performs uploads and deletes against one bucket
pub struct TransferExecutor<'a> {
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    object_acl: Option<AccessPolicy>,
    retry: &'a RetryConfig,
}

impl<'a> TransferExecutor<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        bucket: &'a str,
        object_acl: Option<AccessPolicy>,
        retry: &'a RetryConfig,
    ) -> Self {
        Self {
            store,
            bucket,
            object_acl,
            retry,
        }
    }

    /// Upload `file`, replacing any existing object
    ///
    /// `replacing` is true when an object already exists under the key, in
    /// which case the access policy is also applied before the write. Only a
    /// fatal error from that first call stops the upload. Cache failures are returned as [`crate::Error::Cache`] so the
    /// caller can abort.
    pub async fn upload(
        &self,
        cache: Option<&MetadataCache>,
        file: &LocalFile,
        replacing: bool,
    ) -> Result<TransferStats> {
        if let Some(cache) = cache {
            cache.invalidate(&file.key)?;
        }

        // Content may have changed since the scan; record what is actually sent
        let (mtime, size) = scanner::stat(&file.path)?;
        let started = Instant::now();

        // A cached entry does not guarantee the object still exists; the write goes ahead
        if replacing
            && let Some(acl) = self.object_acl
            && let Err(e) = self.apply_acl(&file.key, acl).await
        {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(key = %file.key, error = %e, "Could not apply access policy before write");
        }

        retry_with_backoff(self.retry, "put", || {
            self.store
                .put_object(self.bucket, &file.key, &file.path, mtime, self.object_acl)
        })
        .await?;

        // Some providers reset the policy when an object is replaced
        if let Some(acl) = self.object_acl {
            self.apply_acl(&file.key, acl).await?;
        }

        let stats = TransferStats {
            bytes: size,
            elapsed: started.elapsed(),
        };
        debug!(
            key = %file.key,
            bytes = stats.bytes,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Uploaded"
        );
        Ok(stats)
    }

    /// Delete the object under `key`
    pub async fn delete(&self, cache: Option<&MetadataCache>, key: &str) -> Result<()> {
        if let Some(cache) = cache {
            cache.invalidate(key)?;
        }
        retry_with_backoff(self.retry, "delete", || {
            self.store.delete_object(self.bucket, key)
        })
        .await?;
        debug!(key, "Deleted");
        Ok(())
    }

    async fn apply_acl(&self, key: &str, acl: AccessPolicy) -> Result<()> {
        retry_with_backoff(self.retry, "set_acl", || {
            self.store.set_object_acl(self.bucket, key, acl)
        })
        .await
    }
}
