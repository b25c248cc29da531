//! Snapshot of every object in the bucket
//!
//! Listing a bucket is expensive, so the index is built at most once per run
//! and shared by the orphan sweep and the cache rebuild.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::retry::retry_with_backoff;
use crate::traits::ObjectStore;

/// Checksum and size of one listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub etag: String,
    pub size: u64,
}

/// All objects in a bucket, ordered by key
#[derive(Debug, Clone, Default)]
pub struct RemoteIndex {
    entries: BTreeMap<String, RemoteEntry>,
}

impl RemoteIndex {
    /// List the whole bucket, following continuation tokens
    ///
    /// Any failure is reported as [`Error::Bucket`] (or [`Error::Auth`]),
    /// since a partial listing must never drive deletions.
    pub async fn fetch(
        store: &dyn ObjectStore,
        bucket: &str,
        retry: &RetryConfig,
    ) -> Result<Self> {
        let mut entries = BTreeMap::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = retry_with_backoff(retry, "list", || store.list_objects(bucket, token.clone()))
                .await
                .map_err(|e| match e {
                    Error::Auth(_) | Error::Bucket(_) => e,
                    other => Error::Bucket(format!("listing {bucket} failed: {other}")),
                })?;
            pages += 1;

            for object in page.objects {
                entries.insert(
                    object.key,
                    RemoteEntry {
                        etag: object.etag,
                        size: object.size,
                    },
                );
            }

            match page.continuation_token {
                Some(next) => {
                    debug!(pages, objects = entries.len(), "Listing next page");
                    token = Some(next);
                }
                None => break,
            }
        }

        info!(bucket, objects = entries.len(), pages, "Listed bucket");
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&RemoteEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RemoteEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ListPage, MockObjectStore, ObjectSummary};
    use mockall::predicate::eq;

    fn summary(key: &str, etag: &str) -> ObjectSummary {
        ObjectSummary {
            key: key.to_string(),
            etag: etag.to_string(),
            size: 1,
        }
    }

    #[tokio::test]
    async fn test_fetch_follows_continuation_tokens() {
        let mut store = MockObjectStore::new();
        store
            .expect_list_objects()
            .with(eq("bucket"), eq(None::<String>))
            .times(1)
            .returning(|_, _| {
                Ok(ListPage {
                    objects: vec![summary("b", "B")],
                    continuation_token: Some("page-2".into()),
                })
            });
        store
            .expect_list_objects()
            .with(eq("bucket"), eq(Some("page-2".to_string())))
            .times(1)
            .returning(|_, _| {
                Ok(ListPage {
                    objects: vec![summary("a", "A")],
                    continuation_token: None,
                })
            });

        let index = RemoteIndex::fetch(&store, "bucket", &RetryConfig::default())
            .await
            .unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("a").unwrap().etag, "A");
        let keys: Vec<_> = index.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_listing_failure_is_a_bucket_error() {
        let mut store = MockObjectStore::new();
        store
            .expect_list_objects()
            .returning(|_, _| Err(Error::Network("Service error: InvalidArgument".into())));

        let err = RemoteIndex::fetch(&store, "bucket", &RetryConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bucket(_)));
        assert!(err.is_fatal());
    }
}
