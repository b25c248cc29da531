//! Reconciliation engine
//!
//! A [`SyncSession`] carries the bucket handle, the cache and the
//! configuration through one backup run. A run has three phases:
//!
//! 1. make sure the bucket exists,
//! 2. if deletion or a cache rebuild was requested, list the bucket once,
//!    delete orphans and rebuild the cache from that single listing,
//! 3. scan every root in sorted order and upload whatever is new or
//!    changed.
//!
//! Per-file problems are recorded in the [`SyncReport`] and the run goes on.
//! Cache, bucket and credential failures abort the run.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{MetadataCache, RebuildReport, Validation};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::RemoteIndex;
use crate::path::KeyMapper;
use crate::retry::retry_with_backoff;
use crate::scanner::{LocalFile, ScanEvent, Scanner};
use crate::traits::ObjectStore;
use crate::transfer::{TransferExecutor, TransferStats};

/// What a run is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Delete remote objects that no longer have a local counterpart
    pub delete: bool,
    /// Classify and report, but never mutate the bucket
    pub dry_run: bool,
    /// Rebuild the cache from a bucket listing before scanning
    pub rebuild_cache: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            delete: false,
            dry_run: false,
            rebuild_cache: true,
        }
    }
}

/// Verdict for a local file or a remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDecision {
    /// Remote copy matches the local file
    Unchanged,
    /// Remote copy exists but differs in size or mtime
    Stale,
    /// No remote copy
    Missing,
    /// Remote object with no local file under any root
    Orphaned,
}

/// Stage at which a per-file failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Scan,
    Classify,
    Upload,
    Delete,
    /// Two different files mapped to the same key
    DuplicateKey,
}

/// A file or object that could not be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Object key, or local path when no key could be derived
    pub subject: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Summary of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// First uploads (files that were missing remotely)
    pub uploaded: usize,
    /// Re-uploads of stale objects
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub bytes_uploaded: u64,
    /// Keys whose cached checksum disagreed with the bucket
    pub consistency_warnings: Vec<String>,
    pub failures: Vec<Failure>,
    pub dry_run: bool,
}

impl SyncReport {
    /// True when every file was processed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Progress notification emitted during a run
#[derive(Debug)]
pub enum SyncEvent<'e> {
    /// Bucket listing started
    Listing,
    Listed { objects: usize },
    /// Entering a local directory
    Scanning(&'e Path),
    Unchanged(&'e LocalFile),
    /// An upload of a stale or missing file is starting
    Uploading {
        file: &'e LocalFile,
        decision: SyncDecision,
    },
    Uploaded {
        file: &'e LocalFile,
        stats: TransferStats,
    },
    /// Deletion of an orphan is starting
    Deleting { key: &'e str },
    Deleted { key: &'e str },
    /// The action just announced was skipped because of dry-run
    DryRun,
    /// Cached checksum disagrees with the listing; the bucket was changed externally
    ConsistencyWarning { key: &'e str },
    CacheRebuilt(&'e RebuildReport),
    Failed(&'e Failure),
}

/// Receives [`SyncEvent`]s
pub trait SyncObserver {
    fn on_event(&self, event: &SyncEvent<'_>);
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn on_event(&self, _event: &SyncEvent<'_>) {}
}

impl<F> SyncObserver for F
where
    F: Fn(&SyncEvent<'_>),
{
    fn on_event(&self, event: &SyncEvent<'_>) {
        self(event)
    }
}

/// State threaded through one backup run
pub struct SyncSession<'a> {
    store: &'a dyn ObjectStore,
    config: &'a Config,
    cache: Option<MetadataCache>,
    scanner: Scanner,
    options: SyncOptions,
    observer: &'a dyn SyncObserver,
}

impl<'a> SyncSession<'a> {
    /// Prepare a run, opening the cache named in `config` if any
    pub fn new(
        store: &'a dyn ObjectStore,
        config: &'a Config,
        options: SyncOptions,
        observer: &'a dyn SyncObserver,
    ) -> Result<Self> {
        let cache = config.cache.as_ref().map(MetadataCache::open).transpose()?;
        let mapper = KeyMapper::new(config.roots.iter().cloned(), config.relative_paths);
        let scanner = Scanner::new(mapper, config.exclusions()?);

        Ok(Self {
            store,
            config,
            cache,
            scanner,
            options,
            observer,
        })
    }

    pub fn cache(&self) -> Option<&MetadataCache> {
        self.cache.as_ref()
    }

    /// Execute one full run
    pub async fn run(&mut self) -> Result<SyncReport> {
        let mut report = SyncReport {
            dry_run: self.options.dry_run,
            ..Default::default()
        };

        self.ensure_bucket().await?;

        let rebuild = self.options.rebuild_cache && self.cache.is_some();
        if self.options.delete || rebuild {
            self.observer.on_event(&SyncEvent::Listing);
            let index = RemoteIndex::fetch(self.store, &self.config.bucket, &self.config.retry).await?;
            self.observer.on_event(&SyncEvent::Listed {
                objects: index.len(),
            });

            let deleted = if self.options.delete {
                self.sweep_orphans(&index, &mut report).await?
            } else {
                HashSet::new()
            };
            if rebuild {
                self.rebuild_cache(&index, &deleted, &mut report)?;
            }
        }

        let mut seen = HashMap::new();
        for root in self.scanner.mapper().roots().to_vec() {
            self.scan_root(&root, &mut seen, &mut report).await?;
        }

        info!(
            uploaded = report.uploaded,
            updated = report.updated,
            deleted = report.deleted,
            unchanged = report.unchanged,
            failures = report.failures.len(),
            dry_run = report.dry_run,
            "Run complete"
        );
        Ok(report)
    }

    /// Decide what to do with one local file
    ///
    /// Consults the cache first and only falls back to a HEAD request on a
    /// miss. A HEAD that confirms the local file warms the cache.
    pub async fn classify(&self, file: &LocalFile) -> Result<SyncDecision> {
        if let Some(cache) = &self.cache
            && let Some(cached) = cache.get(&file.key)?
        {
            return Ok(verdict(cached.matches(file.mtime, file.size)));
        }

        let remote = retry_with_backoff(&self.config.retry, "head", || {
            self.store.head_object(&self.config.bucket, &file.key)
        })
        .await?;

        match remote {
            None => Ok(SyncDecision::Missing),
            Some(meta) if meta.matches(file.mtime, file.size) => {
                if let Some(cache) = &self.cache {
                    cache.put(&file.key, &meta)?;
                }
                Ok(SyncDecision::Unchanged)
            }
            Some(_) => Ok(SyncDecision::Stale),
        }
    }

    async fn ensure_bucket(&self) -> Result<()> {
        if self.options.dry_run {
            debug!(bucket = %self.config.bucket, "Dry run, not creating bucket");
            return Ok(());
        }
        retry_with_backoff(&self.config.retry, "create_bucket", || {
            self.store
                .create_bucket(&self.config.bucket, self.config.bucket_acl)
        })
        .await
        .map_err(|e| match e {
            Error::Auth(_) | Error::Bucket(_) => e,
            other => Error::Bucket(format!(
                "cannot create bucket {}: {other}",
                self.config.bucket
            )),
        })
    }

    async fn scan_root(
        &self,
        root: &Path,
        seen: &mut HashMap<String, PathBuf>,
        report: &mut SyncReport,
    ) -> Result<()> {
        for event in self.scanner.scan(root) {
            match event {
                ScanEvent::Directory(dir) => self.observer.on_event(&SyncEvent::Scanning(&dir)),
                ScanEvent::Error { path, error } => {
                    self.record(report, path.display().to_string(), FailureKind::Scan, &error);
                }
                ScanEvent::File(file) => {
                    if let Some(first) = seen.get(&file.key) {
                        // Overlapping roots yield the same file twice
                        if *first != file.path {
                            let error = Error::InvalidPath(format!(
                                "{} maps to the same key as {}",
                                file.path.display(),
                                first.display()
                            ));
                            self.record(report, file.key.clone(), FailureKind::DuplicateKey, &error);
                        }
                        continue;
                    }
                    seen.insert(file.key.clone(), file.path.clone());
                    self.reconcile_file(&file, report).await?;
                }
            }
        }
        Ok(())
    }

    async fn reconcile_file(&self, file: &LocalFile, report: &mut SyncReport) -> Result<()> {
        let decision = match self.classify(file).await {
            Ok(decision) => decision,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.record(report, file.key.clone(), FailureKind::Classify, &e);
                return Ok(());
            }
        };

        if decision == SyncDecision::Unchanged {
            report.unchanged += 1;
            self.observer.on_event(&SyncEvent::Unchanged(file));
            return Ok(());
        }

        self.observer
            .on_event(&SyncEvent::Uploading { file, decision });
        if self.options.dry_run {
            count_upload(report, decision);
            self.observer.on_event(&SyncEvent::DryRun);
            return Ok(());
        }

        let replacing = decision == SyncDecision::Stale;
        match self
            .executor()
            .upload(self.cache.as_ref(), file, replacing)
            .await
        {
            Ok(stats) => {
                count_upload(report, decision);
                report.bytes_uploaded += stats.bytes;
                self.observer
                    .on_event(&SyncEvent::Uploaded { file, stats });
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => self.record(report, file.key.clone(), FailureKind::Upload, &e),
        }
        Ok(())
    }

    /// Delete remote objects whose local file is gone; returns the deleted keys
    async fn sweep_orphans(
        &self,
        index: &RemoteIndex,
        report: &mut SyncReport,
    ) -> Result<HashSet<String>> {
        let mut deleted = HashSet::new();
        let executor = self.executor();

        for (key, _) in index.iter() {
            if self.orphan_verdict(key) != Some(SyncDecision::Orphaned) {
                continue;
            }

            self.observer.on_event(&SyncEvent::Deleting { key });
            if self.options.dry_run {
                report.deleted += 1;
                self.observer.on_event(&SyncEvent::DryRun);
                continue;
            }

            match executor.delete(self.cache.as_ref(), key).await {
                Ok(()) => {
                    report.deleted += 1;
                    deleted.insert(key.to_string());
                    self.observer.on_event(&SyncEvent::Deleted { key });
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.record(report, key.to_string(), FailureKind::Delete, &e),
            }
        }
        Ok(deleted)
    }

    /// `Some(Orphaned)` when no live local file maps to `key`, `Some(Unchanged)`
    /// when one does, and `None` when no configured root could produce `key`
    pub fn orphan_verdict(&self, key: &str) -> Option<SyncDecision> {
        let candidates = self.scanner.mapper().candidates(key);
        if candidates.is_empty() {
            debug!(key, "Outside every root's key space, never deleted");
            return None;
        }
        if candidates
            .iter()
            .any(|(_, path)| self.scanner.is_live(path))
        {
            Some(SyncDecision::Unchanged)
        } else {
            Some(SyncDecision::Orphaned)
        }
    }

    fn rebuild_cache(
        &mut self,
        index: &RemoteIndex,
        deleted: &HashSet<String>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let Some(cache) = self.cache.as_mut() else {
            return Ok(());
        };

        let result = cache.rebuild(|key, cached| {
            if deleted.contains(key) {
                return Validation::Gone;
            }
            match index.get(key) {
                Some(listed) if listed.etag == cached.etag => Validation::Current,
                Some(_) => Validation::Mismatch,
                None => Validation::Gone,
            }
        })?;

        for key in &result.mismatched {
            report.consistency_warnings.push(key.clone());
            self.observer
                .on_event(&SyncEvent::ConsistencyWarning { key });
        }
        self.observer.on_event(&SyncEvent::CacheRebuilt(&result));
        Ok(())
    }

    fn executor(&self) -> TransferExecutor<'_> {
        TransferExecutor::new(
            self.store,
            &self.config.bucket,
            self.config.object_acl,
            &self.config.retry,
        )
    }

    fn record(&self, report: &mut SyncReport, subject: String, kind: FailureKind, error: &Error) {
        warn!(subject = %subject, ?kind, error = %error, "Skipping");
        let failure = Failure {
            subject,
            kind,
            message: error.to_string(),
        };
        self.observer.on_event(&SyncEvent::Failed(&failure));
        report.failures.push(failure);
    }
}

fn verdict(matches: bool) -> SyncDecision {
    if matches {
        SyncDecision::Unchanged
    } else {
        SyncDecision::Stale
    }
}

fn count_upload(report: &mut SyncReport, decision: SyncDecision) {
    match decision {
        SyncDecision::Stale => report.updated += 1,
        _ => report.uploaded += 1,
    }
}
