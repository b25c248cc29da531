//! clonus-core: Core library for the clonus backup tool
//!
//! This crate provides everything that does not depend on a particular S3 SDK:
//! - Configuration loading and validation
//! - Path to object key mapping
//! - Local tree scanning
//! - The persistent metadata cache
//! - The reconciliation engine and transfer executor
//! - The ObjectStore trait the S3 adapter implements
//!
//! Keeping the SDK out of this crate lets the engine be tested against an
//! in-memory store.

pub mod acl;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod path;
pub mod retry;
pub mod scanner;
pub mod traits;
pub mod transfer;

pub use acl::AccessPolicy;
pub use cache::{MetadataCache, RebuildReport, Validation};
pub use config::{Config, Credentials, RetryConfig};
pub use engine::{
    Failure, FailureKind, NoopObserver, SyncDecision, SyncEvent, SyncObserver, SyncOptions,
    SyncReport, SyncSession,
};
pub use error::{Error, Result};
pub use index::{RemoteEntry, RemoteIndex};
pub use path::KeyMapper;
pub use retry::retry_with_backoff;
pub use scanner::{LocalFile, ScanEvent, Scanner};
pub use traits::{ListPage, ObjectStore, ObjectSummary, RemoteMetadata};
pub use transfer::{TransferExecutor, TransferStats};
