//! In-memory object store used by the integration tests
//!
//! Records every call it receives and can be told to fail specific
//! operations a fixed number of times.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use clonus_core::{
    AccessPolicy, Config, Error, ListPage, ObjectStore, ObjectSummary, RemoteMetadata, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateBucket,
    Head,
    Put,
    SetAcl,
    Delete,
    List,
}

impl Op {
    pub fn is_mutation(self) -> bool {
        matches!(self, Op::CreateBucket | Op::Put | Op::SetAcl | Op::Delete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Stored {
    pub metadata: RemoteMetadata,
    pub acl: Option<AccessPolicy>,
    pub content: Vec<u8>,
}

struct Fault {
    remaining: usize,
    error: fn() -> Error,
}

#[derive(Default)]
struct State {
    bucket: Option<String>,
    objects: BTreeMap<String, Stored>,
    calls: Vec<Call>,
    faults: HashMap<(Op, Option<String>), Fault>,
    next_etag: u64,
    page_size: usize,
}

pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                page_size: 2,
                ..Default::default()
            }),
        }
    }

    /// Place an object directly, as if uploaded by an earlier run
    pub fn insert(&self, key: &str, mtime: i64, size: u64, etag: &str) {
        self.state.lock().unwrap().objects.insert(
            key.to_string(),
            Stored {
                metadata: RemoteMetadata::new(mtime, size, etag),
                acl: None,
                content: Vec::new(),
            },
        );
    }

    /// Change an object's checksum without going through the engine
    pub fn tamper(&self, key: &str, etag: &str) {
        let mut state = self.state.lock().unwrap();
        let object = state.objects.get_mut(key).expect("object to tamper with");
        object.metadata.etag = etag.to_string();
    }

    /// Make `op` on `key` (or on anything, when `key` is `None`) fail `times` times
    pub fn fail(&self, op: Op, key: Option<&str>, times: usize, error: fn() -> Error) {
        self.state.lock().unwrap().faults.insert(
            (op, key.map(str::to_string)),
            Fault {
                remaining: times,
                error,
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<Stored> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls().iter().filter(|c| c.op == op).count()
    }

    pub fn mutations(&self) -> usize {
        self.calls().iter().filter(|c| c.op.is_mutation()).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn enter(&self, op: Op, key: Option<&str>) -> Result<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            op,
            key: key.map(str::to_string),
        });
        for slot in [(op, key.map(str::to_string)), (op, None)] {
            if let Some(fault) = state.faults.get_mut(&slot)
                && fault.remaining > 0
            {
                fault.remaining -= 1;
                return Err((fault.error)());
            }
        }
        Ok(state)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_bucket(&self, bucket: &str, _acl: Option<AccessPolicy>) -> Result<()> {
        let mut state = self.enter(Op::CreateBucket, None)?;
        state.bucket = Some(bucket.to_string());
        Ok(())
    }

    async fn head_object(&self, _bucket: &str, key: &str) -> Result<Option<RemoteMetadata>> {
        let state = self.enter(Op::Head, Some(key))?;
        Ok(state.objects.get(key).map(|o| o.metadata.clone()))
    }

    async fn put_object(
        &self,
        _bucket: &str,
        key: &str,
        source: &Path,
        mtime: i64,
        acl: Option<AccessPolicy>,
    ) -> Result<()> {
        let content = std::fs::read(source)?;
        let mut state = self.enter(Op::Put, Some(key))?;
        state.next_etag += 1;
        let etag = format!("etag-{}", state.next_etag);
        state.objects.insert(
            key.to_string(),
            Stored {
                metadata: RemoteMetadata::new(mtime, content.len() as u64, etag),
                acl,
                content,
            },
        );
        Ok(())
    }

    async fn set_object_acl(&self, _bucket: &str, key: &str, acl: AccessPolicy) -> Result<()> {
        let mut state = self.enter(Op::SetAcl, Some(key))?;
        match state.objects.get_mut(key) {
            Some(object) => {
                object.acl = Some(acl);
                Ok(())
            }
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    async fn delete_object(&self, _bucket: &str, key: &str) -> Result<()> {
        let mut state = self.enter(Op::Delete, Some(key))?;
        state.objects.remove(key);
        Ok(())
    }

    async fn list_objects(
        &self,
        _bucket: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        let state = self.enter(Op::List, None)?;
        let mut remaining = state
            .objects
            .iter()
            .filter(|(key, _)| {
                continuation_token
                    .as_deref()
                    .is_none_or(|token| key.as_str() > token)
            })
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                etag: object.metadata.etag.clone(),
                size: object.content.len() as u64,
            });

        let objects: Vec<_> = remaining.by_ref().take(state.page_size).collect();
        let continuation_token = match remaining.next() {
            Some(_) => objects.last().map(|o| o.key.clone()),
            None => None,
        };
        Ok(ListPage {
            objects,
            continuation_token,
        })
    }
}

/// Local roots, a cache location and a matching configuration
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self, name: &str) -> PathBuf {
        let root = self.dir.path().join(name);
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    pub fn cache_path(&self) -> PathBuf {
        self.dir.path().join("state").join("cache.db")
    }

    /// Create or overwrite a file and pin its modification time
    pub fn write(&self, path: &Path, content: &[u8], mtime: u64) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(std::time::UNIX_EPOCH + std::time::Duration::from_secs(mtime))
            .unwrap();
    }

    /// Configuration with the cache enabled and fast retries
    pub fn config(&self, roots: &[&Path], relative: bool, extra: &str) -> Config {
        let roots: Vec<String> = roots.iter().map(|r| format!("{r:?}")).collect();
        Config::from_toml(&format!(
            "bucket = \"backup\"\n\
             roots = [{}]\n\
             relative_paths = {relative}\n\
             cache = {:?}\n\
             {extra}\n\
             [retry]\n\
             max_attempts = 3\n\
             initial_backoff_ms = 1\n\
             max_backoff_ms = 2\n",
            roots.join(", "),
            self.cache_path(),
        ))
        .unwrap()
    }
}

pub fn transient() -> Error {
    Error::Network("Service error: SlowDown".into())
}

pub fn permanent() -> Error {
    Error::Network("Service error: InvalidArgument".into())
}
