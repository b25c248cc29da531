//! Persistent cache of remote object metadata
//!
//! The cache lets a run skip a HEAD request for every file whose remote copy
//! was already observed. It is load-bearing: an entry that outlives the
//! object it describes makes the engine skip a needed upload. Three rules
//! keep it honest:
//!
//! - an entry is written only after a confirmed remote observation,
//! - an entry is removed before any upload or delete of its key,
//! - a rebuild writes a complete new generation to a sibling file and
//!   renames it over the old one, so a crash leaves either generation intact.
//!
//! Storage is a single-table SQLite file used as a flat key-value store with
//! JSON-encoded values.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::traits::RemoteMetadata;

/// Flat, durable key-value file
pub struct KvFile {
    conn: Connection,
}

impl KvFile {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Cache(format!("cannot open {}: {e}", path.display())))?;
        Self::init(conn)
    }

    /// Store that lives only as long as the handle
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row("SELECT value FROM entries WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM entries WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Write many entries in one transaction
    pub fn set_all<'a>(&mut self, items: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)")?;
            for (key, value) in items {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All entries ordered by key
    pub fn entries(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM entries ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush and release the file
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::from(e))
    }
}

/// Outcome of checking one cached entry against the bucket listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Listing confirms the cached checksum
    Current,
    /// Listing shows a different checksum; the bucket was changed behind our back
    Mismatch,
    /// Key is no longer in the bucket
    Gone,
}

/// Result of a cache rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Entries carried into the new generation
    pub kept: usize,
    /// Keys dropped because the listing disagreed with the cached checksum
    pub mismatched: Vec<String>,
    /// Keys dropped because the object no longer exists
    pub gone: usize,
}

/// Metadata cache keyed by object key
pub struct MetadataCache {
    path: PathBuf,
    store: KvFile,
}

impl MetadataCache {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Cache(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let store = KvFile::open(&path)?;
        debug!(path = %path.display(), "Opened metadata cache");
        Ok(Self { path, store })
    }

    pub fn get(&self, key: &str) -> Result<Option<RemoteMetadata>> {
        self.store
            .get(key)?
            .map(|bytes| decode(key, &bytes))
            .transpose()
    }

    pub fn put(&self, key: &str, metadata: &RemoteMetadata) -> Result<()> {
        self.store.set(key, &encode(metadata)?)
    }

    /// Forget `key`; a no-op when nothing is cached
    pub fn invalidate(&self, key: &str) -> Result<()> {
        self.store.delete(key)
    }

    pub fn entries(&self) -> Result<Vec<(String, RemoteMetadata)>> {
        self.store
            .entries()?
            .into_iter()
            .map(|(key, bytes)| {
                let meta = decode(&key, &bytes)?;
                Ok((key, meta))
            })
            .collect()
    }

    pub fn len(&self) -> Result<usize> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty()
    }

    /// Replace the cache with the entries that `validate` confirms
    ///
    /// The current generation stays usable until the new one is fully written
    /// to `<cache>.tmp`; the new file is then renamed over the old one.
    pub fn rebuild<F>(&mut self, mut validate: F) -> Result<RebuildReport>
    where
        F: FnMut(&str, &RemoteMetadata) -> Validation,
    {
        let tmp_path = self.sibling_path();
        remove_if_exists(&tmp_path)?;

        let mut report = RebuildReport::default();
        let mut carried = Vec::new();
        for (key, bytes) in self.store.entries()? {
            let meta = decode(&key, &bytes)?;
            match validate(&key, &meta) {
                Validation::Current => carried.push((key, bytes)),
                Validation::Mismatch => {
                    warn!(key = %key, cached_etag = %meta.etag, "Cached checksum does not match bucket listing");
                    report.mismatched.push(key);
                }
                Validation::Gone => report.gone += 1,
            }
        }
        report.kept = carried.len();

        let mut next = KvFile::open(&tmp_path)?;
        next.set_all(carried.iter().map(|(k, v)| (k.as_str(), v.as_slice())))?;
        next.close()?;

        self.swap_in(&tmp_path)?;
        info!(
            kept = report.kept,
            mismatched = report.mismatched.len(),
            gone = report.gone,
            "Rebuilt metadata cache"
        );
        Ok(report)
    }

    fn swap_in(&mut self, tmp_path: &Path) -> Result<()> {
        let old = std::mem::replace(&mut self.store, KvFile::in_memory()?);
        old.close()?;

        let renamed = std::fs::rename(tmp_path, &self.path).map_err(|e| {
            Error::Cache(format!(
                "cannot move {} into place: {e}",
                tmp_path.display()
            ))
        });
        if renamed.is_ok() {
            sync_parent(&self.path);
        }

        // Reopen whichever generation is now on disk
        self.store = KvFile::open(&self.path)?;
        renamed
    }

    fn sibling_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    pub fn close(self) -> Result<()> {
        self.store.close()
    }
}

fn encode(metadata: &RemoteMetadata) -> Result<Vec<u8>> {
    serde_json::to_vec(metadata).map_err(|e| Error::Cache(e.to_string()))
}

fn decode(key: &str, bytes: &[u8]) -> Result<RemoteMetadata> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Cache(format!("corrupt cache entry for {key}: {e}")))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed leftover cache generation");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Cache(format!("cannot remove {}: {e}", path.display()))),
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    let Some(parent) = path.parent() else {
        return;
    };
    let dir = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let result = std::fs::File::open(dir).and_then(|handle| handle.sync_all());
    if let Err(e) = result {
        warn!(dir = %dir.display(), error = %e, "Directory fsync failed, rename may not be durable");
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
