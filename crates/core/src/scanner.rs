//! Local tree scanner
//!
//! Walks one root at a time and yields every regular file that is not
//! excluded, along with the directories entered and any per-entry failures.
//! Symbolic links are never followed or reported as files. Scanning is lazy
//! and can be restarted by calling [`Scanner::scan`] again.

use std::path::{Path, PathBuf};

use regex::RegexSet;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::path::KeyMapper;

/// A local file that is a backup candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Root the file was found under
    pub root: PathBuf,
    /// Absolute path of the file
    pub path: PathBuf,
    pub key: String,
    /// Modification time in whole seconds since the Unix epoch
    pub mtime: i64,
    pub size: u64,
}

/// Item produced while scanning a root
#[derive(Debug)]
pub enum ScanEvent {
    /// A directory is about to be scanned
    Directory(PathBuf),
    File(LocalFile),
    /// An entry could not be read; it is skipped
    Error { path: PathBuf, error: Error },
}

/// Walks configured roots applying the exclusion rules
#[derive(Debug, Clone)]
pub struct Scanner {
    mapper: KeyMapper,
    exclusions: RegexSet,
}

impl Scanner {
    pub fn new(mapper: KeyMapper, exclusions: RegexSet) -> Self {
        Self { mapper, exclusions }
    }

    pub fn mapper(&self) -> &KeyMapper {
        &self.mapper
    }

    /// Whether a path is excluded by any ignore pattern
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.exclusions.is_match(&path.to_string_lossy())
    }

    /// Whether `path` is a file this scanner would yield
    ///
    /// Used to decide whether a remote object still has a local counterpart.
    pub fn is_live(&self, path: &Path) -> bool {
        match std::fs::symlink_metadata(path) {
            Ok(meta) => meta.file_type().is_file() && !self.is_excluded(path),
            Err(_) => false,
        }
    }

    /// Lazily scan one root
    pub fn scan<'a>(&'a self, root: &'a Path) -> impl Iterator<Item = ScanEvent> + 'a {
        WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) => self.visit(root, entry),
                Err(e) => {
                    let path = e.path().unwrap_or(root).to_path_buf();
                    let error = match e.into_io_error() {
                        Some(io) => Error::Io(io),
                        None => Error::General("filesystem loop detected".into()),
                    };
                    Some(ScanEvent::Error { path, error })
                }
            })
    }

    fn visit(&self, root: &Path, entry: walkdir::DirEntry) -> Option<ScanEvent> {
        let file_type = entry.file_type();
        if file_type.is_dir() {
            return Some(ScanEvent::Directory(entry.into_path()));
        }
        if file_type.is_symlink() || !file_type.is_file() {
            tracing::trace!(path = %entry.path().display(), "Skipping non-regular file");
            return None;
        }
        if self.is_excluded(entry.path()) {
            tracing::trace!(path = %entry.path().display(), "Excluded");
            return None;
        }

        match self.describe(root, entry.path()) {
            Ok(file) => Some(ScanEvent::File(file)),
            Err(error) => Some(ScanEvent::Error {
                path: entry.into_path(),
                error,
            }),
        }
    }

    fn describe(&self, root: &Path, path: &Path) -> Result<LocalFile> {
        let meta = std::fs::metadata(path)?;
        let (mtime, size) = stat_times(&meta)?;
        Ok(LocalFile {
            root: root.to_path_buf(),
            path: path.to_path_buf(),
            key: self.mapper.key_for(root, path)?,
            mtime,
            size,
        })
    }
}

/// Modification time (whole seconds) and size of a file
pub fn stat(path: &Path) -> Result<(i64, u64)> {
    stat_times(&std::fs::metadata(path)?)
}

fn stat_times(meta: &std::fs::Metadata) -> Result<(i64, u64)> {
    let modified = meta.modified()?;
    let mtime = jiff::Timestamp::try_from(modified)
        .map_err(|e| Error::General(format!("unrepresentable modification time: {e}")))?
        .as_second();
    Ok((mtime, meta.len()))
}
