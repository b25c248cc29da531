//! Mapping between local paths and object keys
//!
//! Two derivations are supported. In relative mode a key is the path of the
//! file relative to its root (`/srv/data/a/b.txt` under `/srv/data` becomes
//! `a/b.txt`). In absolute mode a key is the absolute path without its
//! leading slash (`srv/data/a/b.txt`).
//!
//! The inverse mapping is used by the orphan sweep. It only ever proposes
//! local paths inside a configured root, so a key that no root can produce
//! has no candidates at all.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Derives object keys for files under a fixed set of roots
#[derive(Debug, Clone)]
pub struct KeyMapper {
    roots: Vec<PathBuf>,
    relative: bool,
}

impl KeyMapper {
    /// Roots are kept sorted component-wise (`/a/b` before `/a-b`), which is
    /// also the precedence order used when inverting a key.
    pub fn new(roots: impl IntoIterator<Item = PathBuf>, relative: bool) -> Self {
        let mut roots: Vec<PathBuf> = roots.into_iter().collect();
        roots.sort();
        roots.dedup();
        Self { roots, relative }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Object key for `path`, which must lie under `root`
    pub fn key_for(&self, root: &Path, path: &Path) -> Result<String> {
        let tail = if self.relative {
            path.strip_prefix(root).map_err(|_| {
                Error::InvalidPath(format!(
                    "{} is not under root {}",
                    path.display(),
                    root.display()
                ))
            })?
        } else {
            path
        };

        let mut parts = Vec::new();
        for component in tail.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                    Error::InvalidPath(format!("not valid UTF-8: {}", path.display()))
                })?),
                Component::RootDir => {}
                _ => {
                    return Err(Error::InvalidPath(format!(
                        "unsupported path component in {}",
                        path.display()
                    )));
                }
            }
        }

        if parts.is_empty() {
            return Err(Error::InvalidPath(format!(
                "{} does not name a file",
                path.display()
            )));
        }
        Ok(parts.join("/"))
    }

    /// Local paths that would produce `key`, paired with their root, in precedence order
    ///
    /// Empty when the key lies outside every root's key-space.
    pub fn candidates(&self, key: &str) -> Vec<(&Path, PathBuf)> {
        if !is_well_formed(key) {
            return Vec::new();
        }

        if self.relative {
            self.roots
                .iter()
                .map(|root| (root.as_path(), root.join(key)))
                .collect()
        } else {
            let path = Path::new("/").join(key);
            self.roots
                .iter()
                .filter(|root| path.starts_with(root) && path != **root)
                .map(|root| (root.as_path(), path.clone()))
                .collect()
        }
    }

    /// Whether some configured root could have produced `key`
    pub fn in_key_space(&self, key: &str) -> bool {
        !self.candidates(key).is_empty()
    }
}

// Keys produced by `key_for` never contain empty, `.` or `..` segments.
fn is_well_formed(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('/')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
