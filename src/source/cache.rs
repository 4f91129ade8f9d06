//! JT-017: Content-addressed source cache.
//!
//! Layout: `<root>/<kind>/<blake3(namespace/name)>/`. A missing directory is
//! a permanent not-found; any other I/O failure is transient.

use super::{Fetcher, SourceError, SourceRef};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Cache root: `JOBTREE_CACHE_DIR`, else `$XDG_CACHE_HOME/jobtree`, else
/// `~/.cache/jobtree`, else the temp dir.
pub fn default_cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("JOBTREE_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME") {
        return PathBuf::from(xdg).join("jobtree");
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home).join(".cache").join("jobtree");
    }
    std::env::temp_dir().join("jobtree")
}

/// Cache key for a source. Returns the BLAKE3 hex of `namespace/name`.
pub fn cache_key(source: &SourceRef) -> String {
    blake3::hash(source.path().as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone)]
pub struct CacheFetcher {
    root: PathBuf,
}

impl CacheFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn cache_root(&self) -> &Path {
        &self.root
    }

    /// Where `source` lives in this cache.
    pub fn path_for(&self, source: &SourceRef) -> PathBuf {
        self.root.join(&source.kind).join(cache_key(source))
    }
}

impl Fetcher for CacheFetcher {
    fn fetch(&self, source: &SourceRef) -> Result<PathBuf, SourceError> {
        let dir = self.path_for(source);
        match std::fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {
                tracing::debug!(source = %source, dir = %dir.display(), "source cache hit");
                Ok(dir)
            }
            Ok(_) => Err(SourceError::Transient {
                source_ref: source.to_string(),
                message: format!("{} is not a directory", dir.display()),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SourceError::NotFound {
                source_ref: source.to_string(),
            }),
            Err(e) => Err(SourceError::Transient {
                source_ref: source.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn root(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }
}
