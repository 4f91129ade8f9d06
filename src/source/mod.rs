//! JT-016: Source-fetch collaborator.
//!
//! Remote imports are written `kind::namespace/name` (namespace optional).
//! A [`Fetcher`] resolves a [`SourceRef`] to a local directory. Failures are
//! classified: [`SourceError::NotFound`] is permanent, [`SourceError::Transient`]
//! should be retried by the caller.

pub mod cache;

pub use cache::{default_cache_dir, CacheFetcher};

use std::fmt;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source '{source_ref}' unavailable (will retry): {message}")]
    Transient { source_ref: String, message: String },

    #[error("source '{source_ref}' not found")]
    NotFound { source_ref: String },

    #[error("invalid source locator '{locator}': {message}")]
    Invalid { locator: String, message: String },
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// A remote artifact identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl SourceRef {
    /// Parse `kind::namespace/name` or `kind::name`.
    pub fn parse_locator(locator: &str) -> Result<Self, SourceError> {
        let invalid = |message: &str| SourceError::Invalid {
            locator: locator.to_string(),
            message: message.to_string(),
        };
        let (kind, rest) = locator
            .split_once("::")
            .ok_or_else(|| invalid("expected kind::name"))?;
        if kind.is_empty() {
            return Err(invalid("empty kind"));
        }
        let (namespace, name) = match rest.rsplit_once('/') {
            Some((ns, name)) => (Some(ns.to_string()), name),
            None => (None, rest),
        };
        if name.is_empty() || namespace.as_deref() == Some("") {
            return Err(invalid("empty namespace or name"));
        }
        Ok(Self {
            kind: kind.to_string(),
            namespace,
            name: name.to_string(),
        })
    }

    /// `namespace/name`, or `name` alone.
    pub fn path(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.kind, self.path())
    }
}

/// Resolves a source to a local directory.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, source: &SourceRef) -> Result<PathBuf, SourceError>;

    /// Directory exposed to expressions as `source.dir`.
    fn root(&self) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jt016_parse_locator() {
        let r = SourceRef::parse_locator("git::acme/tools/ci").unwrap();
        assert_eq!(r.kind, "git");
        assert_eq!(r.namespace.as_deref(), Some("acme/tools"));
        assert_eq!(r.name, "ci");
        assert_eq!(r.to_string(), "git::acme/tools/ci");

        let bare = SourceRef::parse_locator("oci::base").unwrap();
        assert_eq!(bare.namespace, None);
        assert_eq!(bare.path(), "base");
    }

    #[test]
    fn test_jt016_parse_locator_rejects() {
        for bad in ["nokind", "::x", "git::", "git::/x", "git::acme/"] {
            assert!(
                matches!(SourceRef::parse_locator(bad), Err(SourceError::Invalid { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_jt016_transient_classification() {
        assert!(SourceError::Transient {
            source_ref: "a::b".into(),
            message: "io".into()
        }
        .is_transient());
        assert!(!SourceError::NotFound {
            source_ref: "a::b".into()
        }
        .is_transient());
    }
}
