//! JT-000: Crate-wide error taxonomy.
//!
//! Every fallible core operation returns [`Result`]. Sub-invocation errors are
//! propagated unchanged; the CLI maps [`Error::Exit`] to its carried status.

use super::value::{Type, TypeError};
use crate::source::SourceError;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed document or expression.
    #[error("parse error in {location}: {message}")]
    Parse { location: String, message: String },

    /// A job body could not be decoded into runs/steps/phases.
    #[error("job '{job}': cannot decode {what}: {message}")]
    Decode {
        job: String,
        what: &'static str,
        message: String,
    },

    /// A value does not conform to its declared type constraint.
    #[error("{context}: wanted {wanted}, got {actual}")]
    Type {
        context: String,
        wanted: Type,
        actual: Type,
    },

    /// Two merged parameter/option sets disagree on a shared name.
    #[error("incompatible {kind} '{name}': {wanted} (importing) vs {actual} (imported)")]
    IncompatibleSpec {
        kind: &'static str,
        name: String,
        wanted: Type,
        actual: Type,
    },

    #[error("missing value for {kind} '{name}' of job '{job}'")]
    Missing {
        kind: &'static str,
        name: String,
        job: String,
    },

    #[error("job not found: '{0}'")]
    JobNotFound(String),

    #[error("duplicate job name '{0}' in registry")]
    DuplicateJob(String),

    #[error("import cycle detected at {}", .0.display())]
    ImportCycle(PathBuf),

    #[error("job '{job}': assertion failed: {expr}")]
    Assertion { job: String, expr: String },

    #[error("cannot evaluate `{expr}`: {message}")]
    Eval { expr: String, message: String },

    /// A command exited non-zero; the status is carried to the process exit.
    #[error("job '{job}' exited with status {code}")]
    Exit { job: String, code: i32 },

    #[error("job '{job}': recursion limit of {limit} nested invocations exceeded")]
    RecursionLimit { job: String, limit: usize },

    #[error("cannot run '{command}': {message}")]
    Command { command: String, message: String },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("test '{test}': {message}")]
    Expectation { test: String, message: String },
}

impl Error {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exit { code, .. } => *code,
            _ => 1,
        }
    }

    /// Whether a caller's reconciliation loop should retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Source(e) if e.is_transient())
    }

    pub(crate) fn type_mismatch(context: impl Into<String>, err: TypeError) -> Self {
        Self::Type {
            context: context.into(),
            wanted: err.wanted,
            actual: err.actual,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
