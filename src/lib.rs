//! Jobtree: declarative job trees.
//!
//! Typed parameters, scoped expressions, bounded-concurrency runs and
//! event-driven log forwarding, loaded from YAML documents.

pub mod cli;
pub mod core;
pub mod eventlog;
pub mod source;
pub mod transport;
