//! Core model and engine: values, expressions, documents, resolution, execution.

pub mod body;
pub mod context;
pub mod error;
pub mod executor;
pub mod expr;
pub mod group;
pub mod inputs;
pub mod parser;
pub mod resolver;
pub mod testing;
pub mod types;
pub mod value;
