//! Reference tables consumed by the molecular model: per-element properties and
//! fragment templates for molecules, residues and nucleotides.
//!
//! Both databases are built from tables embedded in the crate and can be overlaid
//! with user tables at start-up. They are immutable after construction and shared
//! through `Arc` by the [`Environment`](crate::engine::environment::Environment).

pub mod elements;
pub mod molecules;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Unknown element '{0}'")]
    UnknownElement(String),
    #[error("Unknown element property '{0}'")]
    UnknownProperty(String),
    #[error("No {kind} template named '{code}'")]
    UnknownTemplate { kind: &'static str, code: String },
    #[error("Invalid template {kind} '{code}': {reason}")]
    InvalidTemplate {
        kind: &'static str,
        code: String,
        reason: String,
    },
}

pub(crate) const BUILTIN_SOURCE: &str = "<builtin>";
