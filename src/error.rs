// src/error.rs

use std::io::Error as IoError;

use thiserror::Error as ThisError;

/// Result type for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything here is recoverable at the boundary: the caller shows the
/// message and keeps operating on its last-known-good data.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Input bytes could not be parsed as tabular data at all.
    #[error("source format error: {0}")]
    SourceFormat(String),

    /// The table parsed, but lacks the three label columns plus at least
    /// one speaker column.
    #[error("schema error: expected at least 4 columns (topic, subtopic, prompt, speakers), found {columns}")]
    Schema { columns: usize },

    /// The keyword filter is not a valid regular expression.
    #[error("invalid keyword pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Reading a source file from disk failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),
}
