//! Reshapes semi-structured interview matrices (topic/subtopic/prompt
//! label columns × one free-text column per speaker, with merged-cell
//! fill-down) into long-format utterance records, then supports filtered
//! exploration and keyword-frequency analytics over them.
//!
//! The pipeline is `source` → `normalize` → (`cache`) → `query` →
//! `analytics`; [`session::ExploreSession`] ties it together for a
//! presentation layer.

pub mod analytics;
pub mod cache;
pub mod error;
pub mod normalize;
pub mod query;
pub mod session;
pub mod source;

pub use analytics::{keyword_frequencies, FrequencyReport, DEFAULT_VOCABULARY};
pub use cache::{NormalizeCache, SourceId};
pub use error::{Error, Result};
pub use normalize::{normalize, UtteranceRecord};
pub use query::{filter, FilterSpec};
pub use session::ExploreSession;
pub use source::{RawColumn, RawTable, TableSource};
