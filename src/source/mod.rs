// src/source/mod.rs

use std::fs;
use std::path::Path;
use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64;

use crate::cache::{NormalizeCache, SourceId};
use crate::error::Result;
use crate::normalize::{self, UtteranceRecord};

pub mod builtin;
pub mod xlsx;

/// A parsed sheet: named columns in sheet order, each holding one
/// `Option<String>` cell per data row (`None` = blank cell). Columns
/// 0–2 are the hierarchical label columns (topic, subtopic, prompt);
/// everything after is a speaker column.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub columns: Vec<RawColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawColumn {
    pub name: String,
    pub cells: Vec<Option<String>>,
}

impl RawTable {
    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of data rows: the longest column wins, shorter columns
    /// behave as if padded with blanks.
    pub fn row_count(&self) -> usize {
        self.columns.iter().map(|c| c.cells.len()).max().unwrap_or(0)
    }
}

/// Where utterance records come from: an uploaded workbook, or the
/// embedded reference dataset. Two interchangeable producers behind one
/// type, so callers never branch on "is a file present".
pub enum TableSource {
    /// Raw bytes of an `.xlsx` workbook.
    File(Vec<u8>),
    /// The embedded long-format sample, already in record shape.
    Builtin,
}

impl TableSource {
    /// Read workbook bytes from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(TableSource::File(fs::read(path)?))
    }

    /// Stable identity for memoization: a content hash for files, a
    /// fixed marker for the builtin dataset.
    pub fn id(&self) -> SourceId {
        match self {
            TableSource::File(bytes) => SourceId::Content(xxh3_64(bytes)),
            TableSource::Builtin => SourceId::Builtin,
        }
    }

    /// Produce the record collection for this source, memoized through
    /// `cache`. The builtin dataset is already long-format and bypasses
    /// the normalizer entirely.
    pub fn records(&self, cache: &NormalizeCache) -> Result<Arc<Vec<UtteranceRecord>>> {
        match self {
            TableSource::File(bytes) => cache.get_or_insert_with(self.id(), || {
                let table = xlsx::parse_workbook(bytes)?;
                normalize::normalize(&table)
            }),
            TableSource::Builtin => Ok(builtin::records()),
        }
    }
}
