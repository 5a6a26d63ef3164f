// src/normalize/mod.rs

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::source::RawTable;

/// Leading hierarchical label columns, in fixed positional order:
/// topic, subtopic, prompt.
const LABEL_COLUMNS: usize = 3;

/// Stringified spreadsheet blanks arrive as this literal; treated the
/// same as an empty cell when deciding whether a candidate survives.
const MISSING_PLACEHOLDER: &str = "nan";

/// One speaker's answer to one prompt: the canonical long-format unit.
/// Immutable once created; the full collection is what every downstream
/// layer (filtering, analytics, presentation) consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtteranceRecord {
    pub topic: String,
    pub subtopic: String,
    pub prompt: String,
    pub speaker: String,
    pub utterance: String,
}

/// Carry the last non-missing value downward, reproducing merged-cell
/// spreadsheet semantics where a label is written once and applies to
/// the rows beneath it until it changes.
pub fn forward_fill(cells: &[Option<String>]) -> Vec<Option<String>> {
    let mut filled = Vec::with_capacity(cells.len());
    let mut last: Option<String> = None;
    for cell in cells {
        if let Some(value) = cell {
            last = Some(value.clone());
        }
        filled.push(last.clone());
    }
    filled
}

/// Reshape a raw grid into long-format records: fill down the three
/// label columns, then emit one candidate per (row, speaker column),
/// dropping candidates whose trimmed utterance is empty or the missing
/// placeholder. Output is row-major, speaker columns in header order.
///
/// Rows whose labels are missing even after fill-down (nothing above to
/// carry) yield records with empty label fields; callers filter those
/// out if undesired.
#[tracing::instrument(level = "debug", skip(table), fields(columns = table.columns.len(), rows = table.row_count()))]
pub fn normalize(table: &RawTable) -> Result<Vec<UtteranceRecord>> {
    if table.columns.len() < LABEL_COLUMNS + 1 {
        return Err(Error::Schema {
            columns: table.columns.len(),
        });
    }

    let labels: Vec<Vec<Option<String>>> = table.columns[..LABEL_COLUMNS]
        .iter()
        .map(|col| forward_fill(&col.cells))
        .collect();
    let speakers = &table.columns[LABEL_COLUMNS..];

    let mut records = Vec::new();
    for row in 0..table.row_count() {
        let label = |idx: usize| -> String {
            labels[idx]
                .get(row)
                .and_then(|cell| cell.clone())
                .unwrap_or_default()
        };
        for speaker_col in speakers {
            let Some(cell) = speaker_col.cells.get(row).and_then(|c| c.as_deref()) else {
                continue;
            };
            let trimmed = cell.trim();
            if trimmed.is_empty() || trimmed == MISSING_PLACEHOLDER {
                continue;
            }
            records.push(UtteranceRecord {
                topic: label(0),
                subtopic: label(1),
                prompt: label(2),
                speaker: speaker_col.name.clone(),
                utterance: cell.to_string(),
            });
        }
    }

    debug!(produced = records.len(), "normalized table");
    Ok(records)
}
