// src/source/builtin.rs

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::normalize::UtteranceRecord;

/// Reference long-format dataset bundled with the crate, used when no
/// workbook has been uploaded. Columns are exactly
/// topic, subtopic, prompt, speaker, utterance.
static SAMPLE_CSV: &str = include_str!("../../data/sample_long.csv");

static SAMPLE: Lazy<Arc<Vec<UtteranceRecord>>> = Lazy::new(|| {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(SAMPLE_CSV.as_bytes());
    let records: Vec<UtteranceRecord> = reader
        .deserialize()
        .collect::<std::result::Result<_, _>>()
        .expect("embedded sample dataset is well-formed");
    Arc::new(records)
});

/// The parsed sample, shared: parsed once per process, never mutated.
pub fn records() -> Arc<Vec<UtteranceRecord>> {
    Arc::clone(&SAMPLE)
}
