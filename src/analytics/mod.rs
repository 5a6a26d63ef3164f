// src/analytics/mod.rs

use serde::Serialize;

use crate::normalize::UtteranceRecord;

/// Pain/demand vocabulary charted by default: recurring friction terms
/// from the interview corpus.
pub const DEFAULT_VOCABULARY: &[&str] = &[
    "inconvenient",
    "error",
    "missing",
    "need",
    "copy",
    "permission",
    "security",
    "request",
    "repeat",
    "time",
];

/// Ordered (term, record count) pairs; order follows the vocabulary the
/// report was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrequencyReport {
    pub entries: Vec<(String, usize)>,
}

impl FrequencyReport {
    pub fn count(&self, term: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|(t, _)| t == term)
            .map(|(_, n)| *n)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries.iter().map(|(t, n)| (t.as_str(), *n))
    }
}

/// Count, per vocabulary term, how many records mention the term at
/// least once. Plain case-sensitive substring containment, intentionally
/// narrower than the query layer's regex matching; records are counted,
/// not occurrences.
pub fn keyword_frequencies<'a, I>(records: I, vocabulary: &[&str]) -> FrequencyReport
where
    I: IntoIterator<Item = &'a UtteranceRecord>,
{
    let records: Vec<&UtteranceRecord> = records.into_iter().collect();
    let entries = vocabulary
        .iter()
        .map(|term| {
            let count = records
                .iter()
                .filter(|r| r.utterance.contains(*term))
                .count();
            ((*term).to_string(), count)
        })
        .collect();
    FrequencyReport { entries }
}
