// src/query/mod.rs

use std::collections::HashSet;

use regex::Regex;

use crate::error::Result;
use crate::normalize::UtteranceRecord;

/// Ad-hoc filter over a record collection, built fresh per query.
///
/// An empty `topics`/`speakers` set imposes no constraint: an unset
/// multi-select means "everything", so "nothing selected" and
/// "unrestricted" are the same value at this interface.
#[derive(Debug, Default, Clone)]
pub struct FilterSpec {
    pub topics: HashSet<String>,
    pub speakers: HashSet<String>,
    /// Regular expression matched against the utterance text.
    /// Whitespace-only patterns count as absent.
    pub keyword: Option<String>,
}

impl FilterSpec {
    fn compile_keyword(&self) -> Result<Option<Regex>> {
        match self.keyword.as_deref() {
            Some(pattern) if !pattern.trim().is_empty() => Ok(Some(Regex::new(pattern)?)),
            _ => Ok(None),
        }
    }

    /// Single predicate for all three filters, so composition order can
    /// never matter: topics AND speakers AND keyword.
    fn matches(&self, record: &UtteranceRecord, keyword: Option<&Regex>) -> bool {
        if !self.topics.is_empty() && !self.topics.contains(&record.topic) {
            return false;
        }
        if !self.speakers.is_empty() && !self.speakers.contains(&record.speaker) {
            return false;
        }
        match keyword {
            Some(re) => re.is_match(&record.utterance),
            None => true,
        }
    }
}

/// Filtered view over `records`: borrows, never copies or reorders.
/// An invalid keyword pattern fails with `Error::Pattern` before any
/// record is looked at, leaving the caller's previous view intact.
pub fn filter<'a>(
    records: &'a [UtteranceRecord],
    spec: &FilterSpec,
) -> Result<Vec<&'a UtteranceRecord>> {
    let keyword = spec.compile_keyword()?;
    Ok(records
        .iter()
        .filter(|record| spec.matches(record, keyword.as_ref()))
        .collect())
}
