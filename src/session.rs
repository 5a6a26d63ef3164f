// src/session.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::analytics::{keyword_frequencies, FrequencyReport};
use crate::cache::NormalizeCache;
use crate::error::Result;
use crate::normalize::UtteranceRecord;
use crate::query::{filter, FilterSpec};
use crate::source::TableSource;

/// One user's exploration state: the last successfully loaded record
/// collection and the last filter that validated.
///
/// Errors never destroy state. A failed load keeps the previous
/// collection current; an invalid keyword pattern keeps the previous
/// view. Sessions share nothing mutable with each other: the cache has
/// its own lock and record collections are immutable behind `Arc`.
pub struct ExploreSession {
    records: Arc<Vec<UtteranceRecord>>,
    applied: FilterSpec,
}

impl Default for ExploreSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ExploreSession {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Vec::new()),
            applied: FilterSpec::default(),
        }
    }

    /// Swap in a new source, resetting the filter. On failure the
    /// last-known-good collection stays current and the error goes back
    /// to the caller for display.
    pub fn load(&mut self, source: &TableSource, cache: &NormalizeCache) -> Result<usize> {
        match source.records(cache) {
            Ok(records) => {
                info!(records = records.len(), "loaded source");
                self.records = records;
                self.applied = FilterSpec::default();
                Ok(self.records.len())
            }
            Err(err) => {
                warn!(%err, "source load failed; keeping current collection");
                Err(err)
            }
        }
    }

    /// Records currently loaded, unfiltered.
    pub fn records(&self) -> &[UtteranceRecord] {
        &self.records
    }

    /// Validate and adopt a new filter, returning the match count. On
    /// `Error::Pattern` the previously applied filter, and therefore
    /// the view, is left in place.
    pub fn apply_filter(&mut self, spec: FilterSpec) -> Result<usize> {
        let matched = filter(&self.records, &spec)?.len();
        self.applied = spec;
        Ok(matched)
    }

    /// Current filtered view, recomputed from the applied filter.
    pub fn view(&self) -> Vec<&UtteranceRecord> {
        // The applied spec was validated in apply_filter (or is the
        // default), so compilation cannot fail here.
        filter(&self.records, &self.applied).expect("applied filter was validated")
    }

    /// Keyword counts over the current view, so the chart tracks the
    /// active filters.
    pub fn frequencies(&self, vocabulary: &[&str]) -> FrequencyReport {
        keyword_frequencies(self.view(), vocabulary)
    }

    /// Distinct topics over the full collection, sorted, for the topic
    /// selector.
    pub fn topics(&self) -> Vec<String> {
        distinct(self.records.iter().map(|r| &r.topic))
    }

    /// Distinct speakers over the full collection, sorted.
    pub fn speakers(&self) -> Vec<String> {
        distinct(self.records.iter().map(|r| &r.speaker))
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a String>) -> Vec<String> {
    let set: BTreeSet<&String> = values.collect();
    set.into_iter().cloned().collect()
}
