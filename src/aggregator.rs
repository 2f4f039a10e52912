use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::config::{Field, LogRecord};
use crate::error::RecordError;
use crate::templater::PathTemplater;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AggregationKey {
    pub method: String,
    pub path: String,
}

impl AggregationKey {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        AggregationKey {
            method: method.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedEntry {
    #[serde(flatten)]
    pub key: AggregationKey,
    pub count: u64,
}

/// Hit counts per `(method, path template)`.
#[derive(Debug, Clone, Default)]
pub struct FrequencyTable {
    counts: HashMap<AggregationKey, u64>,
    total: u64,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: AggregationKey) {
        *self.counts.entry(key).or_insert(0) += 1;
        self.total += 1;
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn count(&self, method: &str, path: &str) -> u64 {
        self.counts
            .get(&AggregationKey::new(method, path))
            .copied()
            .unwrap_or(0)
    }

    /// Entries by count, highest first; equal counts in key order.
    pub fn ranked(&self) -> Vec<RankedEntry> {
        let mut entries: Vec<RankedEntry> = self
            .counts
            .iter()
            .map(|(key, &count)| RankedEntry {
                key: key.clone(),
                count,
            })
            .collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        entries
    }
}

/// Streams records into a [`FrequencyTable`], templating each path.
pub struct FrequencyAggregator<'t> {
    templater: &'t PathTemplater,
    table: FrequencyTable,
}

impl<'t> FrequencyAggregator<'t> {
    pub fn new(templater: &'t PathTemplater) -> Self {
        FrequencyAggregator {
            templater,
            table: FrequencyTable::new(),
        }
    }

    pub fn push(&mut self, record: &LogRecord) -> Result<(), RecordError> {
        let method = record
            .method
            .as_deref()
            .ok_or(RecordError::MissingField(Field::Method))?;
        let path = record
            .path
            .as_deref()
            .ok_or(RecordError::MissingField(Field::Path))?;
        let key = AggregationKey::new(method, self.templater.canonicalize(path));
        self.table.add(key);
        Ok(())
    }

    pub fn finish(self) -> FrequencyTable {
        self.table
    }
}

/// Count `records`, dropping the ones without a method or path.
pub fn aggregate<I>(records: I, templater: &PathTemplater) -> FrequencyTable
where
    I: IntoIterator<Item = LogRecord>,
{
    let mut aggregator = FrequencyAggregator::new(templater);
    for record in records {
        // incomplete records carry no key
        if let Err(err) = aggregator.push(&record) {
            debug!(error = %err, "dropping record");
        }
    }
    aggregator.finish()
}
