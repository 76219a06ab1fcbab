//! Sample pivoting
//!
//! Turns one-sample-per-record data into a wide table: one row per rounded
//! local timestamp, one column per point identifier. When several samples for
//! the same point land on the same rounded timestamp, the first one seen is
//! kept, so callers must feed windows in chronological order.

use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::rounding::{round_to_interval, SampleInterval};
use crate::sample::RawSample;

/// Values of all points at one rounded timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct PivotRow {
    pub local_time: NaiveDateTime,
    pub values: BTreeMap<String, Value>,
}

impl PivotRow {
    pub fn get(&self, point_identifier: &str) -> Option<&Value> {
        self.values.get(point_identifier)
    }
}

/// Wide table of one asset, rows ascending by time
#[derive(Debug, Clone, PartialEq)]
pub struct PivotTable {
    /// Point identifiers that have at least one value, sorted
    pub columns: Vec<String>,
    pub rows: Vec<PivotRow>,
}

impl PivotTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Incremental pivot builder
pub struct Pivoter {
    interval: SampleInterval,
    rows: BTreeMap<NaiveDateTime, BTreeMap<String, Value>>,
    columns: BTreeSet<String>,
    duplicates: usize,
}

impl Pivoter {
    pub fn new(interval: SampleInterval) -> Self {
        Self {
            interval,
            rows: BTreeMap::new(),
            columns: BTreeSet::new(),
            duplicates: 0,
        }
    }

    /// Add samples in encounter order, returning how many were kept.
    ///
    /// Null values count as missing and never occupy a cell.
    pub fn add_samples<I>(&mut self, samples: I) -> usize
    where
        I: IntoIterator<Item = RawSample>,
    {
        let mut kept = 0;
        for sample in samples {
            if sample.value.is_null() {
                continue;
            }

            let rounded = round_to_interval(sample.local_time, self.interval);
            let row = self.rows.entry(rounded).or_default();
            if row.contains_key(&sample.point_identifier) {
                self.duplicates += 1;
                continue;
            }

            self.columns.insert(sample.point_identifier.clone());
            row.insert(sample.point_identifier, sample.value);
            kept += 1;
        }
        kept
    }

    /// Samples dropped because an earlier one already filled the cell
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Finish the table, or `None` when nothing was added
    pub fn finish(self) -> Option<PivotTable> {
        if self.rows.is_empty() {
            debug!("No samples to pivot");
            return None;
        }

        info!(
            "Pivoted into {} rows x {} points ({} duplicates dropped)",
            self.rows.len(),
            self.columns.len(),
            self.duplicates
        );

        let rows = self
            .rows
            .into_iter()
            .map(|(local_time, values)| PivotRow { local_time, values })
            .collect();

        Some(PivotTable {
            columns: self.columns.into_iter().collect(),
            rows,
        })
    }
}

/// Pivot the sample batches of successful windows, given in window order.
///
/// Returns `None` when no window produced a sample.
pub fn pivot(samples_by_window: Vec<Vec<RawSample>>, interval: SampleInterval) -> Option<PivotTable> {
    let mut pivoter = Pivoter::new(interval);
    for samples in samples_by_window {
        pivoter.add_samples(samples);
    }
    pivoter.finish()
}
