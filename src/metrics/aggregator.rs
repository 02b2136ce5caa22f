//! Trial aggregation
//!
//! Collects one [`MetricRow`] per measured trial and closes the table with a
//! synthetic average row.
//!
//! # Example
//!
//! ```
//! use dllama_bench::metrics::{MetricRow, TrialAggregator};
//!
//! let mut aggregator = TrialAggregator::new();
//! aggregator.add(MetricRow::from_values("Test 0", &[100.0, 60.0, 40.0]).unwrap()).unwrap();
//! aggregator.add(MetricRow::from_values("Test 1", &[120.0, 70.0, 50.0]).unwrap()).unwrap();
//!
//! let table = aggregator.finalize().unwrap();
//! assert_eq!(table.rows().len(), 3);
//! assert_eq!(table.average().values(), vec![110.0, 65.0, 45.0]);
//! ```

use super::{MetricRow, TrailerLayout};
use serde::Serialize;
use thiserror::Error;

/// Label of the synthetic average row
pub const AVERAGE_LABEL: &str = "Test Avg";

/// Aggregation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    /// `finalize` with no rows: the mean is undefined
    #[error("no successful trials to average")]
    Empty,

    /// A row's layout differs from the rows already added
    #[error("row '{label}' has a {found} trailer but this run uses {expected}")]
    MixedLayout {
        label: String,
        expected: TrailerLayout,
        found: TrailerLayout,
    },
}

/// Accumulates per-trial rows in trial order
#[derive(Debug, Default)]
pub struct TrialAggregator {
    layout: Option<TrailerLayout>,
    rows: Vec<MetricRow>,
}

impl TrialAggregator {
    /// Create an empty aggregator; the first row fixes the layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty aggregator that only accepts `layout` rows
    pub fn with_layout(layout: TrailerLayout) -> Self {
        Self {
            layout: Some(layout),
            rows: Vec::new(),
        }
    }

    /// Add one trial's row
    pub fn add(&mut self, row: MetricRow) -> Result<(), AggregateError> {
        let found = row.layout();
        match self.layout {
            Some(expected) if expected != found => {
                return Err(AggregateError::MixedLayout {
                    label: row.label,
                    expected,
                    found,
                });
            }
            Some(_) => {}
            None => self.layout = Some(found),
        }

        self.rows.push(row);
        Ok(())
    }

    /// Number of rows added so far
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Close the table with the column-wise mean of every added row
    pub fn finalize(self) -> Result<ReportTable, AggregateError> {
        let layout = match self.layout {
            Some(layout) if !self.rows.is_empty() => layout,
            _ => return Err(AggregateError::Empty),
        };

        let count = self.rows.len() as f64;
        let mut sums = vec![0.0; layout.line_count()];
        for row in &self.rows {
            for (sum, value) in sums.iter_mut().zip(row.values()) {
                *sum += value;
            }
        }
        let means: Vec<f64> = sums.iter().map(|sum| sum / count).collect();

        let average = MetricRow::from_values(AVERAGE_LABEL, &means).ok_or(AggregateError::Empty)?;

        let mut rows = self.rows;
        rows.push(average);

        Ok(ReportTable { layout, rows })
    }
}

/// Finalized report: trial rows followed by the average row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTable {
    layout: TrailerLayout,
    rows: Vec<MetricRow>,
}

impl ReportTable {
    /// Trailer layout shared by every row
    pub fn layout(&self) -> TrailerLayout {
        self.layout
    }

    /// All rows, average last
    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    /// Per-trial rows (everything but the average)
    pub fn trials(&self) -> &[MetricRow] {
        &self.rows[..self.rows.len() - 1]
    }

    /// The average row
    pub fn average(&self) -> &MetricRow {
        &self.rows[self.rows.len() - 1]
    }
}
