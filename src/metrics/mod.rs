//! Latency metrics
//!
//! The master prints a fixed trailer of summary lines when it finishes. This
//! module owns that contract ([`TrailerLayout`]), the per-trial row type
//! ([`MetricRow`]), extraction from raw output ([`extract`]) and aggregation
//! over trials ([`aggregator`]).
//!
//! # Trailer contract (version 1)
//!
//! Fields are identified by position only, in this order:
//!
//! | # | Field      | Master line                        | Layouts          |
//! |---|------------|------------------------------------|------------------|
//! | 0 | generation | `Avg Generation Time: 123.45 ms`   | basic, extended  |
//! | 1 | inference  | `Avg Inference Time:  100.00 ms`   | basic, extended  |
//! | 2 | transfer   | `Avg Transfer Time:   23.45 ms`    | basic, extended  |
//! | 3 | serial     | `Avg Serial Time:  40.00 ms`       | extended         |
//! | 4 | parallel   | `Avg Parallel Time:  60.00 ms`     | extended         |
//!
//! Changing the master's line order or count is a breaking change and must
//! bump [`TRAILER_FORMAT_VERSION`].

pub mod aggregator;
pub mod extract;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use aggregator::{AggregateError, ReportTable, TrialAggregator};
pub use extract::{extract, render_trailer, ExtractionError};

/// Version of the positional trailer contract
pub const TRAILER_FORMAT_VERSION: u32 = 1;

/// One trailer field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailerField {
    /// Short name used in errors and JSON
    pub name: &'static str,
    /// Label the master prints before the value
    pub master_label: &'static str,
    /// Report column header
    pub column: &'static str,
}

const FIELDS: [TrailerField; 5] = [
    TrailerField {
        name: "generation",
        master_label: "Avg Generation Time:",
        column: "Avg generation time(ms)",
    },
    TrailerField {
        name: "inference",
        master_label: "Avg Inference Time: ",
        column: "Avg inference time(ms)",
    },
    TrailerField {
        name: "transfer",
        master_label: "Avg Transfer Time:  ",
        column: "Avg transfer time(ms)",
    },
    TrailerField {
        name: "serial",
        master_label: "Avg Serial Time: ",
        column: "Avg serial time(ms)",
    },
    TrailerField {
        name: "parallel",
        master_label: "Avg Parallel Time: ",
        column: "Avg parallel time(ms)",
    },
];

/// Shape of the master's trailer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrailerLayout {
    /// generation / inference / transfer
    #[default]
    Basic,
    /// basic + serial / parallel
    Extended,
}

impl TrailerLayout {
    /// Number of trailer lines (K)
    pub fn line_count(self) -> usize {
        self.fields().len()
    }

    /// Fields in trailer order
    pub fn fields(self) -> &'static [TrailerField] {
        match self {
            TrailerLayout::Basic => &FIELDS[..3],
            TrailerLayout::Extended => &FIELDS[..],
        }
    }
}

impl fmt::Display for TrailerLayout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrailerLayout::Basic => write!(f, "basic"),
            TrailerLayout::Extended => write!(f, "extended"),
        }
    }
}

/// Serial / parallel split of inference time (extended trailer only)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParallelSplit {
    pub serial_time: f64,
    pub parallel_time: f64,
}

/// Latencies of one trial, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    /// Row label ("Test 0", ..., "Test Avg")
    pub label: String,
    pub generation_time: f64,
    pub inference_time: f64,
    pub transfer_time: f64,
    #[serde(flatten)]
    pub split: Option<ParallelSplit>,
}

impl MetricRow {
    /// Build a row from values in trailer order
    ///
    /// Returns `None` unless `values` has exactly 3 or 5 entries.
    pub fn from_values(label: impl Into<String>, values: &[f64]) -> Option<Self> {
        let split = match values.len() {
            3 => None,
            5 => Some(ParallelSplit {
                serial_time: values[3],
                parallel_time: values[4],
            }),
            _ => return None,
        };

        Some(Self {
            label: label.into(),
            generation_time: values[0],
            inference_time: values[1],
            transfer_time: values[2],
            split,
        })
    }

    /// Layout this row was extracted with
    pub fn layout(&self) -> TrailerLayout {
        if self.split.is_some() {
            TrailerLayout::Extended
        } else {
            TrailerLayout::Basic
        }
    }

    /// Values in trailer order
    pub fn values(&self) -> Vec<f64> {
        let mut values = vec![self.generation_time, self.inference_time, self.transfer_time];
        if let Some(split) = self.split {
            values.push(split.serial_time);
            values.push(split.parallel_time);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_line_counts() {
        assert_eq!(TrailerLayout::Basic.line_count(), 3);
        assert_eq!(TrailerLayout::Extended.line_count(), 5);
        assert_eq!(TrailerLayout::Extended.fields()[3].name, "serial");
    }

    #[test]
    fn test_row_from_values() {
        let row = MetricRow::from_values("Test 0", &[100.0, 60.0, 40.0]).unwrap();
        assert_eq!(row.layout(), TrailerLayout::Basic);
        assert_eq!(row.values(), vec![100.0, 60.0, 40.0]);

        let row = MetricRow::from_values("Test 0", &[100.0, 60.0, 40.0, 20.0, 40.0]).unwrap();
        assert_eq!(row.layout(), TrailerLayout::Extended);
        assert_eq!(row.split.unwrap().parallel_time, 40.0);

        assert!(MetricRow::from_values("bad", &[1.0, 2.0]).is_none());
        assert!(MetricRow::from_values("bad", &[1.0, 2.0, 3.0, 4.0]).is_none());
    }

    #[test]
    fn test_row_json_shape() {
        let row = MetricRow::from_values("Test 1", &[1.5, 2.5, 3.5]).unwrap();
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["label"], "Test 1");
        assert_eq!(json["generation_time"], 1.5);
        assert!(json.get("serial_time").is_none());

        let row = MetricRow::from_values("Test 1", &[1.5, 2.5, 3.5, 1.0, 1.5]).unwrap();
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["serial_time"], 1.0);
    }
}
