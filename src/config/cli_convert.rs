//! CLI to Config conversion utilities

use crate::config::{cli, FailurePolicy};
use crate::metrics::TrailerLayout;
use anyhow::{Context, Result};
use std::time::Duration;

/// Parse a duration string (e.g., "500ms", "5s", "10m", "1h") into a `Duration`
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    parse_duration_ms(s).map(Duration::from_millis)
}

/// Parse a duration string into whole milliseconds
pub fn parse_duration_ms(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier_ms) = if s.ends_with("ms") {
        (s.trim_end_matches("ms"), 1u64)
    } else if s.ends_with("sec") || s.ends_with('s') {
        (s.trim_end_matches("sec").trim_end_matches('s'), 1000)
    } else if s.ends_with("min") || s.ends_with('m') {
        (s.trim_end_matches("min").trim_end_matches('m'), 60_000)
    } else if s.ends_with("hr") || s.ends_with('h') {
        (s.trim_end_matches("hr").trim_end_matches('h'), 3_600_000)
    } else {
        (s.as_str(), 1000)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration format: {}", s))?;

    num.checked_mul(multiplier_ms)
        .with_context(|| format!("Duration out of range: {}", s))
}

/// Convert CLI TrailerArg to config TrailerLayout
pub fn convert_trailer(arg: cli::TrailerArg) -> TrailerLayout {
    match arg {
        cli::TrailerArg::Basic => TrailerLayout::Basic,
        cli::TrailerArg::Extended => TrailerLayout::Extended,
    }
}

/// Convert CLI FailurePolicyArg to config FailurePolicy
pub fn convert_failure_policy(arg: cli::FailurePolicyArg) -> FailurePolicy {
    match arg {
        cli::FailurePolicyArg::Skip => FailurePolicy::Skip,
        cli::FailurePolicyArg::Abort => FailurePolicy::Abort,
    }
}
