//! JSON run summary
//!
//! `summary.json` sits next to `latency.csv` and records how the numbers were
//! produced: host, timing, effective configuration (secrets are never
//! serialized), the exact commands, per-trial rows, and which trials or
//! workers failed.

use crate::config::Config;
use crate::metrics::{MetricRow, ReportTable, TrailerLayout, TRAILER_FORMAT_VERSION};
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        let micros = d.as_micros() as u64;
        let human = format_duration_human(d);
        Self { micros, human }
    }
}

/// Run information
#[derive(Debug, Clone, Serialize)]
pub struct JsonRunInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<JsonDuration>,
    pub trailer: TrailerLayout,
    pub trailer_format_version: u32,
    pub master_command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_command: Option<String>,
    pub config: Config,
}

/// A measured trial that produced no row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonFailedTrial {
    pub trial: usize,
    pub reason: String,
}

/// A worker launch that failed during a measured trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonWorkerFailure {
    pub trial: usize,
    pub host: String,
    pub reason: String,
}

/// Complete run summary
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_info: JsonRunInfo,
    pub output_dir: PathBuf,
    pub measured_trials: usize,
    pub rows: Vec<MetricRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<MetricRow>,
    pub failed_trials: Vec<JsonFailedTrial>,
    pub worker_failures: Vec<JsonWorkerFailure>,
}

impl RunSummary {
    /// Empty summary for a run that is about to start
    pub fn new(run_info: JsonRunInfo, output_dir: PathBuf, measured_trials: usize) -> Self {
        Self {
            run_info,
            output_dir,
            measured_trials,
            rows: Vec::new(),
            average: None,
            failed_trials: Vec::new(),
            worker_failures: Vec::new(),
        }
    }

    /// Fill rows and average from the finalized table
    pub fn set_report(&mut self, table: &ReportTable) {
        self.rows = table.trials().to_vec();
        self.average = Some(table.average().clone());
    }

    /// Record the end of the run
    pub fn finish(&mut self, end_time: DateTime<Local>, duration: Duration) {
        self.run_info.end_time = Some(end_time.to_rfc3339());
        self.run_info.duration = Some(JsonDuration::from_duration(duration));
    }

    /// Number of measured trials that produced a row
    pub fn successful_trials(&self) -> usize {
        self.rows.len()
    }
}

/// Build JsonRunInfo
pub fn build_run_info(
    hostname: Option<String>,
    start_time: DateTime<Local>,
    config: &Config,
    master_command: String,
    worker_command: Option<String>,
) -> JsonRunInfo {
    JsonRunInfo {
        hostname,
        start_time: start_time.to_rfc3339(),
        end_time: None,
        duration: None,
        trailer: config.run.trailer,
        trailer_format_version: TRAILER_FORMAT_VERSION,
        master_command,
        worker_command,
        config: config.clone(),
    }
}

/// Hostname of the machine running the master, if it can be determined
pub fn local_hostname() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}

/// Write JSON output to file
pub fn write_json_output(output_path: &Path, summary: &RunSummary, pretty: bool) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create summary file: {}", output_path.display()))?;
    let writer = BufWriter::new(file);

    if pretty {
        serde_json::to_writer_pretty(writer, summary)?;
    } else {
        serde_json::to_writer(writer, summary)?;
    }

    Ok(())
}

/// Format duration in human-readable format
fn format_duration_human(d: Duration) -> String {
    let micros = d.as_micros() as u64;

    if micros == 0 {
        return "0µs".to_string();
    }

    if micros < 1000 {
        format!("{}µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.3}ms", micros as f64 / 1000.0)
    } else if micros < 60_000_000 {
        format!("{:.3}s", micros as f64 / 1_000_000.0)
    } else if micros < 3_600_000_000 {
        format!("{:.2}m", micros as f64 / 60_000_000.0)
    } else {
        format!("{:.2}h", micros as f64 / 3_600_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TrialAggregator;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn summary(config: &Config) -> RunSummary {
        let start = Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let info = build_run_info(
            Some("bench-host".to_string()),
            start,
            config,
            "./main inference".to_string(),
            None,
        );
        RunSummary::new(info, PathBuf::from("/tmp/out"), 2)
    }

    #[test]
    fn test_format_duration_human() {
        assert_eq!(format_duration_human(Duration::ZERO), "0µs");
        assert_eq!(format_duration_human(Duration::from_micros(250)), "250µs");
        assert_eq!(format_duration_human(Duration::from_millis(1500)), "1.500s");
        assert_eq!(format_duration_human(Duration::from_secs(90)), "1.50m");
    }

    #[test]
    fn test_summary_contents() {
        let mut config = Config::default();
        config.cluster.ssh.password = Some("hunter2".to_string());

        let mut agg = TrialAggregator::new();
        agg.add(MetricRow::from_values("Test 0", &[100.0, 60.0, 40.0]).unwrap()).unwrap();
        agg.add(MetricRow::from_values("Test 1", &[120.0, 70.0, 50.0]).unwrap()).unwrap();
        let table = agg.finalize().unwrap();

        let mut summary = summary(&config);
        summary.set_report(&table);
        summary.failed_trials.push(JsonFailedTrial {
            trial: 2,
            reason: "missing trailer".to_string(),
        });
        summary.finish(Local::now(), Duration::from_secs(3));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.json");
        write_json_output(&path, &summary, true).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("hunter2"));

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["run_info"]["hostname"], "bench-host");
        assert_eq!(value["run_info"]["trailer"], "basic");
        assert_eq!(value["run_info"]["trailer_format_version"], 1);
        assert_eq!(value["run_info"]["duration"]["human"], "3.000s");
        assert!(value["run_info"].get("worker_command").is_none());
        assert_eq!(value["rows"].as_array().unwrap().len(), 2);
        assert_eq!(value["average"]["label"], "Test Avg");
        assert_eq!(value["average"]["generation_time"], 110.0);
        assert_eq!(value["failed_trials"][0]["trial"], 2);
        assert_eq!(summary.successful_trials(), 2);
    }

    #[test]
    fn test_summary_without_report_omits_average() {
        let summary = summary(&Config::default());
        let value = serde_json::to_value(&summary).unwrap();
        assert!(value.get("average").is_none());
        assert!(value["run_info"].get("end_time").is_none());
    }
}
