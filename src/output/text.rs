//! Human-readable text output

use crate::config::Config;
use crate::metrics::{MetricRow, ReportTable};
use crate::output::json::RunSummary;
use std::fmt::Write as _;

const RULE: &str = "═══════════════════════════════════════════════════════════";

/// Print the run configuration before the first trial
pub fn print_run_header(config: &Config, master_command: &str, worker_command: Option<&str>) {
    println!("{}", RULE);
    println!("               DISTRIBUTED INFERENCE BENCHMARK");
    println!("{}", RULE);
    println!();
    println!("Model:        {}", config.inference.model);
    println!("Threads:      {}", config.inference.threads);
    println!("Steps:        {}", config.inference.steps);
    if config.cluster.workers.is_empty() {
        println!("Workers:      none (local only)");
    } else {
        println!("Workers:      {}", config.cluster.workers.join(", "));
    }
    println!(
        "Trials:       {} warm-up, {} measured",
        config.run.warm_up, config.run.loop_count
    );
    println!("Trailer:      {}", config.run.trailer);
    println!();
    println!("Master:       {}", master_command);
    if let Some(worker) = worker_command {
        println!("Worker:       {}", worker);
    }
    println!();
}

/// Print the results table and failure summary
pub fn print_results(table: &ReportTable, summary: &RunSummary) {
    println!("{}", RULE);
    println!("                    TEST RESULTS");
    println!("{}", RULE);
    println!();
    print!("{}", render_table(table));
    println!();

    println!(
        "Trials:       {}/{} succeeded",
        summary.successful_trials(),
        summary.measured_trials
    );
    for failed in &summary.failed_trials {
        println!("  Test {}: {}", failed.trial, failed.reason);
    }
    if !summary.worker_failures.is_empty() {
        println!("Worker failures: {}", summary.worker_failures.len());
        for failure in &summary.worker_failures {
            println!("  Test {} {}: {}", failure.trial, failure.host, failure.reason);
        }
    }
    if let Some(duration) = &summary.run_info.duration {
        println!("Elapsed Time: {}", duration.human);
    }
    println!("Output:       {}", summary.output_dir.display());
    println!("{}", RULE);
}

/// Fixed-width table: one row per trial, average last
pub fn render_table(table: &ReportTable) -> String {
    let fields = table.layout().fields();
    let label_width = table
        .rows()
        .iter()
        .map(|r| r.label.len())
        .max()
        .unwrap_or(0)
        .max(5);

    let mut out = String::new();
    let _ = write!(out, "{:<width$}", "", width = label_width);
    for field in fields {
        let _ = write!(out, "  {:>width$}", field.column, width = field.column.len());
    }
    out.push('\n');

    let trials = table.trials();
    for row in trials {
        push_row(&mut out, row, label_width, table);
    }
    let _ = writeln!(
        out,
        "{}",
        "─".repeat(label_width + fields.iter().map(|f| f.column.len() + 2).sum::<usize>())
    );
    push_row(&mut out, table.average(), label_width, table);
    out
}

fn push_row(out: &mut String, row: &MetricRow, label_width: usize, table: &ReportTable) {
    let _ = write!(out, "{:<width$}", row.label, width = label_width);
    for (field, value) in table.layout().fields().iter().zip(row.values()) {
        let _ = write!(out, "  {:>width$.2}", value, width = field.column.len());
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TrialAggregator;

    #[test]
    fn test_render_table() {
        let mut agg = TrialAggregator::new();
        agg.add(MetricRow::from_values("Test 0", &[100.0, 60.0, 40.0]).unwrap()).unwrap();
        agg.add(MetricRow::from_values("Test 1", &[120.0, 70.0, 50.0]).unwrap()).unwrap();
        let rendered = render_table(&agg.finalize().unwrap());

        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("Avg generation time(ms)"));
        assert!(lines[1].starts_with("Test 0"));
        assert!(lines[1].contains("100.00"));
        assert!(lines[3].starts_with('─'));
        assert!(lines[4].starts_with("Test Avg"));
        assert!(lines[4].contains("110.00"));
        assert!(lines[4].contains("45.00"));
    }

    #[test]
    fn test_render_extended_table() {
        let mut agg = TrialAggregator::new();
        agg.add(MetricRow::from_values("Test 0", &[100.0, 60.0, 40.0, 10.0, 50.0]).unwrap())
            .unwrap();
        let rendered = render_table(&agg.finalize().unwrap());
        assert!(rendered.lines().next().unwrap().contains("Avg parallel time(ms)"));
        assert!(rendered.lines().last().unwrap().contains("50.00"));
    }
}
