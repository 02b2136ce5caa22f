//! CSV latency report
//!
//! One header row, one row per measured trial, then the `Test Avg` row.
//! Same shape as a pandas `DataFrame.to_csv(index=False)` of the table, so the
//! plotting scripts read it unchanged:
//!
//! ```text
//! Test,Avg generation time(ms),Avg inference time(ms),Avg transfer time(ms)
//! Test 0,100.0,60.0,40.0
//! Test 1,120.0,70.0,50.0
//! Test Avg,110.0,65.0,45.0
//! ```

use crate::metrics::{MetricRow, ReportTable, TrailerLayout};
use crate::Result;
use anyhow::Context;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// CSV writer for the latency report
pub struct CsvWriter<W: Write> {
    out: W,
    layout: TrailerLayout,
}

impl CsvWriter<BufWriter<File>> {
    /// Create `path` and write the header row
    pub fn create(path: &Path, layout: TrailerLayout) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create report: {}", path.display()))?;
        Self::new(BufWriter::new(file), layout)
    }
}

impl<W: Write> CsvWriter<W> {
    /// Wrap a writer and emit the header row
    pub fn new(mut out: W, layout: TrailerLayout) -> Result<Self> {
        writeln!(out, "{}", header(layout))?;
        Ok(Self { out, layout })
    }

    /// Append one row
    pub fn append_row(&mut self, row: &MetricRow) -> Result<()> {
        if row.layout() != self.layout {
            anyhow::bail!(
                "row '{}' has a {} trailer but the report is {}",
                row.label,
                row.layout(),
                self.layout
            );
        }

        let mut line = escape_field(&row.label);
        for value in row.values() {
            // `{:?}` keeps the trailing `.0` on whole numbers (110.0, not 110)
            line.push_str(&format!(",{:?}", value));
        }
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    /// Flush and return the underlying writer
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Header row for `layout`
pub fn header(layout: TrailerLayout) -> String {
    let mut header = String::from("Test");
    for field in layout.fields() {
        header.push(',');
        header.push_str(field.column);
    }
    header
}

/// Write a finalized table to `path`
pub fn write_report(path: &Path, table: &ReportTable) -> Result<()> {
    let mut writer = CsvWriter::create(path, table.layout())?;
    for row in table.rows() {
        writer.append_row(row)?;
    }
    writer
        .finish()
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(())
}

fn escape_field(field: &str) -> String {
    if field.contains(|c| matches!(c, ',' | '"' | '\n')) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
