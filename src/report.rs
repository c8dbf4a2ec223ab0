//! Daily append-only CSV report (`spec.md` section 6, "Persisted state";
//! expanded in `SPEC_FULL.md` section 11). Not part of the core pipeline's
//! concurrency contract -- it is written once per completed packaging run,
//! off the hot path.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::Local;
use csv::Writer;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to open report file: {0}")]
    Open(#[source] std::io::Error),
    #[error("failed to write report row: {0}")]
    Write(#[source] csv::Error),
}

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    timestamp: String,
    part_type: &'a str,
    method: &'a str,
    target: u64,
    actual: u64,
    elapsed_seconds: f64,
    rate: f64,
    min_area: f64,
    max_area: f64,
    bg_var_threshold: f64,
    canny_low: i32,
    canny_high: i32,
}

pub struct RunSummary<'a> {
    pub part_type: &'a str,
    pub method: &'a str,
    pub target: u64,
    pub actual: u64,
    pub elapsed_seconds: f64,
    pub min_area: f64,
    pub max_area: f64,
    pub bg_var_threshold: f64,
    pub canny_low: i32,
    pub canny_high: i32,
}

/// Appends one row to the current day's report file, writing the header
/// exactly once per file (section 6).
pub fn append_run(reports_dir: &Path, summary: &RunSummary) -> Result<PathBuf, ReportError> {
    let date = Local::now().format("%Y%m%d").to_string();
    let path = reports_dir.join(format!("report_{date}.csv"));
    let file_exists = path.exists();

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(ReportError::Open)?;
    let mut writer = Writer::from_writer(file);

    let rate = if summary.elapsed_seconds > 0.0 {
        summary.actual as f64 / summary.elapsed_seconds
    } else {
        0.0
    };

    let row = ReportRow {
        timestamp: Local::now().to_rfc3339(),
        part_type: summary.part_type,
        method: summary.method,
        target: summary.target,
        actual: summary.actual,
        elapsed_seconds: summary.elapsed_seconds,
        rate,
        min_area: summary.min_area,
        max_area: summary.max_area,
        bg_var_threshold: summary.bg_var_threshold,
        canny_low: summary.canny_low,
        canny_high: summary.canny_high,
    };

    if !file_exists {
        writer.write_record(&[
            "timestamp",
            "part_type",
            "method",
            "target",
            "actual",
            "elapsed_seconds",
            "rate",
            "min_area",
            "max_area",
            "bg_var_threshold",
            "canny_low",
            "canny_high",
        ])
        .map_err(ReportError::Write)?;
    }
    writer.serialize(&row).map_err(ReportError::Write)?;
    writer.flush().map_err(|e| ReportError::Write(e.into()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn header_is_written_exactly_once_across_two_runs() {
        let dir = tempdir().unwrap();
        let summary = RunSummary {
            part_type: "widget",
            method: "gate-count",
            target: 100,
            actual: 100,
            elapsed_seconds: 12.5,
            min_area: 5.0,
            max_area: 5000.0,
            bg_var_threshold: 16.0,
            canny_low: 50,
            canny_high: 150,
        };
        let path1 = append_run(dir.path(), &summary).unwrap();
        let path2 = append_run(dir.path(), &summary).unwrap();
        assert_eq!(path1, path2);

        let content = std::fs::read_to_string(&path1).unwrap();
        let header_count = content.matches("part_type").count();
        assert_eq!(header_count, 1);
        assert_eq!(content.lines().count(), 3); // header + 2 rows
    }
}
