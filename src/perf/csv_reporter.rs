//! CSV performance reporter

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::{PerformanceReporter, PerformanceResult};
use crate::models::{RunDetails, TestUnit};

const HEADER: [&str; 9] = [
    "resultKey",
    "testId",
    "value",
    "unit",
    "biggerIsBetter",
    "tolerance",
    "startTime",
    "cycle",
    "details",
];

/// Appends one row per reported value to a CSV file
pub struct CsvPerformanceReporter {
    path: PathBuf,
    writer: Mutex<Option<csv::Writer<File>>>,
}

impl CsvPerformanceReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PerformanceReporter for CsvPerformanceReporter {
    fn name(&self) -> &str {
        "CsvPerformanceReporter"
    }

    fn setup(&self, _run_details: &RunDetails) -> Result<()> {
        let existing = self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        if !existing {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(writer);
        Ok(())
    }

    fn report_result(&self, unit: &TestUnit, result: &PerformanceResult) -> Result<()> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = guard.as_mut() else {
            anyhow::bail!("{} was not set up", self.path.display());
        };

        let details: Vec<String> = result
            .details
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let value = result.value.to_string();
        let bigger = result.unit.bigger_is_better.to_string();
        let tolerance = result.tolerance.to_string();
        let start = unit.started_at().to_rfc3339();
        let cycle = (unit.cycle() + 1).to_string();
        let details = details.join(";");
        let test_id = unit.descriptor().id_with_mode();

        writer.write_record([
            result.key.as_str(),
            test_id.as_str(),
            value.as_str(),
            result.unit.name.as_str(),
            bigger.as_str(),
            tolerance.as_str(),
            start.as_str(),
            cycle.as_str(),
            details.as_str(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        if let Some(mut writer) = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestDescriptor;
    use crate::perf::PerformanceUnit;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_concurrent_reports_all_land() {
        let dir = tempdir().unwrap();
        let reporter = Arc::new(CsvPerformanceReporter::new(dir.path().join("perf.csv")));
        reporter.setup(&RunDetails::default()).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let reporter = reporter.clone();
                std::thread::spawn(move || {
                    let unit =
                        TestUnit::new(Arc::new(TestDescriptor::new(format!("P_{i}"), "/t")), 0);
                    let result = PerformanceResult::new(
                        "throughput",
                        100.0 + i as f64,
                        PerformanceUnit::per_second(),
                    )
                    .with_detail("threads", "4");
                    reporter.report_result(&unit, &result).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        reporter.cleanup().unwrap();

        let mut reader = csv::Reader::from_path(reporter.path()).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| &r[0] == "throughput" && &r[8] == "threads=4"));
    }

    #[test]
    fn test_appends_without_repeating_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("perf.csv");
        let unit = TestUnit::new(Arc::new(TestDescriptor::new("P", "/t")), 0);
        let result = PerformanceResult::new("latency", 0.25, PerformanceUnit::seconds());

        for _ in 0..2 {
            let reporter = CsvPerformanceReporter::new(&path);
            reporter.setup(&RunDetails::default()).unwrap();
            reporter.report_result(&unit, &result).unwrap();
            reporter.cleanup().unwrap();
        }

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.records().count(), 2);
    }
}
