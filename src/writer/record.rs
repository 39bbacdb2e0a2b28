//! Record writers
//!
//! Persist per-unit results to machine-readable files when recording is enabled.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::{ArtifactHub, Writer, WriterSetup};
use crate::models::{Outcome, RunDetails, TestUnit};

/// Artifact category under which the JSON results file is published
pub const JSON_RESULTS_CATEGORY: &str = "JSONResults";

/// One unit's result as stored by the record writers
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultEntry {
    test_id: String,
    title: String,
    cycle: usize,
    outcome: Outcome,
    outcome_name: &'static str,
    outcome_reason: String,
    start_time: DateTime<Utc>,
    duration_secs: f64,
    test_dir: PathBuf,
    output_dir: PathBuf,
}

impl ResultEntry {
    fn from_unit(unit: &TestUnit) -> Self {
        let outcome = unit.current_outcome();
        Self {
            test_id: unit.descriptor().id_with_mode(),
            title: unit.descriptor().title.clone(),
            cycle: unit.cycle() + 1,
            outcome,
            outcome_name: outcome.name(),
            outcome_reason: unit.reason().to_string(),
            start_time: unit.started_at(),
            duration_secs: unit.elapsed().as_secs_f64(),
            test_dir: unit.descriptor().test_dir.clone(),
            output_dir: unit.output_dir().to_path_buf(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    run_details: &'a RunDetails,
    start_time: DateTime<Utc>,
    results: &'a [ResultEntry],
}

/// Writes every result, with the run details, to one JSON file at cleanup
pub struct JsonResultsWriter {
    path: PathBuf,
    run_details: RunDetails,
    started_at: DateTime<Utc>,
    results: Vec<ResultEntry>,
    artifacts: Option<ArtifactHub>,
}

impl JsonResultsWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            run_details: RunDetails::default(),
            started_at: Utc::now(),
            results: Vec::new(),
            artifacts: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Writer for JsonResultsWriter {
    fn name(&self) -> &str {
        "JsonResultsWriter"
    }

    fn setup(&mut self, setup: &WriterSetup) -> Result<()> {
        self.run_details = setup.run_details.clone();
        self.started_at = setup.started_at;
        self.artifacts = Some(setup.artifacts.clone());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        Ok(())
    }

    fn process_result(&mut self, unit: &TestUnit) -> Result<()> {
        self.results.push(ResultEntry::from_unit(unit));
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        let report = JsonReport {
            run_details: &self.run_details,
            start_time: self.started_at,
            results: &self.results,
        };
        let content =
            serde_json::to_string_pretty(&report).context("Failed to serialize results")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write results: {}", self.path.display()))?;

        if let Some(artifacts) = &self.artifacts {
            artifacts.publish(&self.path, JSON_RESULTS_CATEGORY);
        }
        Ok(())
    }
}

/// Streams one CSV row per result as units complete
pub struct CsvResultsWriter {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
}

impl CsvResultsWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }
}

impl Writer for CsvResultsWriter {
    fn name(&self) -> &str {
        "CsvResultsWriter"
    }

    fn setup(&mut self, _setup: &WriterSetup) -> Result<()> {
        let mut writer = csv::Writer::from_path(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        writer.write_record([
            "id",
            "title",
            "cycle",
            "startTime",
            "duration",
            "outcome",
            "outcomeReason",
        ])?;
        self.writer = Some(writer);
        Ok(())
    }

    fn process_result(&mut self, unit: &TestUnit) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            anyhow::bail!("{} was not set up", self.path.display());
        };
        let entry = ResultEntry::from_unit(unit);
        let cycle = entry.cycle.to_string();
        let start = entry.start_time.to_rfc3339();
        let duration = format!("{:.3}", entry.duration_secs);
        writer.write_record([
            entry.test_id.as_str(),
            entry.title.as_str(),
            cycle.as_str(),
            start.as_str(),
            duration.as_str(),
            entry.outcome_name,
            entry.outcome_reason.as_str(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
