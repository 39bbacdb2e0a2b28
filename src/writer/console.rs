//! Console writers
//!
//! Progress after each unit, CI-friendly failure annotations, and the final
//! run summary.

use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use super::{ArtifactPublisher, ConsoleOut, Writer, WriterKind, WriterSetup};
use crate::models::{CycleTally, Outcome, RunDetails, TestUnit, UnitRecord, PRECEDENCE};
use crate::output::{format_duration, OutcomeFormatter};

/// Annotation line used when no custom format is configured
pub const DEFAULT_ANNOTATION_FORMAT: &str =
    "@testFile@:@testFileLine@: @category@: @outcome@ - @outcomeReason@ (@testIdAndCycle@)";

const RECENT_FAILURES: usize = 5;

fn display_id(unit: &TestUnit, cycles: usize) -> String {
    unit.display_id(cycles)
}

/// Counts like `3 PASSED, 1 NOT VERIFIED`, filtered by `include`
fn outcome_counts(counts: &HashMap<Outcome, usize>, include: impl Fn(Outcome) -> bool) -> String {
    PRECEDENCE
        .iter()
        .copied()
        .filter(|o| include(*o))
        .filter_map(|o| {
            counts
                .get(&o)
                .filter(|n| **n > 0)
                .map(|n| format!("{n} {o}"))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Logs a progress report after every completed unit
pub struct ConsoleProgressWriter {
    out: ConsoleOut,
    total: usize,
    cycles: usize,
    workers: usize,
    started: Instant,
    counts: HashMap<Outcome, usize>,
    recent_failures: Vec<String>,
    in_progress: BTreeSet<String>,
}

impl ConsoleProgressWriter {
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }

    pub fn with_output(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Box::new(out),
            total: 0,
            cycles: 1,
            workers: 1,
            started: Instant::now(),
            counts: HashMap::new(),
            recent_failures: Vec::new(),
            in_progress: BTreeSet::new(),
        }
    }
}

impl Default for ConsoleProgressWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer for ConsoleProgressWriter {
    fn name(&self) -> &str {
        "ConsoleProgressWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Progress
    }

    fn setup(&mut self, setup: &WriterSetup) -> Result<()> {
        self.total = setup.total_units;
        self.cycles = setup.cycles;
        self.workers = setup.workers;
        self.started = Instant::now();
        Ok(())
    }

    fn process_test_starting(&mut self, unit: &TestUnit) -> Result<()> {
        self.in_progress.insert(display_id(unit, self.cycles));
        Ok(())
    }

    fn process_result(&mut self, unit: &TestUnit) -> Result<()> {
        if self.total <= 1 {
            return Ok(());
        }
        let id = display_id(unit, self.cycles);
        self.in_progress.remove(&id);

        let outcome = unit.current_outcome();
        *self.counts.entry(outcome).or_default() += 1;
        if outcome.is_failure() {
            let mut line = format!("{outcome}: {id}");
            if !unit.reason().is_empty() {
                line.push_str(": ");
                line.push_str(unit.reason());
            }
            self.recent_failures.push(line);
            if self.recent_failures.len() > RECENT_FAILURES {
                self.recent_failures.remove(0);
            }
        }

        let executed: usize = self.counts.values().sum();
        let failed: usize = self
            .counts
            .iter()
            .filter(|(o, _)| o.is_failure())
            .map(|(_, n)| n)
            .sum();
        let elapsed = self.started.elapsed().as_secs();
        let (amount, unit_name) = if elapsed > 60 {
            (elapsed / 60, "minutes")
        } else {
            (elapsed, "seconds")
        };

        writeln!(
            self.out,
            "Test progress: completed {}/{} = {:.1}% of tests in {} {}",
            executed,
            self.total,
            100.0 * executed as f64 / self.total as f64,
            amount,
            unit_name
        )?;
        let passed = outcome_counts(&self.counts, |o| !o.is_failure());
        if !passed.is_empty() {
            writeln!(
                self.out,
                "   {} ({:.1}%)",
                passed,
                100.0 * (executed - failed) as f64 / executed as f64
            )?;
        }
        let failures = outcome_counts(&self.counts, Outcome::is_failure);
        if !failures.is_empty() {
            writeln!(self.out, "   {failures}")?;
        }
        if !self.recent_failures.is_empty() {
            writeln!(self.out, "Recent failures: ")?;
            for failure in &self.recent_failures {
                writeln!(self.out, "   {failure}")?;
            }
        }
        if self.workers > 1 && !self.in_progress.is_empty() {
            let executing: Vec<_> = self.in_progress.iter().map(String::as_str).collect();
            writeln!(self.out, "Currently executing: {}", executing.join(", "))?;
        }
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Prints one annotation line per failure, for CI log parsers
///
/// Enabled only when `SYSTEST_CONSOLE_FAILURE_ANNOTATIONS` is set to
/// anything other than `false`.
pub struct ConsoleFailureAnnotationsWriter {
    out: ConsoleOut,
    enabled: bool,
    format: String,
    cycles: usize,
}

impl ConsoleFailureAnnotationsWriter {
    pub fn new(enabled: bool) -> Self {
        Self::with_output(enabled, io::stdout())
    }

    pub fn with_output(enabled: bool, out: impl Write + Send + 'static) -> Self {
        Self {
            out: Box::new(out),
            enabled,
            format: DEFAULT_ANNOTATION_FORMAT.to_string(),
            cycles: 1,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    fn escape(s: &str) -> String {
        s.replace('\r', "").replace('\n', "; ")
    }
}

impl Writer for ConsoleFailureAnnotationsWriter {
    fn name(&self) -> &str {
        "ConsoleFailureAnnotationsWriter"
    }

    fn is_enabled(&self, _record: bool) -> bool {
        self.enabled
    }

    fn setup(&mut self, setup: &WriterSetup) -> Result<()> {
        self.cycles = setup.cycles;
        Ok(())
    }

    fn process_result(&mut self, unit: &TestUnit) -> Result<()> {
        let outcome = unit.current_outcome();
        let category = if outcome.is_failure() {
            "error"
        } else if outcome == Outcome::NotVerified {
            "warning"
        } else {
            return Ok(());
        };

        let reason = if unit.reason().is_empty() {
            "(no outcome reason)"
        } else {
            unit.reason()
        };
        let test_file = unit.descriptor().test_file();
        let run_log = unit.run_log_path();

        let line = self
            .format
            .replace("@testFile@", &Self::escape(&test_file.display().to_string()))
            .replace("@testFileLine@", "0")
            .replace("@runLogFile@", &Self::escape(&run_log.display().to_string()))
            .replace("@category@", category)
            .replace("@outcome@", outcome.name())
            .replace("@outcomeReason@", &Self::escape(reason))
            .replace(
                "@testIdAndCycle@",
                &Self::escape(&display_id(unit, self.cycles)),
            );
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Artifacts published during the run, listed by the summary
#[derive(Debug, Default)]
struct ArtifactList {
    entries: Mutex<Vec<(PathBuf, String)>>,
}

impl ArtifactPublisher for ArtifactList {
    fn publish_artifact(&self, path: &Path, category: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((path.to_path_buf(), category.to_string()));
    }
}

/// Prints the end-of-run summary; always the last console output of a run
pub struct ConsoleSummaryWriter {
    out: ConsoleOut,
    formatter: OutcomeFormatter,
    total: usize,
    workers: usize,
    started: Instant,
    additive_secs: f64,
    run_details: RunDetails,
    cycles: Vec<CycleTally>,
    counts: HashMap<Outcome, usize>,
    artifacts: Arc<ArtifactList>,
    show_run_details: bool,
    show_test_id_list: bool,
}

impl ConsoleSummaryWriter {
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }

    pub fn with_output(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Box::new(out),
            formatter: OutcomeFormatter::new(),
            total: 0,
            workers: 1,
            started: Instant::now(),
            additive_secs: 0.0,
            run_details: RunDetails::default(),
            cycles: Vec::new(),
            counts: HashMap::new(),
            artifacts: Arc::new(ArtifactList::default()),
            show_run_details: true,
            show_test_id_list: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.formatter = self.formatter.no_color();
        self
    }

    pub fn show_run_details(mut self, show: bool) -> Self {
        self.show_run_details = show;
        self
    }

    pub fn show_test_id_list(mut self, show: bool) -> Self {
        self.show_test_id_list = show;
        self
    }

    /// Summary text for every outcome accepted by `include`
    fn outcome_section(&self, include: impl Fn(Outcome) -> bool) -> Vec<String> {
        let mut lines = Vec::new();
        let multi_cycle = self.cycles.len() > 1;
        for tally in &self.cycles {
            let prefix = if multi_cycle {
                format!("[CYCLE {}] ", tally.cycle + 1)
            } else {
                String::new()
            };
            for outcome in PRECEDENCE.iter().copied().filter(|o| include(*o)) {
                let mut records: Vec<&UnitRecord> = tally
                    .results
                    .get(&outcome)
                    .map(|r| r.iter().collect())
                    .unwrap_or_default();
                // similar failures read better together
                records.sort_by(|a, b| a.reason.cmp(&b.reason).then(a.test_dir.cmp(&b.test_dir)));

                for record in records {
                    lines.push(format!(
                        "  {}{}: {}",
                        prefix,
                        self.formatter.outcome(outcome),
                        record.id
                    ));
                    if !record.reason.is_empty() {
                        lines.push(format!("      {}", record.reason));
                    }
                    if !record.output_dir.starts_with(&record.test_dir) {
                        lines.push(format!("      {}", record.test_dir.display()));
                    }
                    lines.push(format!("      {}", record.output_dir.display()));
                }
            }
        }
        lines
    }

    fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let executed: usize = self.counts.values().sum();
        let detailed = self.total > 1;

        if detailed {
            lines.push(format!(
                "Completed test run at:  {}",
                chrono::Local::now().format("%A %Y-%m-%d %H:%M:%S %Z")
            ));
            let absolute = format_duration(self.started.elapsed());
            if self.workers > 1 {
                lines.push(format!("Total test duration (absolute): {absolute}"));
                lines.push(format!(
                    "Total test duration (additive): {:.2} secs",
                    self.additive_secs
                ));
            } else {
                lines.push(format!("Total test duration:    {absolute}"));
            }
            lines.push(String::new());
        }

        if detailed && self.show_run_details && !self.run_details.is_empty() {
            lines.push("Run details:".to_string());
            for (key, value) in self.run_details.iter() {
                lines.push(format!(" {:>23}{}", format!("{key}: "), value));
            }
            lines.push(String::new());
        }

        if detailed && executed > 0 {
            let failed: usize = self
                .counts
                .iter()
                .filter(|(o, _)| o.is_failure())
                .map(|(_, n)| n)
                .sum();
            let failures = outcome_counts(&self.counts, Outcome::is_failure);
            if !failures.is_empty() {
                lines.push(format!(
                    "Failure outcomes: {} ({:.1}%)",
                    failures,
                    100.0 * failed as f64 / executed as f64
                ));
            }
            let successes = outcome_counts(&self.counts, |o| !o.is_failure());
            if !successes.is_empty() {
                lines.push(format!("Success outcomes: {successes}"));
            }
            lines.push(String::new());
        }

        if self.counts.get(&Outcome::NotVerified).copied().unwrap_or(0) > 0 {
            lines.push("Summary of not verified outcomes:".to_string());
            lines.extend(self.outcome_section(|o| o == Outcome::NotVerified));
            lines.push(String::new());
        }

        if self.counts.get(&Outcome::Inspect).copied().unwrap_or(0) > 0 {
            lines.push("Summary of inspect outcomes: ".to_string());
            lines.extend(self.outcome_section(|o| o == Outcome::Inspect));
            lines.push(String::new());
        }

        lines.push("Summary of failures: ".to_string());
        let failures = self.outcome_section(Outcome::is_failure);
        if failures.is_empty() {
            lines.push("\tTHERE WERE NO FAILURES".to_string());
        } else {
            lines.extend(failures);
        }
        lines.push(String::new());

        if detailed && self.show_test_id_list {
            let mut failed_ids: Vec<&str> = Vec::new();
            for tally in &self.cycles {
                for (outcome, records) in &tally.results {
                    if !outcome.is_failure() {
                        continue;
                    }
                    for record in records {
                        if !failed_ids.contains(&record.id.as_str()) {
                            failed_ids.push(&record.id);
                        }
                    }
                }
            }
            if !failed_ids.is_empty() {
                lines.push("List of failed test ids:".to_string());
                lines.push(failed_ids.join(" "));
                lines.push(String::new());
            }
        }

        let artifacts = self
            .artifacts
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if !artifacts.is_empty() {
            lines.push("Published artifacts:".to_string());
            for (path, category) in artifacts {
                lines.push(format!("  {}: {}", category, path.display()));
            }
            lines.push(String::new());
        }

        lines
    }
}

impl Default for ConsoleSummaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer for ConsoleSummaryWriter {
    fn name(&self) -> &str {
        "ConsoleSummaryWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Summary
    }

    fn setup(&mut self, setup: &WriterSetup) -> Result<()> {
        self.total = setup.total_units;
        self.workers = setup.workers;
        self.started = Instant::now();
        self.run_details = setup.run_details.clone();
        self.cycles = (0..setup.cycles).map(CycleTally::new).collect();
        Ok(())
    }

    fn process_result(&mut self, unit: &TestUnit) -> Result<()> {
        let outcome = unit.current_outcome();
        *self.counts.entry(outcome).or_default() += 1;
        self.additive_secs += unit.elapsed().as_secs_f64();
        if let Some(tally) = self.cycles.get_mut(unit.cycle()) {
            tally.record(outcome, UnitRecord::from_unit(unit));
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        for line in self.summary_lines() {
            writeln!(self.out, "{line}")?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn artifact_publisher(&self) -> Option<Arc<dyn ArtifactPublisher>> {
        Some(self.artifacts.clone())
    }
}
