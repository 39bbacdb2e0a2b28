//! Test unit model
//!
//! A unit is one (descriptor, cycle) pair and owns everything recorded while it runs.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

use super::descriptor::TestDescriptor;
use super::outcome::Outcome;
use crate::logging::BufferedSink;

/// One execution of a descriptor within a cycle
#[derive(Debug)]
pub struct TestUnit {
    descriptor: Arc<TestDescriptor>,
    cycle: usize,
    output_dir: PathBuf,
    outcomes: Vec<Outcome>,
    reason: String,
    started_at: DateTime<Utc>,
    elapsed: Duration,
    console: Arc<BufferedSink>,
}

impl TestUnit {
    pub fn new(descriptor: Arc<TestDescriptor>, cycle: usize) -> Self {
        Self {
            descriptor,
            cycle,
            output_dir: PathBuf::new(),
            outcomes: Vec::new(),
            reason: String::new(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            console: Arc::new(BufferedSink::new(Level::INFO)),
        }
    }

    /// Use a console buffer capturing a different level
    pub fn with_console_level(mut self, level: Level) -> Self {
        self.console = Arc::new(BufferedSink::new(level));
        self
    }

    pub fn descriptor(&self) -> &TestDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Zero-based cycle index
    pub fn cycle(&self) -> usize {
        self.cycle
    }

    /// Id with mode, plus a cycle suffix when the run has several cycles
    pub fn display_id(&self, cycles: usize) -> String {
        let id = self.descriptor.id_with_mode();
        if cycles > 1 {
            format!("{} [CYCLE {:02}]", id, self.cycle + 1)
        } else {
            id
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub(crate) fn set_output_dir(&mut self, dir: PathBuf) {
        self.output_dir = dir;
    }

    /// All outcomes recorded so far, in insertion order
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// Append an outcome; the reason is kept if it explains a more severe outcome
    pub fn add_outcome(&mut self, outcome: Outcome, reason: impl Into<String>) {
        let reason = reason.into();
        let previous = self.current_outcome();
        let had_outcomes = !self.outcomes.is_empty();
        self.outcomes.push(outcome);

        if reason.is_empty() {
            return;
        }
        if !had_outcomes || outcome.is_more_severe_than(previous) || self.reason.is_empty() {
            self.reason = reason;
        }
    }

    /// Discard everything recorded so far and record exactly this outcome
    pub fn override_outcome(&mut self, outcome: Outcome, reason: impl Into<String>) {
        self.outcomes.clear();
        self.outcomes.push(outcome);
        self.reason = reason.into();
    }

    /// Most severe recorded outcome, or `NotVerified` when nothing was recorded
    pub fn current_outcome(&self) -> Outcome {
        self.outcomes
            .iter()
            .copied()
            .min_by_key(|o| o.severity_rank())
            .unwrap_or(Outcome::NotVerified)
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = reason.into();
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn mark_started(&mut self) {
        self.started_at = Utc::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    /// Buffered console output captured while the unit ran
    pub fn console(&self) -> &Arc<BufferedSink> {
        &self.console
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.output_dir.join(crate::output::RUN_LOG)
    }
}
