//! Result aggregation
//!
//! Completed units are reported here from whichever worker ran them. Replay,
//! writer notification and tallying of one unit happen under the console lock,
//! so an observer sees a unit's output and its result together.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::logging::{LogRouter, ReplayPolicy};
use crate::models::{CycleTally, RunReport, TestUnit, UnitRecord};
use crate::writer::{TestOutputVisitor, Writer, WriterSetup};

struct AggregatorState {
    writers: Vec<Box<dyn Writer>>,
    tallies: Vec<CycleTally>,
    errors: Vec<String>,
    notified: usize,
}

/// Collects outcomes and fans them out to writers
pub struct ResultAggregator {
    router: Arc<LogRouter>,
    replay: ReplayPolicy,
    state: Mutex<AggregatorState>,
    remaining: AtomicUsize,
    closed: AtomicBool,
}

impl ResultAggregator {
    pub fn new(
        router: Arc<LogRouter>,
        replay: ReplayPolicy,
        writers: Vec<Box<dyn Writer>>,
        cycles: usize,
        total: usize,
    ) -> Self {
        Self {
            router,
            replay,
            state: Mutex::new(AggregatorState {
                writers,
                tallies: (0..cycles.max(1)).map(CycleTally::new).collect(),
                errors: Vec::new(),
                notified: 0,
            }),
            remaining: AtomicUsize::new(total),
            closed: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set up every writer; a writer whose setup fails takes no further part
    pub fn setup_writers(&self, setup: &WriterSetup) {
        let mut state = self.state();
        let mut failed = Vec::new();
        let mut ready = Vec::with_capacity(state.writers.len());
        for mut writer in state.writers.drain(..) {
            match writer.setup(setup) {
                Ok(()) => {
                    if let Some(publisher) = writer.artifact_publisher() {
                        setup.artifacts.register(publisher);
                    }
                    ready.push(writer);
                }
                Err(e) => {
                    warn!("Writer {} setup failed: {:#}", writer.name(), e);
                    failed.push(format!("Writer {} setup failed: {:#}", writer.name(), e));
                }
            }
        }
        state.writers = ready;
        state.errors.extend(failed);
    }

    /// Visitors offered each output file before it is purged
    pub fn output_visitors(&self) -> Vec<Arc<dyn TestOutputVisitor>> {
        self.state()
            .writers
            .iter()
            .filter_map(|w| w.output_visitor())
            .collect()
    }

    pub fn unit_starting(&self, unit: &TestUnit) {
        let _console = self.router.lock_console();
        let mut state = self.state();
        let state = &mut *state;
        for writer in state.writers.iter_mut() {
            if let Err(e) = writer.process_test_starting(unit) {
                state.errors.push(format!(
                    "Writer {} failed to process start of {}: {:#}",
                    writer.name(),
                    unit.id(),
                    e
                ));
            }
        }
    }

    /// Replay, notify writers and tally a completed unit
    pub fn report(&self, unit: &TestUnit) {
        let mut console = self.router.lock_console();
        if self.closed.load(Ordering::SeqCst) {
            debug!("Discarding late result of {}", unit.id());
            return;
        }

        if let Err(e) = LogRouter::replay_locked(&mut console, unit, self.replay) {
            warn!("Failed to replay output of {}: {}", unit.id(), e);
        }

        let mut state = self.state();
        let state = &mut *state;
        for writer in state.writers.iter_mut() {
            if let Err(e) = writer.process_result(unit) {
                state.errors.push(format!(
                    "Writer {} failed to process {}: {:#}",
                    writer.name(),
                    unit.id(),
                    e
                ));
            }
        }

        let cycle = unit.cycle();
        while state.tallies.len() <= cycle {
            let next = state.tallies.len();
            state.tallies.push(CycleTally::new(next));
        }
        state.tallies[cycle].record(unit.current_outcome(), UnitRecord::from_unit(unit));
        state.notified += 1;
        let _ = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Clean up every writer; later reports are discarded
    pub fn cleanup_writers(&self) {
        let _console = self.router.lock_console();
        self.closed.store(true, Ordering::SeqCst);
        let mut state = self.state();
        let state = &mut *state;
        for writer in state.writers.iter_mut() {
            if let Err(e) = writer.cleanup() {
                warn!("Writer {} cleanup failed: {:#}", writer.name(), e);
                state
                    .errors
                    .push(format!("Writer {} cleanup failed: {:#}", writer.name(), e));
            }
        }
    }

    /// Units not yet reported
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Units reported so far
    pub fn notified(&self) -> usize {
        self.state().notified
    }

    pub fn take_errors(&self) -> Vec<String> {
        std::mem::take(&mut self.state().errors)
    }

    pub fn run_report(&self, duration: Duration) -> RunReport {
        RunReport::new(self.state().tallies.clone(), duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{Console, LogLine, LogSink, SharedBuffer};
    use crate::models::{Outcome, RunDetails, TestDescriptor};
    use crate::writer::ArtifactHub;
    use anyhow::bail;
    use chrono::Utc;
    use tracing::Level;

    struct Recording {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
        fail_results: bool,
    }

    impl Writer for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn process_result(&mut self, unit: &TestUnit) -> anyhow::Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, unit.id()));
            if self.fail_results {
                bail!("disk full");
            }
            Ok(())
        }
    }

    struct FailingSetup;

    impl Writer for FailingSetup {
        fn name(&self) -> &str {
            "failing-setup"
        }

        fn setup(&mut self, _setup: &WriterSetup) -> anyhow::Result<()> {
            bail!("cannot open output")
        }

        fn process_result(&mut self, _unit: &TestUnit) -> anyhow::Result<()> {
            panic!("never called after a failed setup");
        }
    }

    fn finished(id: &str, cycle: usize, outcome: Outcome) -> TestUnit {
        let mut unit = TestUnit::new(Arc::new(TestDescriptor::new(id, "/t")), cycle);
        unit.console()
            .write_line(&LogLine::new(Level::INFO, format!("output of {id}")));
        unit.add_outcome(outcome, "");
        unit
    }

    fn writer_setup() -> WriterSetup {
        WriterSetup {
            total_units: 2,
            cycles: 2,
            workers: 1,
            run_details: RunDetails::default(),
            started_at: Utc::now(),
            artifacts: ArtifactHub::new(),
        }
    }

    #[test]
    fn test_report_notifies_writers_in_order_and_tallies() {
        let buffer = SharedBuffer::new();
        let router = Arc::new(LogRouter::new(Console::new(buffer.clone())));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let writers: Vec<Box<dyn Writer>> = vec![
            Box::new(Recording {
                name: "first",
                seen: seen.clone(),
                fail_results: true,
            }),
            Box::new(FailingSetup),
            Box::new(Recording {
                name: "second",
                seen: seen.clone(),
                fail_results: false,
            }),
        ];
        let aggregator = ResultAggregator::new(router, ReplayPolicy::OnFailure, writers, 2, 2);
        aggregator.setup_writers(&writer_setup());

        aggregator.report(&finished("A_001", 0, Outcome::Passed));
        aggregator.report(&finished("A_002", 1, Outcome::Failed));

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            ["first:A_001", "second:A_001", "first:A_002", "second:A_002"]
        );
        assert_eq!(aggregator.remaining(), 0);
        assert_eq!(aggregator.notified(), 2);

        let output = buffer.contents();
        assert!(!output.contains("output of A_001"));
        assert!(output.contains("output of A_002"));

        let report = aggregator.run_report(Duration::from_secs(1));
        assert_eq!(report.cycles[0].count(Outcome::Passed), 1);
        assert_eq!(report.cycles[1].count(Outcome::Failed), 1);

        let errors = aggregator.take_errors();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("Writer failing-setup setup failed"));
        assert_eq!(errors[1], "Writer first failed to process A_001: disk full");
    }

    #[test]
    fn test_reports_after_cleanup_are_discarded() {
        let router = Arc::new(LogRouter::new(Console::new(SharedBuffer::new())));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let writers: Vec<Box<dyn Writer>> = vec![Box::new(Recording {
            name: "only",
            seen: seen.clone(),
            fail_results: false,
        })];
        let aggregator = ResultAggregator::new(router, ReplayPolicy::Never, writers, 1, 3);

        aggregator.report(&finished("L_001", 0, Outcome::Passed));
        aggregator.cleanup_writers();
        aggregator.report(&finished("L_002", 0, Outcome::Passed));

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(aggregator.notified(), 1);
        assert_eq!(aggregator.remaining(), 2);
    }
}
