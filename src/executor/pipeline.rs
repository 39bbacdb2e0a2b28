//! Per-unit execution pipeline
//!
//! Drives one unit through `Preparing → Setup → Executing → Validating →
//! CleaningUp`. Whatever the user phases do, the unit leaves the pipeline with
//! an outcome and its sinks detached; nothing is propagated to the caller.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

use super::context::TestContext;
use crate::logging::{FileSink, LogRouter, LogSink};
use crate::models::{Outcome, RunDetails, TestUnit};
use crate::output::{format_duration, OutputDirectoryManager};
use crate::perf::PerformanceReporters;
use crate::testcases::{PhaseResult, TestCase, TestError, TestRegistry};
use crate::utils::PhaseTimer;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Lifecycle state of a unit inside the pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Preparing,
    Setup,
    Executing,
    Validating,
    CleaningUp,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Pending => "pending",
            PipelineState::Preparing => "preparing",
            PipelineState::Setup => "setup",
            PipelineState::Executing => "execute",
            PipelineState::Validating => "validate",
            PipelineState::CleaningUp => "cleanup",
            PipelineState::Done => "done",
        };
        f.write_str(name)
    }
}

/// How a user phase ended
enum PhaseExit {
    Completed,
    Stopped,
}

/// Runs units through the fixed test lifecycle
pub struct ExecutionPipeline {
    outputs: OutputDirectoryManager,
    router: Arc<LogRouter>,
    registry: Arc<TestRegistry>,
    run_details: RunDetails,
    perf: PerformanceReporters,
    cancel: CancellationToken,
    validate_only: bool,
    default_timeout: Duration,
}

impl ExecutionPipeline {
    pub fn new(
        outputs: OutputDirectoryManager,
        router: Arc<LogRouter>,
        registry: Arc<TestRegistry>,
        run_details: RunDetails,
    ) -> Self {
        Self {
            outputs,
            router,
            registry,
            run_details,
            perf: Vec::new().into(),
            cancel: CancellationToken::new(),
            validate_only: false,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_perf(mut self, perf: PerformanceReporters) -> Self {
        self.perf = perf;
        self
    }

    /// Token observed between phases and handed to user code
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Skip setup and execute, re-validating output from an earlier run
    pub fn validate_only(mut self, validate_only: bool) -> Self {
        self.validate_only = validate_only;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn outputs(&self) -> &OutputDirectoryManager {
        &self.outputs
    }

    pub fn run_details(&self) -> &RunDetails {
        &self.run_details
    }

    /// Run every phase of `unit` on the calling thread
    pub fn run(&self, unit: &mut TestUnit) {
        self.run_checked(unit, |_| {});
    }

    /// Like [`run`](Self::run), then apply `checks` while the unit's sinks
    /// are still attached, so the logged final outcome includes their verdict
    pub fn run_checked(&self, unit: &mut TestUnit, checks: impl FnOnce(&mut TestUnit)) {
        let started = Instant::now();
        let mut timer = PhaseTimer::start();
        timer.enter(PipelineState::Preparing);
        unit.mark_started();

        let mut sinks: Vec<Arc<dyn LogSink>> = vec![unit.console().clone() as Arc<dyn LogSink>];
        let blocked = match self.outputs.prepare(unit) {
            Ok(_) => match FileSink::create(unit.run_log_path(), Level::DEBUG) {
                Ok(file) => {
                    sinks.push(Arc::new(file));
                    None
                }
                Err(e) => Some(format!(
                    "Failed to create {}: {}",
                    unit.run_log_path().display(),
                    e
                )),
            },
            Err(e) => Some(e.to_string()),
        };

        let guard = self.router.attach(sinks);
        self.log_header(unit);

        if let Some(reason) = blocked {
            error!("Could not prepare test output: {}", reason);
            unit.add_outcome(Outcome::Blocked, reason);
        } else if let Some(reason) = unit.descriptor().skipped_reason.clone() {
            info!("Test skipped: {}", reason);
            unit.add_outcome(Outcome::Skipped, reason);
        } else {
            match self.registry.create(unit.descriptor()) {
                Some(test) => self.run_phases(test, unit, &mut timer),
                None => {
                    let reason = format!("Unknown test class '{}'", unit.descriptor().class_name);
                    error!("{}", reason);
                    unit.add_outcome(Outcome::Blocked, reason);
                }
            }
        }

        timer.finish();
        unit.set_elapsed(started.elapsed());
        checks(unit);
        info!("Test duration: {}", format_duration(unit.elapsed()));
        info!("Test final outcome: {}", unit.current_outcome());
        if !unit.reason().is_empty() {
            info!("Test outcome reason: {}", unit.reason());
        }
        debug!("Phase timings: {}", timer.summary());
        drop(guard);
    }

    fn log_header(&self, unit: &TestUnit) {
        let rule = "=".repeat(62);
        info!("{}", rule);
        info!("Id   : {}", unit.descriptor().id_with_mode());
        if !unit.descriptor().title.is_empty() {
            info!("Title: {}", unit.descriptor().title);
        }
        if unit.cycle() > 0 {
            info!("Cycle: {}", unit.cycle() + 1);
        }
        info!("{}", rule);
        debug!("Output directory: {}", unit.output_dir().display());
    }

    fn run_phases(
        &self,
        mut test: Box<dyn TestCase>,
        unit: &mut TestUnit,
        timer: &mut PhaseTimer<PipelineState>,
    ) {
        let phases: &[PipelineState] = if self.validate_only {
            &[PipelineState::Validating]
        } else {
            &[
                PipelineState::Setup,
                PipelineState::Executing,
                PipelineState::Validating,
            ]
        };

        let mut ctx = TestContext::new(
            unit,
            &self.run_details,
            self.cancel.clone(),
            &self.perf,
            self.default_timeout,
        );

        for &phase in phases {
            if ctx.is_cancelled() {
                ctx.add_outcome(Outcome::Blocked, "Test interrupted");
                break;
            }
            timer.enter(phase);
            debug!("Entering {} phase", phase);
            let result = catch_unwind(AssertUnwindSafe(|| match phase {
                PipelineState::Setup => test.setup(&mut ctx),
                PipelineState::Executing => test.execute(&mut ctx),
                _ => test.validate(&mut ctx),
            }));
            if let PhaseExit::Stopped = settle_phase(&mut ctx, phase, result) {
                break;
            }
        }

        timer.enter(PipelineState::CleaningUp);
        let cleanup = catch_unwind(AssertUnwindSafe(|| test.cleanup(&mut ctx)));
        let failure = match cleanup {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        if let Some(message) = failure {
            warn!("Cleanup failed: {}", message);
            ctx.add_outcome(Outcome::Blocked, format!("Cleanup failed: {message}"));
        }
    }
}

/// Record the result of one user phase on the unit
fn settle_phase(
    ctx: &mut TestContext<'_>,
    phase: PipelineState,
    result: std::thread::Result<PhaseResult>,
) -> PhaseExit {
    match result {
        Ok(Ok(())) => PhaseExit::Completed,
        Ok(Err(TestError::Abort { outcome, reason })) => {
            info!("Test aborted during {}: {} {}", phase, outcome, reason);
            ctx.unit_mut().override_outcome(outcome, reason);
            PhaseExit::Stopped
        }
        Ok(Err(TestError::Interrupted)) => {
            warn!("Test interrupted during {}", phase);
            ctx.add_outcome(Outcome::Blocked, "Test interrupted");
            PhaseExit::Stopped
        }
        Ok(Err(e)) => {
            error!("Error during {}: {}", phase, e);
            ctx.add_outcome(Outcome::Blocked, e.to_string());
            PhaseExit::Stopped
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Panic during {}: {}", phase, message);
            ctx.add_outcome(Outcome::Blocked, message);
            PhaseExit::Stopped
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{Console, SharedBuffer};
    use crate::models::TestDescriptor;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Scripted test logic recording which phases ran
    struct Scripted {
        fail_in: Option<PipelineState>,
        calls: Arc<AtomicUsize>,
        cleaned: Arc<AtomicBool>,
    }

    impl Scripted {
        fn fail(&self, phase: PipelineState) -> PhaseResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_in {
                Some(p) if p == phase => Err(anyhow::anyhow!("boom in {phase}").into()),
                _ => Ok(()),
            }
        }
    }

    impl TestCase for Scripted {
        fn setup(&mut self, _ctx: &mut TestContext<'_>) -> PhaseResult {
            self.fail(PipelineState::Setup)
        }

        fn execute(&mut self, _ctx: &mut TestContext<'_>) -> PhaseResult {
            self.fail(PipelineState::Executing)
        }

        fn validate(&mut self, ctx: &mut TestContext<'_>) -> PhaseResult {
            self.fail(PipelineState::Validating)?;
            ctx.add_outcome(Outcome::Passed, "");
            Ok(())
        }

        fn cleanup(&mut self, _ctx: &mut TestContext<'_>) -> PhaseResult {
            self.cleaned.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Panicking;

    impl TestCase for Panicking {
        fn execute(&mut self, _ctx: &mut TestContext<'_>) -> PhaseResult {
            panic!("index out of range");
        }

        fn cleanup(&mut self, _ctx: &mut TestContext<'_>) -> PhaseResult {
            Err(anyhow::anyhow!("server still running").into())
        }
    }

    struct Aborting;

    impl TestCase for Aborting {
        fn execute(&mut self, ctx: &mut TestContext<'_>) -> PhaseResult {
            ctx.add_outcome(Outcome::Failed, "first check");
            Err(TestError::abort(Outcome::Skipped, "feature not available"))
        }
    }

    struct Fixture {
        calls: Arc<AtomicUsize>,
        cleaned: Arc<AtomicBool>,
    }

    fn registry(fail_in: Option<PipelineState>) -> (TestRegistry, Fixture) {
        let calls = Arc::new(AtomicUsize::new(0));
        let cleaned = Arc::new(AtomicBool::new(false));
        let fixture = Fixture {
            calls: calls.clone(),
            cleaned: cleaned.clone(),
        };
        let registry = TestRegistry::new()
            .with("scripted", move |_| {
                Box::new(Scripted {
                    fail_in,
                    calls: calls.clone(),
                    cleaned: cleaned.clone(),
                })
            })
            .with("panicking", |_| Box::new(Panicking))
            .with("aborting", |_| Box::new(Aborting));
        (registry, fixture)
    }

    fn pipeline(root: &Path, registry: TestRegistry) -> ExecutionPipeline {
        ExecutionPipeline::new(
            OutputDirectoryManager::new(1).with_outdir(root),
            Arc::new(LogRouter::new(Console::new(SharedBuffer::new()))),
            Arc::new(registry),
            RunDetails::default(),
        )
    }

    fn unit(id: &str, class: &str) -> TestUnit {
        TestUnit::new(
            Arc::new(TestDescriptor::new(id, "/unused").with_class(class)),
            0,
        )
    }

    #[test]
    fn test_all_phases_pass() {
        let dir = tempdir().unwrap();
        let (registry, fixture) = registry(None);
        let mut unit = unit("P_001", "scripted");

        pipeline(dir.path(), registry).run(&mut unit);

        assert_eq!(unit.current_outcome(), Outcome::Passed);
        assert_eq!(fixture.calls.load(Ordering::SeqCst), 3);
        assert!(fixture.cleaned.load(Ordering::SeqCst));
        assert!(unit.run_log_path().exists());
        assert_eq!(unit.output_dir(), dir.path().join("P_001"));
    }

    #[test]
    fn test_execute_error_blocks_and_still_cleans_up() {
        let dir = tempdir().unwrap();
        let (registry, fixture) = registry(Some(PipelineState::Executing));
        let mut unit = unit("P_002", "scripted");

        pipeline(dir.path(), registry).run(&mut unit);

        assert_eq!(unit.current_outcome(), Outcome::Blocked);
        assert!(unit.reason().contains("boom in execute"));
        // validate never ran
        assert_eq!(fixture.calls.load(Ordering::SeqCst), 2);
        assert!(fixture.cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panic_and_cleanup_failure_are_recorded() {
        let dir = tempdir().unwrap();
        let (registry, _) = registry(None);
        let mut unit = unit("P_003", "panicking");

        pipeline(dir.path(), registry).run(&mut unit);

        assert_eq!(unit.outcomes(), &[Outcome::Blocked, Outcome::Blocked]);
        assert_eq!(unit.reason(), "index out of range");
    }

    #[test]
    fn test_abort_overrides_previous_outcomes() {
        let dir = tempdir().unwrap();
        let (registry, _) = registry(None);
        let mut unit = unit("P_004", "aborting");

        pipeline(dir.path(), registry).run(&mut unit);

        assert_eq!(unit.outcomes(), &[Outcome::Skipped]);
        assert_eq!(unit.reason(), "feature not available");
    }

    #[test]
    fn test_unknown_class_blocks() {
        let dir = tempdir().unwrap();
        let (registry, _) = registry(None);
        let mut unit = unit("P_005", "missing");

        pipeline(dir.path(), registry).run(&mut unit);

        assert_eq!(unit.current_outcome(), Outcome::Blocked);
        assert_eq!(unit.reason(), "Unknown test class 'missing'");
    }

    #[test]
    fn test_skipped_descriptor_runs_no_phase() {
        let dir = tempdir().unwrap();
        let (registry, fixture) = registry(None);
        let mut unit = TestUnit::new(
            Arc::new(
                TestDescriptor::new("P_006", "/unused")
                    .with_class("scripted")
                    .skipped("needs a database"),
            ),
            0,
        );

        pipeline(dir.path(), registry).run(&mut unit);

        assert_eq!(unit.outcomes(), &[Outcome::Skipped]);
        assert_eq!(unit.reason(), "needs a database");
        assert_eq!(fixture.calls.load(Ordering::SeqCst), 0);
        assert!(unit.output_dir().exists());
    }

    #[test]
    fn test_validate_only_runs_validation() {
        let dir = tempdir().unwrap();
        let (registry, fixture) = registry(None);
        let mut unit = unit("P_007", "scripted");

        pipeline(dir.path(), registry)
            .validate_only(true)
            .run(&mut unit);

        assert_eq!(unit.current_outcome(), Outcome::Passed);
        assert_eq!(fixture.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_run_blocks_before_first_phase() {
        let dir = tempdir().unwrap();
        let (registry, fixture) = registry(None);
        let token = CancellationToken::new();
        token.cancel();
        let mut unit = unit("P_008", "scripted");

        pipeline(dir.path(), registry)
            .with_cancellation(token)
            .run(&mut unit);

        assert_eq!(unit.current_outcome(), Outcome::Blocked);
        assert_eq!(unit.reason(), "Test interrupted");
        assert_eq!(fixture.calls.load(Ordering::SeqCst), 0);
        assert!(fixture.cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_checks_decide_logged_final_outcome() {
        use crate::logging::RoutingLayer;
        use tracing_subscriber::prelude::*;

        let dir = tempdir().unwrap();
        let (registry, _) = registry(None);
        let router = Arc::new(LogRouter::new(Console::new(SharedBuffer::new())));
        let subscriber = tracing_subscriber::registry().with(RoutingLayer::new(router.clone()));
        let _default = tracing::subscriber::set_default(subscriber);

        let pipeline = ExecutionPipeline::new(
            OutputDirectoryManager::new(1).with_outdir(dir.path()),
            router,
            Arc::new(registry),
            RunDetails::default(),
        );
        let mut unit = unit("P_009", "scripted");
        pipeline.run_checked(&mut unit, |unit| {
            unit.add_outcome(Outcome::DumpedCore, "Core dump detected: core.1234");
        });

        assert_eq!(unit.current_outcome(), Outcome::DumpedCore);
        let text = unit.console().text();
        assert!(text.contains("Test final outcome: DUMPED CORE"), "{text}");
        assert!(!text.contains("Test final outcome: PASSED"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Executing.to_string(), "execute");
        assert_eq!(PipelineState::CleaningUp.to_string(), "cleanup");
    }
}
