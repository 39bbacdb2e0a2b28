//! Context handed to test phases

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::{Outcome, RunDetails, TestDescriptor, TestUnit};
use crate::perf::{PerformanceReporter, PerformanceResult};
use crate::testcases::{PhaseResult, TestError};

/// How often blocking waits check for cancellation
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// The running unit plus the run-wide services its phases may use
pub struct TestContext<'a> {
    unit: &'a mut TestUnit,
    run_details: &'a RunDetails,
    cancel: CancellationToken,
    perf: &'a [Arc<dyn PerformanceReporter>],
    default_timeout: Duration,
}

impl<'a> TestContext<'a> {
    pub(crate) fn new(
        unit: &'a mut TestUnit,
        run_details: &'a RunDetails,
        cancel: CancellationToken,
        perf: &'a [Arc<dyn PerformanceReporter>],
        default_timeout: Duration,
    ) -> Self {
        Self {
            unit,
            run_details,
            cancel,
            perf,
            default_timeout,
        }
    }

    pub fn unit(&self) -> &TestUnit {
        &*self.unit
    }

    pub fn unit_mut(&mut self) -> &mut TestUnit {
        &mut *self.unit
    }

    pub fn descriptor(&self) -> &TestDescriptor {
        self.unit.descriptor()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.unit.descriptor().property(key)
    }

    pub fn add_outcome(&mut self, outcome: Outcome, reason: impl Into<String>) {
        self.unit.add_outcome(outcome, reason);
    }

    pub fn output_dir(&self) -> &Path {
        self.unit.output_dir()
    }

    pub fn input_dir(&self) -> PathBuf {
        self.unit.descriptor().input_dir()
    }

    pub fn reference_dir(&self) -> PathBuf {
        self.unit.descriptor().reference_dir()
    }

    /// Frozen metadata shared by every unit of the run
    pub fn run_details(&self) -> &RunDetails {
        self.run_details
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with `TestError::Interrupted` once the run is being aborted
    pub fn check_cancelled(&self) -> PhaseResult {
        if self.is_cancelled() {
            Err(TestError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep, waking early if the run is aborted
    pub fn sleep(&self, duration: Duration) -> PhaseResult {
        let deadline = Instant::now() + duration;
        loop {
            self.check_cancelled()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(CANCEL_POLL.min(deadline - now));
        }
    }

    /// Poll `condition` until it holds or `timeout` passes
    ///
    /// Returns whether the condition was met. Cancellation ends the wait with
    /// `TestError::Interrupted`.
    pub fn wait_for(
        &self,
        mut condition: impl FnMut() -> bool,
        timeout: Duration,
        poll_interval: Duration,
    ) -> PhaseResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if condition() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                debug!("Condition not met within {:.1} secs", timeout.as_secs_f64());
                return Ok(false);
            }
            self.sleep(poll_interval)?;
        }
    }

    /// Send a performance value to every configured reporter
    pub fn report_performance(&self, result: PerformanceResult) -> PhaseResult {
        debug!(
            "Performance result: {} = {} {}",
            result.key, result.value, result.unit.name
        );
        for reporter in self.perf {
            reporter.report_result(&*self.unit, &result).map_err(|e| {
                TestError::Other(e.context(format!("{} rejected '{}'", reporter.name(), result.key)))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn unit() -> TestUnit {
        TestUnit::new(Arc::new(TestDescriptor::new("Ctx_001", "/tests/Ctx_001")), 0)
    }

    #[test]
    fn test_sleep_returns_early_when_cancelled() {
        let mut unit = unit();
        let details = RunDetails::default();
        let token = CancellationToken::new();
        let ctx = TestContext::new(&mut unit, &details, token.clone(), &[], Duration::ZERO);

        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                token.cancel();
            })
        };
        let started = Instant::now();
        let result = ctx.sleep(Duration::from_secs(30));
        canceller.join().unwrap();

        assert!(matches!(result, Err(TestError::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_wait_for() {
        let mut unit = unit();
        let details = RunDetails::default();
        let ctx = TestContext::new(
            &mut unit,
            &details,
            CancellationToken::new(),
            &[],
            Duration::ZERO,
        );

        let calls = AtomicUsize::new(0);
        let met = ctx
            .wait_for(
                || calls.fetch_add(1, Ordering::SeqCst) >= 2,
                Duration::from_secs(5),
                Duration::from_millis(10),
            )
            .unwrap();
        assert!(met);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let never = ctx
            .wait_for(|| false, Duration::from_millis(30), Duration::from_millis(10))
            .unwrap();
        assert!(!never);
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl PerformanceReporter for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn report_result(&self, unit: &TestUnit, result: &PerformanceResult) -> anyhow::Result<()> {
            self.0
                .lock()
                .unwrap()
                .push(format!("{}:{}={}", unit.id(), result.key, result.value));
            Ok(())
        }
    }

    #[test]
    fn test_report_performance_fans_out() {
        let mut unit = unit();
        let details = RunDetails::default();
        let first = Arc::new(Collect::default());
        let second = Arc::new(Collect::default());
        let reporters: Vec<Arc<dyn PerformanceReporter>> = vec![first.clone(), second.clone()];
        let ctx = TestContext::new(
            &mut unit,
            &details,
            CancellationToken::new(),
            &reporters,
            Duration::ZERO,
        );

        ctx.report_performance(PerformanceResult::new(
            "rate",
            12.5,
            crate::perf::PerformanceUnit::per_second(),
        ))
        .unwrap();

        assert_eq!(first.0.lock().unwrap().as_slice(), ["Ctx_001:rate=12.5"]);
        assert_eq!(second.0.lock().unwrap().len(), 1);
    }
}
