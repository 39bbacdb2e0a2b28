//! Test scheduler
//!
//! Dispatches every (cycle, descriptor) pair onto blocking workers, bounded by
//! a semaphore with one permit per worker. Permits are handed out in
//! submission order, so units start in manifest order even though they may
//! finish in any order.

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::aggregator::ResultAggregator;
use super::integrity::IntegrityGuard;
use super::interrupt::{InterruptController, InterruptDecision};
use super::pipeline::ExecutionPipeline;
use crate::config::EnvConfig;
use crate::logging::{LogRouter, ReplayPolicy};
use crate::models::{Outcome, RunDetailsBuilder, RunReport, TestDescriptor, TestUnit};
use crate::output::{detect_crash_artifacts, OutputDirectoryManager};
use crate::perf::{PerformanceReporter, PerformanceReporters};
use crate::testcases::TestRegistry;
use crate::utils::Timer;
use crate::writer::{
    arrange_writers, ArtifactHub, ConsoleFailureAnnotationsWriter, TestOutputVisitor, Writer,
    WriterSetup,
};

/// Run-level failure, as opposed to a failing test
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Run setup failed: {0:#}")]
    Setup(anyhow::Error),

    #[error("Test run interrupted after {completed} of {total} tests")]
    Interrupted {
        completed: usize,
        total: usize,
        errors: Vec<String>,
    },

    #[error("Test run failed with {} error(s): {}", .0.len(), .0.join("; "))]
    Aggregate(Vec<String>),
}

/// Caller extension points around the whole run
pub trait RunHooks: Send + Sync {
    /// Called before writers are set up; the last chance to add run details
    fn setup(&self, _details: &mut RunDetailsBuilder) -> Result<()> {
        Ok(())
    }

    /// Called after writers are cleaned up
    fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

struct NoHooks;

impl RunHooks for NoHooks {}

/// Called once every unit of a cycle has completed
///
/// Installing one stops cycles from overlapping.
pub trait CycleHook: Send + Sync {
    fn cycle_complete(&self, cycle: usize) -> Result<()>;
}

/// Scheduler settings
#[derive(Clone, Debug)]
pub struct SchedulerOptions {
    pub cycles: usize,
    pub workers: usize,
    pub purge: bool,
    pub record: bool,
    pub validate_only: bool,
    pub outdir: Option<PathBuf>,
    pub outsubdir: Option<String>,
    pub replay: ReplayPolicy,
    pub grace_period: Duration,
    pub command_timeout: Duration,
    /// Compare working directory and environment before and after units
    pub check_integrity: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            cycles: 1,
            workers: 1,
            purge: false,
            record: false,
            validate_only: false,
            outdir: None,
            outsubdir: None,
            replay: ReplayPolicy::default(),
            grace_period: Duration::from_secs(10),
            command_timeout: Duration::from_secs(600),
            check_integrity: true,
        }
    }
}

/// Everything a worker needs to run and report one unit
struct UnitJob {
    pipeline: ExecutionPipeline,
    aggregator: Arc<ResultAggregator>,
    visitors: Vec<Arc<dyn TestOutputVisitor>>,
    purge: bool,
    per_unit_integrity: bool,
    /// Run-level guard, moved forward past changes a unit was blamed for
    run_guard: Option<Arc<Mutex<IntegrityGuard>>>,
}

impl UnitJob {
    fn execute(&self, descriptor: Arc<TestDescriptor>, cycle: usize) {
        let mut unit = TestUnit::new(descriptor, cycle);
        self.aggregator.unit_starting(&unit);

        let guard = self.per_unit_integrity.then(IntegrityGuard::capture);
        self.pipeline.run_checked(&mut unit, |unit| {
            if let Some(guard) = &guard {
                self.check_integrity(guard, unit);
            }
            scan_crash_artifacts(unit);
        });

        self.pipeline
            .outputs()
            .finalize(&unit, self.purge, &self.visitors);
        self.aggregator.report(&unit);
    }

    fn check_integrity(&self, guard: &IntegrityGuard, unit: &mut TestUnit) {
        let Err(violation) = guard.check() else {
            return;
        };
        error!("{} modified process state: {}", unit.id(), violation);
        unit.add_outcome(Outcome::Blocked, violation.to_string());
        if let Some(run_guard) = &self.run_guard {
            run_guard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .rebase();
        }
    }
}

fn scan_crash_artifacts(unit: &mut TestUnit) {
    if !unit.output_dir().is_dir() {
        return;
    }
    match detect_crash_artifacts(unit.output_dir()) {
        Ok(found) => {
            if let Some(first) = found.first() {
                let reason = format!("Core dump detected: {}", first.display());
                error!("{}", reason);
                unit.add_outcome(Outcome::DumpedCore, reason);
            }
        }
        Err(e) => warn!(
            "Could not scan {} for crash artifacts: {}",
            unit.output_dir().display(),
            e
        ),
    }
}

fn annotations_from_env() -> Box<dyn Writer> {
    let env = EnvConfig::load();
    let mut writer = ConsoleFailureAnnotationsWriter::new(env.annotations_enabled());
    if let Some(format) = env.annotation_format() {
        writer = writer.with_format(format);
    }
    Box::new(writer)
}

/// Runs descriptors through the execution pipeline on a worker pool
pub struct Scheduler {
    options: SchedulerOptions,
    router: Arc<LogRouter>,
    registry: Arc<TestRegistry>,
    writers: Vec<Box<dyn Writer>>,
    annotations: Box<dyn Writer>,
    perf: Vec<Arc<dyn PerformanceReporter>>,
    hooks: Box<dyn RunHooks>,
    cycle_hook: Option<Arc<dyn CycleHook>>,
    interrupt: Arc<InterruptController>,
    run_details: RunDetailsBuilder,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions, registry: Arc<TestRegistry>, router: Arc<LogRouter>) -> Self {
        Self {
            options,
            router,
            registry,
            writers: Vec::new(),
            annotations: annotations_from_env(),
            perf: Vec::new(),
            hooks: Box::new(NoHooks),
            cycle_hook: None,
            interrupt: Arc::new(InterruptController::new()),
            run_details: RunDetailsBuilder::with_defaults(),
        }
    }

    /// Writers notified of every result
    ///
    /// Record and progress writers keep the given order and are followed by
    /// the failure annotations writer; summary writers are always notified last.
    pub fn with_writers(mut self, writers: Vec<Box<dyn Writer>>) -> Self {
        self.writers = writers;
        self
    }

    /// Replace the failure annotations writer configured from the environment
    pub fn with_annotations(mut self, writer: impl Writer + 'static) -> Self {
        self.annotations = Box::new(writer);
        self
    }

    pub fn with_perf_reporter(mut self, reporter: Arc<dyn PerformanceReporter>) -> Self {
        self.perf.push(reporter);
        self
    }

    pub fn with_hooks(mut self, hooks: impl RunHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn with_cycle_hook(mut self, hook: Arc<dyn CycleHook>) -> Self {
        self.cycle_hook = Some(hook);
        self
    }

    pub fn with_interrupt(mut self, interrupt: Arc<InterruptController>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_run_details(mut self, run_details: RunDetailsBuilder) -> Self {
        self.run_details = run_details;
        self
    }

    /// Run every descriptor `cycles` times
    ///
    /// Test failures are reported in the returned [`RunReport`]; an `Err` means
    /// the run itself went wrong or was aborted.
    pub async fn run(self, descriptors: &[Arc<TestDescriptor>]) -> Result<RunReport, RunError> {
        let timer = Timer::start("Test run");
        let run_guard = self
            .options
            .check_integrity
            .then(|| Arc::new(Mutex::new(IntegrityGuard::capture())));
        let cycles = self.options.cycles.max(1);
        let workers = self.options.workers.max(1);
        let total = descriptors.len() * cycles;
        let mut deferred = Vec::new();

        let mut builder = self.run_details;
        builder.insert("cycles", cycles.to_string());
        builder.insert("workers", workers.to_string());
        self.hooks.setup(&mut builder).map_err(RunError::Setup)?;
        let run_details = builder.freeze();

        let perf: PerformanceReporters = self.perf.into();
        for reporter in perf.iter() {
            if let Err(e) = reporter.setup(&run_details) {
                deferred.push(format!(
                    "Performance reporter {} setup failed: {:#}",
                    reporter.name(),
                    e
                ));
            }
        }

        let record = self.options.record;
        let writers: Vec<Box<dyn Writer>> = arrange_writers(self.writers, self.annotations)
            .into_iter()
            .filter(|w| w.is_enabled(record))
            .collect();
        let aggregator = Arc::new(ResultAggregator::new(
            self.router.clone(),
            self.options.replay,
            writers,
            cycles,
            total,
        ));
        aggregator.setup_writers(&WriterSetup {
            total_units: total,
            cycles,
            workers,
            run_details: run_details.clone(),
            started_at: Utc::now(),
            artifacts: ArtifactHub::new(),
        });

        let mut outputs = OutputDirectoryManager::new(cycles).validate_only(self.options.validate_only);
        if let Some(outdir) = &self.options.outdir {
            outputs = outputs.with_outdir(outdir);
        }
        if let Some(outsubdir) = &self.options.outsubdir {
            outputs = outputs.with_outsubdir(outsubdir.as_str());
        }
        let pipeline = ExecutionPipeline::new(outputs, self.router.clone(), self.registry, run_details)
            .with_perf(perf.clone())
            .with_cancellation(self.interrupt.token())
            .validate_only(self.options.validate_only)
            .with_default_timeout(self.options.command_timeout);

        let per_unit_integrity = workers == 1 && self.options.check_integrity;
        let job = Arc::new(UnitJob {
            pipeline,
            aggregator: aggregator.clone(),
            visitors: aggregator.output_visitors(),
            purge: self.options.purge,
            per_unit_integrity,
            run_guard: if per_unit_integrity { run_guard.clone() } else { None },
        });

        info!(
            "Running {} tests{} with {} worker{}",
            descriptors.len(),
            if cycles > 1 { format!(" for {cycles} cycles") } else { String::new() },
            workers,
            if workers == 1 { "" } else { "s" }
        );

        let dispatcher = Dispatcher {
            interrupt: self.interrupt.clone(),
            aggregator: aggregator.clone(),
            grace_period: self.options.grace_period,
        };
        let semaphore = Arc::new(Semaphore::new(workers));
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        let mut pending: Vec<JoinHandle<()>> = Vec::new();

        'cycles: for cycle in 0..cycles {
            for descriptor in descriptors {
                let permit = loop {
                    if self.interrupt.is_aborted() {
                        break 'cycles;
                    }
                    tokio::select! {
                        biased;
                        _ = self.interrupt.wait_requested() => {
                            dispatcher.resolve().await;
                        }
                        permit = semaphore.clone().acquire_owned() => match permit {
                            Ok(permit) => break permit,
                            Err(_) => break 'cycles,
                        },
                    }
                };

                let job = job.clone();
                let dispatch = dispatch.clone();
                let descriptor = descriptor.clone();
                pending.push(tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    tracing::dispatcher::with_default(&dispatch, || job.execute(descriptor, cycle));
                }));
            }

            if let Some(hook) = &self.cycle_hook {
                dispatcher
                    .drain(std::mem::take(&mut pending), &mut deferred)
                    .await;
                if self.interrupt.is_aborted() {
                    break;
                }
                info!("Cycle {} complete", cycle + 1);
                if let Err(e) = hook.cycle_complete(cycle) {
                    deferred.push(format!("Cycle {} hook failed: {:#}", cycle + 1, e));
                }
            }
        }
        dispatcher.drain(pending, &mut deferred).await;

        for reporter in perf.iter() {
            if let Err(e) = reporter.cleanup() {
                deferred.push(format!(
                    "Performance reporter {} cleanup failed: {:#}",
                    reporter.name(),
                    e
                ));
            }
        }
        aggregator.cleanup_writers();
        deferred.extend(aggregator.take_errors());
        if let Err(e) = self.hooks.cleanup() {
            deferred.push(format!("Run cleanup failed: {e:#}"));
        }
        if let Some(run_guard) = &run_guard {
            let checked = run_guard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .check();
            if let Err(violation) = checked {
                deferred.push(violation.to_string());
            }
        }

        let report = aggregator.run_report(timer.stop());
        for message in &deferred {
            error!("{}", message);
        }
        if self.interrupt.is_aborted() {
            return Err(RunError::Interrupted {
                completed: aggregator.notified(),
                total,
                errors: deferred,
            });
        }
        if !deferred.is_empty() {
            return Err(RunError::Aggregate(deferred));
        }
        Ok(report)
    }
}

/// Waits on workers while watching for interrupts
struct Dispatcher {
    interrupt: Arc<InterruptController>,
    aggregator: Arc<ResultAggregator>,
    grace_period: Duration,
}

impl Dispatcher {
    async fn resolve(&self) -> InterruptDecision {
        self.interrupt.resolve(self.aggregator.remaining()).await
    }

    /// Wait for every handle; after an abort, wait at most the grace period
    async fn drain(&self, handles: Vec<JoinHandle<()>>, deferred: &mut Vec<String>) {
        if handles.is_empty() {
            return;
        }
        let all = join_all(handles);
        tokio::pin!(all);

        while !self.interrupt.is_aborted() {
            tokio::select! {
                results = &mut all => {
                    collect_join_errors(results, deferred);
                    return;
                }
                _ = self.interrupt.wait_requested() => {
                    self.resolve().await;
                }
            }
        }

        info!(
            "Waiting up to {} secs for running tests to stop",
            self.grace_period.as_secs()
        );
        match tokio::time::timeout(self.grace_period, &mut all).await {
            Ok(results) => collect_join_errors(results, deferred),
            Err(_) => warn!(
                "Abandoning {} tests still running after the grace period",
                self.aggregator.remaining()
            ),
        }
    }
}

fn collect_join_errors(
    results: Vec<Result<(), tokio::task::JoinError>>,
    deferred: &mut Vec<String>,
) {
    for result in results {
        if let Err(e) = result {
            deferred.push(format!("Test worker failed: {e}"));
        }
    }
}
