//! systest - concurrent system test runner
//!
//! Runs the tests listed in a manifest on a pool of workers, repeating them
//! for any number of cycles, and reports their outcomes on the console and
//! through the configured writers.
//!
//! ## Usage
//!
//! ```bash
//! # Run every test in a manifest
//! systest run tests.yaml
//!
//! # Four workers, three cycles, keep only failing output
//! systest run tests.yaml -n 4 --cycle 3 --purge
//!
//! # Record results
//! systest run tests.yaml --json results.json --csv results.csv
//!
//! # List the tests of one mode
//! systest list tests.yaml --mode fast --detailed
//! ```
//!
//! Exit status: 0 when every test passed, 2 when a test failed, 10 on a
//! run-level error and 130 when the run was interrupted.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod cli;

use cli::{Args, Command, ListArgs, RunArgs};
use systest_runner::config::{EnvConfig, RunnerConfig, TestManifest};
use systest_runner::executor::{InterruptController, RunError, Scheduler, SchedulerOptions};
use systest_runner::logging::{init_logger, LogLevel, LogRouter};
use systest_runner::models::RunDetailsBuilder;
use systest_runner::perf::CsvPerformanceReporter;
use systest_runner::testcases::TestRegistry;
use systest_runner::writer::{
    ConsoleProgressWriter, ConsoleSummaryWriter, CsvResultsWriter, JsonResultsWriter, Writer,
};

const EXIT_PASSED: i32 = 0;
const EXIT_TEST_FAILURES: i32 = 2;
const EXIT_FATAL: i32 = 10;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let result = match args.command {
        Command::Run(run_args) => run_tests(run_args, args.verbose).await,
        Command::List(list_args) => list_tests(list_args).map(|()| EXIT_PASSED),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_FATAL
        }
    };
    // abandoned workers must not keep the process alive
    std::process::exit(code);
}

fn load_config(args: &RunArgs, env: &EnvConfig, verbose: bool) -> Result<RunnerConfig> {
    let mut config = match &args.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::load_default()?,
    };
    config.apply_env(env);
    args.apply(&mut config);
    if verbose {
        config.log_level = "debug".to_string();
    }
    config.validate()?;
    Ok(config)
}

fn build_writers(config: &RunnerConfig, no_color: bool) -> Vec<Box<dyn Writer>> {
    let mut configured: Vec<Box<dyn Writer>> = Vec::new();
    if let Some(path) = &config.writers.json {
        configured.push(Box::new(JsonResultsWriter::new(path)));
    }
    if let Some(path) = &config.writers.csv {
        configured.push(Box::new(CsvResultsWriter::new(path)));
    }
    configured.push(Box::new(ConsoleProgressWriter::new()));

    let mut summary = ConsoleSummaryWriter::new();
    if no_color {
        summary = summary.no_color();
    }
    configured.push(Box::new(summary));
    configured
}

async fn run_tests(args: RunArgs, verbose: bool) -> Result<i32> {
    let env = EnvConfig::load();
    let config = load_config(&args, &env, verbose)?;

    let router = Arc::new(LogRouter::default());
    let level = LogLevel::from_str(&config.log_level).unwrap_or(LogLevel::Info);
    init_logger(level, router.clone());

    let manifest = TestManifest::load(&args.manifest)
        .with_context(|| format!("Failed to load manifest {}", args.manifest.display()))?;
    let descriptors = manifest.select(args.mode.as_deref());
    if descriptors.is_empty() {
        bail!("No tests selected from {}", args.manifest.display());
    }

    let interrupt = Arc::new(InterruptController::new().prompt_enabled(config.interrupt_prompt));
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                interrupt.request();
            }
        });
    }

    let mut details = RunDetailsBuilder::with_defaults();
    for (key, value) in &config.run_details {
        details.insert(key.clone(), value.clone());
    }

    let options = SchedulerOptions {
        cycles: config.cycles,
        workers: config.threads,
        purge: config.purge,
        record: config.record,
        validate_only: config.validate_only,
        outdir: config.outdir.clone(),
        outsubdir: config.outsubdir.clone(),
        replay: config.replay,
        grace_period: config.grace_period(),
        command_timeout: std::time::Duration::from_secs(config.command_timeout_secs),
        check_integrity: true,
    };

    let mut scheduler = Scheduler::new(options, Arc::new(TestRegistry::with_builtins()), router)
        .with_interrupt(interrupt)
        .with_run_details(details)
        .with_writers(build_writers(&config, args.no_color));
    if let Some(path) = &config.writers.perf_csv {
        scheduler = scheduler.with_perf_reporter(Arc::new(CsvPerformanceReporter::new(path)));
    }

    info!(
        "Loaded {} tests from {}",
        descriptors.len(),
        args.manifest.display()
    );

    match scheduler.run(&descriptors).await {
        Ok(report) if report.has_failures() => Ok(EXIT_TEST_FAILURES),
        Ok(_) => Ok(EXIT_PASSED),
        Err(e @ RunError::Interrupted { .. }) => {
            error!("{}", e);
            Ok(EXIT_INTERRUPTED)
        }
        Err(e) => {
            error!("{}", e);
            Ok(EXIT_FATAL)
        }
    }
}

fn list_tests(args: ListArgs) -> Result<()> {
    let manifest = TestManifest::load(&args.manifest)
        .with_context(|| format!("Failed to load manifest {}", args.manifest.display()))?;
    let descriptors = manifest.select(args.mode.as_deref());

    println!("\nTests in {} ({} total)\n", args.manifest.display(), descriptors.len());
    println!("──────────────────────────────────────────────────────────────────────");
    for descriptor in &descriptors {
        let skipped = if descriptor.skipped_reason.is_some() {
            " [skipped]"
        } else {
            ""
        };
        println!(
            "  {:30} {}{}",
            descriptor.id_with_mode(),
            descriptor.title,
            skipped
        );
        if args.detailed {
            println!("      class : {}", descriptor.class_name);
            println!("      dir   : {}", descriptor.test_dir.display());
            if !descriptor.groups.is_empty() {
                println!("      groups: {}", descriptor.groups.join(", "));
            }
        }
    }
    println!();
    Ok(())
}
