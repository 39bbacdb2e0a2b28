//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use systest_runner::config::RunnerConfig;
use systest_runner::logging::ReplayPolicy;

/// Concurrent system test runner
#[derive(Parser, Debug)]
#[command(name = "systest")]
#[command(version)]
#[command(about = "Run system tests concurrently and report their outcomes")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the tests listed in a manifest
    Run(RunArgs),

    /// List the tests in a manifest
    List(ListArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Manifest listing the tests to run (YAML or JSON)
    pub manifest: PathBuf,

    /// Number of times to run every test
    #[arg(short, long)]
    pub cycle: Option<usize>,

    /// Number of worker threads, or "auto" for one per CPU
    #[arg(short = 'n', long, value_parser = parse_threads)]
    pub threads: Option<usize>,

    /// Delete the output of passing tests
    #[arg(short, long)]
    pub purge: bool,

    /// Enable record writers
    #[arg(short, long)]
    pub record: bool,

    /// Only validate output left by an earlier run
    #[arg(long)]
    pub validate_only: bool,

    /// Root directory for all test output
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// Only run descriptors of this mode
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Configuration file (defaults to the first of the standard locations)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// When to print buffered test output (always, on-failure, never)
    #[arg(long, value_parser = parse_replay)]
    pub replay: Option<ReplayPolicy>,

    /// Write results as JSON to this file; implies --record
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Write results as CSV to this file; implies --record
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Append performance results to this CSV file
    #[arg(long)]
    pub perf_csv: Option<PathBuf>,

    /// Disable colored outcomes in the summary
    #[arg(long)]
    pub no_color: bool,
}

impl RunArgs {
    /// Apply command line overrides on top of file and environment settings
    pub fn apply(&self, config: &mut RunnerConfig) {
        if let Some(cycles) = self.cycle {
            config.cycles = cycles;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if self.purge {
            config.purge = true;
        }
        if self.record {
            config.record = true;
        }
        if self.validate_only {
            config.validate_only = true;
        }
        if let Some(outdir) = &self.outdir {
            config.outdir = Some(outdir.clone());
        }
        if let Some(replay) = self.replay {
            config.replay = replay;
        }
        if let Some(json) = &self.json {
            config.writers.json = Some(json.clone());
            config.record = true;
        }
        if let Some(csv) = &self.csv {
            config.writers.csv = Some(csv.clone());
            config.record = true;
        }
        if let Some(perf_csv) = &self.perf_csv {
            config.writers.perf_csv = Some(perf_csv.clone());
        }
    }
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Manifest listing the tests (YAML or JSON)
    pub manifest: PathBuf,

    /// Only list descriptors of this mode
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Show directories, classes and groups
    #[arg(short, long)]
    pub detailed: bool,
}

fn parse_threads(value: &str) -> Result<usize, String> {
    if value.eq_ignore_ascii_case("auto") || value == "0" {
        return Ok(std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1));
    }
    value
        .parse()
        .map_err(|_| format!("invalid thread count '{value}'"))
}

fn parse_replay(value: &str) -> Result<ReplayPolicy, String> {
    ReplayPolicy::from_str(value)
        .ok_or_else(|| format!("unknown replay policy '{value}' (always, on-failure, never)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_args() {
        let args = Args::try_parse_from([
            "systest", "run", "tests.yaml", "--cycle", "3", "-n", "4", "--purge", "--replay",
            "on-failure", "--json", "out.json",
        ])
        .unwrap();

        let Command::Run(run) = args.command else {
            panic!("expected run command");
        };
        assert_eq!(run.manifest, PathBuf::from("tests.yaml"));

        let mut config = RunnerConfig::default();
        run.apply(&mut config);
        assert_eq!(config.cycles, 3);
        assert_eq!(config.threads, 4);
        assert!(config.purge);
        assert!(config.record);
        assert_eq!(config.replay, ReplayPolicy::OnFailure);
        assert_eq!(config.writers.json, Some(PathBuf::from("out.json")));
    }

    #[test]
    fn test_unset_flags_keep_config() {
        let args = Args::try_parse_from(["systest", "run", "tests.json"]).unwrap();
        let Command::Run(run) = args.command else {
            panic!("expected run command");
        };

        let mut config = RunnerConfig {
            threads: 8,
            purge: true,
            ..Default::default()
        };
        run.apply(&mut config);
        assert_eq!(config.threads, 8);
        assert!(config.purge);
        assert!(!config.record);
    }

    #[test]
    fn test_auto_threads() {
        assert!(parse_threads("auto").unwrap() >= 1);
        assert_eq!(parse_threads("2"), Ok(2));
        assert!(parse_threads("many").is_err());
        assert!(parse_replay("sometimes").is_err());
    }

    #[test]
    fn test_parse_list_args() {
        let args = Args::try_parse_from(["systest", "-v", "list", "tests.yaml", "--detailed"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Command::List(ListArgs { detailed: true, .. })));
    }
}
