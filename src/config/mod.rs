//! Configuration module
//!
//! Handles loading and merging runner configuration.
//! Precedence: command line > environment > config file > defaults.

mod env;
mod file;
mod manifest;

pub use env::{EnvBuilder, EnvConfig, EnvGuard, ENV_PREFIX};
#[cfg(test)]
pub(crate) use env::lock_env;
pub use file::{expand_path, find_config_file};
pub use manifest::TestManifest;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::logging::ReplayPolicy;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runner configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of worker threads; 1 runs units inline
    pub threads: usize,

    /// Number of times the whole unit list is repeated
    pub cycles: usize,

    /// Delete output of passing units
    pub purge: bool,

    /// Enable record writers
    pub record: bool,

    /// Only run validation against existing output
    pub validate_only: bool,

    /// Root for all unit output instead of each test's own directory
    pub outdir: Option<PathBuf>,

    /// Output sub-directory name inside each test (defaults to the OS name)
    pub outsubdir: Option<String>,

    /// When buffered unit console output is replayed
    pub replay: ReplayPolicy,

    /// Console log level
    pub log_level: String,

    /// Ask before aborting on Ctrl-C
    pub interrupt_prompt: bool,

    /// Seconds in-flight units get to finish after an abort
    pub grace_period_secs: u64,

    /// Default timeout for the built-in command test, in seconds
    pub command_timeout_secs: u64,

    /// Output files for the built-in writers
    pub writers: WritersConfig,

    /// Extra entries added to the run details
    pub run_details: BTreeMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            cycles: 1,
            purge: false,
            record: false,
            validate_only: false,
            outdir: None,
            outsubdir: None,
            replay: ReplayPolicy::default(),
            log_level: "info".to_string(),
            interrupt_prompt: true,
            grace_period_secs: 10,
            command_timeout_secs: 600,
            writers: WritersConfig::default(),
            run_details: BTreeMap::new(),
        }
    }
}

/// Built-in writer destinations
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WritersConfig {
    /// JSON results file (record writer)
    pub json: Option<PathBuf>,

    /// CSV results file (record writer)
    pub csv: Option<PathBuf>,

    /// CSV performance results file
    pub perf_csv: Option<PathBuf>,
}

impl RunnerConfig {
    /// Load configuration from a YAML or JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = if file::is_yaml_file(path) {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from the first standard location that exists, or defaults
    pub fn load_default() -> Result<Self, ConfigError> {
        match find_config_file() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let write_err = |message: String| ConfigError::Write {
            path: path.to_path_buf(),
            message,
        };
        let content = if file::is_yaml_file(path) {
            serde_yaml::to_string(self).map_err(|e| write_err(e.to_string()))?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| write_err(e.to_string()))?
        };
        std::fs::write(path, content).map_err(|e| write_err(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid("threads must be at least 1".into()));
        }
        if self.cycles == 0 {
            return Err(ConfigError::Invalid("cycles must be at least 1".into()));
        }
        Ok(())
    }

    /// Apply environment overrides on top of this configuration
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(threads) = env.threads {
            self.threads = threads;
        }
        if let Some(cycles) = env.cycles {
            self.cycles = cycles;
        }
        if let Some(purge) = env.purge {
            self.purge = purge;
        }
        if let Some(record) = env.record {
            self.record = record;
        }
        if let Some(outdir) = &env.outdir {
            self.outdir = Some(outdir.clone());
        }
        if let Some(level) = &env.log {
            self.log_level = level.clone();
        }
        if env.disable_interrupt_prompt == Some(true) {
            self.interrupt_prompt = false;
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}
