//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;
use std::path::PathBuf;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SYSTEST";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Worker count from SYSTEST_THREADS
    pub threads: Option<usize>,
    /// Cycle count from SYSTEST_CYCLES
    pub cycles: Option<usize>,
    /// Purge flag from SYSTEST_PURGE
    pub purge: Option<bool>,
    /// Record flag from SYSTEST_RECORD
    pub record: Option<bool>,
    /// Output root from SYSTEST_OUTDIR
    pub outdir: Option<PathBuf>,
    /// Log level from SYSTEST_LOG
    pub log: Option<String>,
    /// From SYSTEST_DISABLE_INTERRUPT_PROMPT
    pub disable_interrupt_prompt: Option<bool>,
    /// Raw value of SYSTEST_CONSOLE_FAILURE_ANNOTATIONS
    pub console_failure_annotations: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            threads: get_env_parse("THREADS"),
            cycles: get_env_parse("CYCLES"),
            purge: get_env_bool("PURGE"),
            record: get_env_bool("RECORD"),
            outdir: get_env("OUTDIR").map(PathBuf::from),
            log: get_env("LOG"),
            disable_interrupt_prompt: get_env_bool("DISABLE_INTERRUPT_PROMPT"),
            console_failure_annotations: get_env("CONSOLE_FAILURE_ANNOTATIONS"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.threads.is_some()
            || self.cycles.is_some()
            || self.purge.is_some()
            || self.record.is_some()
            || self.outdir.is_some()
            || self.log.is_some()
            || self.disable_interrupt_prompt.is_some()
            || self.console_failure_annotations.is_some()
    }

    /// Failure annotations are on when the variable is set to anything but `false`
    pub fn annotations_enabled(&self) -> bool {
        self.console_failure_annotations
            .as_deref()
            .map(|v| !v.eq_ignore_ascii_case("false"))
            .unwrap_or(false)
    }

    /// Custom annotation format, if the variable holds one
    pub fn annotation_format(&self) -> Option<&str> {
        self.console_failure_annotations
            .as_deref()
            .filter(|v| v.contains('@'))
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables (useful for testing)
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    fn var(mut self, name: &str, value: impl ToString) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_{name}"), value.to_string()));
        self
    }

    pub fn threads(self, threads: usize) -> Self {
        self.var("THREADS", threads)
    }

    pub fn cycles(self, cycles: usize) -> Self {
        self.var("CYCLES", cycles)
    }

    pub fn purge(self, purge: bool) -> Self {
        self.var("PURGE", purge)
    }

    pub fn record(self, record: bool) -> Self {
        self.var("RECORD", record)
    }

    pub fn log(self, level: &str) -> Self {
        self.var("LOG", level)
    }

    pub fn console_failure_annotations(self, value: &str) -> Self {
        self.var("CONSOLE_FAILURE_ANNOTATIONS", value)
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Serializes tests that modify the process environment
#[cfg(test)]
pub(crate) fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.threads.is_none());
        assert!(!config.has_any());
        assert!(!config.annotations_enabled());
    }

    #[test]
    fn test_env_builder() {
        let _lock = lock_env();
        let _guard = EnvBuilder::new()
            .threads(6)
            .cycles(2)
            .log("debug")
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.threads, Some(6));
        assert_eq!(config.cycles, Some(2));
        assert_eq!(config.log.as_deref(), Some("debug"));
    }

    #[test]
    fn test_env_bool_parsing() {
        let _lock = lock_env();
        let _guard = EnvBuilder::new().purge(true).record(false).apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.purge, Some(true));
        assert_eq!(config.record, Some(false));
    }

    #[test]
    fn test_annotations_switch() {
        let off = EnvConfig {
            console_failure_annotations: Some("FALSE".into()),
            ..Default::default()
        };
        assert!(!off.annotations_enabled());

        let on = EnvConfig {
            console_failure_annotations: Some("true".into()),
            ..Default::default()
        };
        assert!(on.annotations_enabled());
        assert!(on.annotation_format().is_none());

        let custom = EnvConfig {
            console_failure_annotations: Some("@testFile@: @outcome@".into()),
            ..Default::default()
        };
        assert_eq!(custom.annotation_format(), Some("@testFile@: @outcome@"));
    }
}
