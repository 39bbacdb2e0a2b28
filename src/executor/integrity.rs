//! Process integrity checks
//!
//! Tests share one process, so a unit that changes the working directory or
//! the environment affects every unit after it. Changes are detected and
//! reported, never reverted.

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Process-wide state a unit must leave untouched
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl ProcessSnapshot {
    pub fn capture() -> Self {
        Self {
            cwd: std::env::current_dir().ok(),
            env: std::env::vars_os()
                .map(|(k, v)| {
                    (
                        k.to_string_lossy().into_owned(),
                        v.to_string_lossy().into_owned(),
                    )
                })
                .collect(),
        }
    }

    /// Human-readable differences from `before` to `self`
    pub fn diff(&self, before: &ProcessSnapshot) -> Vec<String> {
        let mut changes = Vec::new();
        if self.cwd != before.cwd {
            changes.push(format!(
                "working directory changed from {} to {}",
                display_cwd(&before.cwd),
                display_cwd(&self.cwd)
            ));
        }
        for (key, old) in &before.env {
            match self.env.get(key) {
                None => changes.push(format!("environment variable {key} was removed")),
                Some(new) if new != old => {
                    changes.push(format!("environment variable {key} was changed"))
                }
                _ => {}
            }
        }
        for key in self.env.keys().filter(|k| !before.env.contains_key(*k)) {
            changes.push(format!("environment variable {key} was added"));
        }
        changes
    }
}

fn display_cwd(cwd: &Option<PathBuf>) -> String {
    cwd.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<unknown>".to_string())
}

/// Process state was modified while the guard was held
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Process state was modified: {}", .changes.join("; "))]
pub struct IntegrityViolation {
    pub changes: Vec<String>,
}

/// Snapshot taken before a unit or a run, checked afterwards
#[derive(Debug)]
pub struct IntegrityGuard {
    before: ProcessSnapshot,
}

impl IntegrityGuard {
    pub fn capture() -> Self {
        Self {
            before: ProcessSnapshot::capture(),
        }
    }

    /// Accept the current state as the new baseline
    pub fn rebase(&mut self) {
        self.before = ProcessSnapshot::capture();
    }

    pub fn check(&self) -> Result<(), IntegrityViolation> {
        let changes = ProcessSnapshot::capture().diff(&self.before);
        if changes.is_empty() {
            Ok(())
        } else {
            Err(IntegrityViolation { changes })
        }
    }
}
