//! Per-unit output directory management
//!
//! Prepares a clean output directory before a unit runs and trims it afterwards.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::sleep;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Outcome, TestDescriptor, TestUnit};
use crate::writer::TestOutputVisitor;

/// Log file that purging always keeps
pub const RUN_LOG: &str = "run.log";

const DELETE_ATTEMPTS: u32 = 3;
const DELETE_RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Output directory errors
#[derive(Error, Debug)]
pub enum OutputDirError {
    #[error("Cannot remove leftover file {path}: {source}")]
    LeftoverFile { path: PathBuf, source: io::Error },

    #[error("Cannot read output directory {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Cannot create output directory {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
}

/// Output directories already purged in this run
#[derive(Clone, Debug, Default)]
pub struct SharedPurgeRegistry {
    purged: Arc<Mutex<HashSet<PathBuf>>>,
}

impl SharedPurgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.purged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_purged(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Computes, prepares and finalizes unit output directories
#[derive(Clone, Debug)]
pub struct OutputDirectoryManager {
    outdir: Option<PathBuf>,
    outsubdir: String,
    cycles: usize,
    validate_only: bool,
    registry: SharedPurgeRegistry,
}

impl OutputDirectoryManager {
    pub fn new(cycles: usize) -> Self {
        Self {
            outdir: None,
            outsubdir: std::env::consts::OS.to_string(),
            cycles: cycles.max(1),
            validate_only: false,
            registry: SharedPurgeRegistry::new(),
        }
    }

    /// Place all output under `root/<test id>` instead of inside each test
    pub fn with_outdir(mut self, root: impl Into<PathBuf>) -> Self {
        self.outdir = Some(root.into());
        self
    }

    pub fn with_outsubdir(mut self, name: impl Into<String>) -> Self {
        self.outsubdir = name.into();
        self
    }

    pub fn validate_only(mut self, validate_only: bool) -> Self {
        self.validate_only = validate_only;
        self
    }

    pub fn registry(&self) -> &SharedPurgeRegistry {
        &self.registry
    }

    /// Directory shared by every cycle of a descriptor
    fn base_dir(&self, descriptor: &TestDescriptor) -> PathBuf {
        match &self.outdir {
            Some(root) => root.join(descriptor.id_with_mode()),
            None => {
                let name = match &descriptor.mode {
                    Some(mode) => format!("{}~{}", self.outsubdir, mode),
                    None => self.outsubdir.clone(),
                };
                descriptor.output_root().join(name)
            }
        }
    }

    /// Output directory of one (descriptor, cycle) pair
    pub fn output_path(&self, descriptor: &TestDescriptor, cycle: usize) -> PathBuf {
        let base = self.base_dir(descriptor);
        if self.cycles > 1 {
            base.join(format!("cycle{}", cycle + 1))
        } else {
            base
        }
    }

    /// Parent directory shared by several cycle variants of the descriptor, if any
    pub fn shared_parent(&self, descriptor: &TestDescriptor) -> Option<PathBuf> {
        (self.cycles > 1).then(|| self.base_dir(descriptor))
    }

    /// Compute and clean the unit's output directory, then create it
    pub fn prepare(&self, unit: &mut TestUnit) -> Result<PathBuf, OutputDirError> {
        let path = self.output_path(unit.descriptor(), unit.cycle());
        unit.set_output_dir(path.clone());

        match self.shared_parent(unit.descriptor()) {
            Some(parent) => {
                // held until our cycle folder exists so a later purge cannot remove it
                let mut purged = self.registry.lock();
                if purged.insert(parent.clone()) && !self.validate_only && parent.exists() {
                    debug!("Purging shared output directory {}", parent.display());
                    purge_contents(&parent)?;
                }
                if !self.validate_only && path.exists() {
                    purge_contents(&path)?;
                }
                create_dir(&path)?;
            }
            None => {
                if !self.validate_only && path.exists() {
                    purge_contents(&path)?;
                }
                create_dir(&path)?;
            }
        }

        Ok(path)
    }

    /// Trim the unit's output after it completed
    ///
    /// Zero-length files are always removed. With `purge_requested` and a fully
    /// passing unit every file except the run log is removed too. Visitors see
    /// each non-empty file first; the first one to claim it stops the others.
    pub fn finalize(
        &self,
        unit: &TestUnit,
        purge_requested: bool,
        visitors: &[Arc<dyn TestOutputVisitor>],
    ) {
        let remove_non_empty = purge_requested && unit.current_outcome() == Outcome::Passed;
        let dir = unit.output_dir();
        if dir.as_os_str().is_empty() || !dir.exists() {
            return;
        }
        clean_dir(dir, unit, remove_non_empty, visitors);
    }
}

fn create_dir(path: &Path) -> Result<(), OutputDirError> {
    fs::create_dir_all(path).map_err(|source| OutputDirError::Create {
        path: path.to_path_buf(),
        source,
    })
}

/// Delete everything inside `dir`, keeping `dir` itself
pub fn purge_contents(dir: &Path) -> Result<(), OutputDirError> {
    let entries = fs::read_dir(dir).map_err(|source| OutputDirError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = fs::symlink_metadata(&path)
            .map(|m| m.is_dir())
            .unwrap_or(false);

        if is_dir {
            purge_contents(&path)?;
            if let Err(e) = fs::remove_dir(&path) {
                // something external may still hold the directory open
                warn!("Could not remove empty directory {}: {}", path.display(), e);
            }
        } else {
            remove_leftover_file(path)?;
        }
    }
    Ok(())
}

fn remove_leftover_file(path: PathBuf) -> Result<(), OutputDirError> {
    fs::remove_file(&path).map_err(|source| OutputDirError::LeftoverFile { path, source })
}

fn delete_with_retry(path: &Path) -> bool {
    for attempt in 1..=DELETE_ATTEMPTS {
        match fs::remove_file(path) {
            Ok(()) => return true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
            Err(e) => {
                debug!(
                    "Attempt {}/{} to delete {} failed: {}",
                    attempt,
                    DELETE_ATTEMPTS,
                    path.display(),
                    e
                );
                if attempt < DELETE_ATTEMPTS {
                    sleep(DELETE_RETRY_PAUSE);
                }
            }
        }
    }
    warn!("Giving up deleting {}", path.display());
    false
}

/// Returns true when `dir` ended up empty and was removed
fn clean_dir(
    dir: &Path,
    unit: &TestUnit,
    remove_non_empty: bool,
    visitors: &[Arc<dyn TestOutputVisitor>],
) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };

    let mut remaining = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = fs::symlink_metadata(&path) else {
            remaining += 1;
            continue;
        };

        if meta.is_dir() {
            if !clean_dir(&path, unit, remove_non_empty, visitors) {
                remaining += 1;
            }
            continue;
        }

        let size = meta.len();
        if size > 0 {
            for visitor in visitors {
                if visitor.visit_output_file(unit, &path) {
                    break;
                }
            }
        }

        let is_run_log = path.file_name().map(|n| n == RUN_LOG).unwrap_or(false);
        let delete = size == 0 || (remove_non_empty && !is_run_log);
        if !path.exists() {
            continue;
        }
        if !(delete && delete_with_retry(&path)) {
            remaining += 1;
        }
    }

    remaining == 0 && fs::remove_dir(dir).is_ok()
}

/// Files in `dir` that look like crash dumps
pub fn detect_crash_artifacts(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_lowercase();
        let is_dump = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("dmp") || e.eq_ignore_ascii_case("mdmp"))
            .unwrap_or(false);
        if name.starts_with("core") || is_dump {
            found.push(path);
        }
    }
    Ok(found)
}
