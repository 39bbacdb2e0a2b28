//! Output handling module
//!
//! Per-unit output directories and console text formatting.

mod directory;
mod formatter;

pub use directory::{
    detect_crash_artifacts, purge_contents, OutputDirError, OutputDirectoryManager,
    SharedPurgeRegistry, RUN_LOG,
};
pub use formatter::{format_duration, percentage, OutcomeFormatter};
