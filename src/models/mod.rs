//! Data models for test execution
//!
//! This module contains all data structures shared across the runner.

mod descriptor;
mod outcome;
mod run_details;
mod summary;
mod unit;

pub use descriptor::TestDescriptor;
pub use outcome::{Outcome, PRECEDENCE};
pub use run_details::{RunDetails, RunDetailsBuilder};
pub use summary::{CycleTally, RunReport, UnitRecord};
pub use unit::TestUnit;
