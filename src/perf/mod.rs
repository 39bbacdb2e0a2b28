//! Performance reporting
//!
//! Units report numeric results through their context; every configured
//! reporter receives each value. Reporters are called from worker threads
//! concurrently and must synchronize internally.

mod csv_reporter;

pub use csv_reporter::CsvPerformanceReporter;

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::{RunDetails, TestUnit};

/// Unit of measure for a performance value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PerformanceUnit {
    pub name: String,
    pub bigger_is_better: bool,
}

impl PerformanceUnit {
    pub fn new(name: impl Into<String>, bigger_is_better: bool) -> Self {
        Self {
            name: name.into(),
            bigger_is_better,
        }
    }

    /// Elapsed time; smaller is better
    pub fn seconds() -> Self {
        Self::new("s", false)
    }

    /// Throughput; bigger is better
    pub fn per_second() -> Self {
        Self::new("/s", true)
    }
}

/// A single reported value with its metadata
#[derive(Clone, Debug)]
pub struct PerformanceResult {
    pub key: String,
    pub value: f64,
    pub unit: PerformanceUnit,
    /// Relative tolerance, e.g. 0.1 for 10%
    pub tolerance: f64,
    pub details: BTreeMap<String, String>,
}

impl PerformanceResult {
    pub fn new(key: impl Into<String>, value: f64, unit: PerformanceUnit) -> Self {
        Self {
            key: key.into(),
            value,
            unit,
            tolerance: 0.0,
            details: BTreeMap::new(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Consumer of performance results
pub trait PerformanceReporter: Send + Sync {
    fn name(&self) -> &str;

    fn setup(&self, _run_details: &RunDetails) -> Result<()> {
        Ok(())
    }

    fn report_result(&self, unit: &TestUnit, result: &PerformanceResult) -> Result<()>;

    fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared list of reporters handed to every unit
pub type PerformanceReporters = Arc<[Arc<dyn PerformanceReporter>]>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_builder() {
        let result = PerformanceResult::new("startup time", 1.5, PerformanceUnit::seconds())
            .with_tolerance(0.2)
            .with_detail("mode", "fast");
        assert!(!result.unit.bigger_is_better);
        assert_eq!(result.tolerance, 0.2);
        assert_eq!(result.details.get("mode").map(String::as_str), Some("fast"));
        assert!(PerformanceUnit::per_second().bigger_is_better);
    }
}
