//! Per-cycle outcome tallies and the final run report

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::outcome::{Outcome, PRECEDENCE};
use super::unit::TestUnit;

/// What the tally keeps about a completed unit
#[derive(Clone, Debug, Serialize)]
pub struct UnitRecord {
    pub id: String,
    pub title: String,
    pub reason: String,
    pub test_dir: PathBuf,
    pub output_dir: PathBuf,
    pub duration_secs: f64,
}

impl UnitRecord {
    pub fn from_unit(unit: &TestUnit) -> Self {
        Self {
            id: unit.descriptor().id_with_mode(),
            title: unit.descriptor().title.clone(),
            reason: unit.reason().to_string(),
            test_dir: unit.descriptor().test_dir.clone(),
            output_dir: unit.output_dir().to_path_buf(),
            duration_secs: unit.elapsed().as_secs_f64(),
        }
    }
}

/// Outcomes of a single cycle keyed by outcome kind
#[derive(Clone, Debug, Serialize)]
pub struct CycleTally {
    pub cycle: usize,
    pub results: BTreeMap<Outcome, Vec<UnitRecord>>,
}

impl CycleTally {
    pub fn new(cycle: usize) -> Self {
        Self {
            cycle,
            results: PRECEDENCE.iter().map(|o| (*o, Vec::new())).collect(),
        }
    }

    pub fn record(&mut self, outcome: Outcome, record: UnitRecord) {
        self.results.entry(outcome).or_default().push(record);
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.get(&outcome).map(Vec::len).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.results.values().map(Vec::len).sum()
    }

    pub fn failures(&self) -> usize {
        self.results
            .iter()
            .filter(|(o, _)| o.is_failure())
            .map(|(_, r)| r.len())
            .sum()
    }
}

/// Aggregate result of a whole run
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub cycles: Vec<CycleTally>,
    pub duration: Duration,
}

impl RunReport {
    pub fn new(cycles: Vec<CycleTally>, duration: Duration) -> Self {
        Self { cycles, duration }
    }

    pub fn total(&self) -> usize {
        self.cycles.iter().map(CycleTally::total).sum()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.cycles.iter().map(|c| c.count(outcome)).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.cycles.iter().map(CycleTally::failures).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }

    pub fn pass_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (self.count(Outcome::Passed) as f64 / total as f64) * 100.0
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<String> = PRECEDENCE
            .iter()
            .filter(|o| self.count(**o) > 0)
            .map(|o| format!("{}: {}", o, self.count(*o)))
            .collect();
        writeln!(f, "Total: {} | {}", self.total(), counts.join(" | "))?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {:.2}s",
            self.pass_rate(),
            self.duration.as_secs_f64()
        )
    }
}
