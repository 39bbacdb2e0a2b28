//! Test outcome model
//!
//! Defines the outcome kinds a test unit can record and their severity ranking.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified result of running a test unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Skipped,
    Blocked,
    DumpedCore,
    TimedOut,
    Failed,
    NotVerified,
    Inspect,
    Passed,
}

/// Every outcome kind, most severe first
pub const PRECEDENCE: [Outcome; 8] = [
    Outcome::Skipped,
    Outcome::Blocked,
    Outcome::DumpedCore,
    Outcome::TimedOut,
    Outcome::Failed,
    Outcome::NotVerified,
    Outcome::Inspect,
    Outcome::Passed,
];

impl Outcome {
    /// Position in the severity ranking; 0 is the most severe
    pub fn severity_rank(self) -> u8 {
        match self {
            Outcome::Skipped => 0,
            Outcome::Blocked => 1,
            Outcome::DumpedCore => 2,
            Outcome::TimedOut => 3,
            Outcome::Failed => 4,
            Outcome::NotVerified => 5,
            Outcome::Inspect => 6,
            Outcome::Passed => 7,
        }
    }

    /// Whether `self` ranks strictly worse than `other`
    pub fn is_more_severe_than(self, other: Outcome) -> bool {
        self.severity_rank() < other.severity_rank()
    }

    /// Failure kinds make the overall run exit non-zero
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Outcome::Blocked | Outcome::DumpedCore | Outcome::TimedOut | Outcome::Failed
        )
    }

    pub fn is_success(self) -> bool {
        self == Outcome::Passed
    }

    /// Display name used in logs and reports
    pub fn name(self) -> &'static str {
        match self {
            Outcome::Skipped => "SKIPPED",
            Outcome::Blocked => "BLOCKED",
            Outcome::DumpedCore => "DUMPED CORE",
            Outcome::TimedOut => "TIMED OUT",
            Outcome::Failed => "FAILED",
            Outcome::NotVerified => "NOT VERIFIED",
            Outcome::Inspect => "REQUIRES INSPECTION",
            Outcome::Passed => "PASSED",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Outcome::Passed => "✓",
            Outcome::Skipped => "○",
            Outcome::NotVerified | Outcome::Inspect => "?",
            Outcome::Failed | Outcome::TimedOut => "✗",
            Outcome::Blocked | Outcome::DumpedCore => "!",
        }
    }

    /// Parse from a display name, case-insensitively
    pub fn from_name(s: &str) -> Option<Self> {
        let wanted = s.trim().to_uppercase();
        PRECEDENCE.iter().copied().find(|o| o.name() == wanted)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_matches_rank() {
        for (i, outcome) in PRECEDENCE.iter().enumerate() {
            assert_eq!(outcome.severity_rank() as usize, i);
        }
    }

    #[test]
    fn test_severity() {
        assert!(Outcome::Skipped.is_more_severe_than(Outcome::Blocked));
        assert!(Outcome::Failed.is_more_severe_than(Outcome::Passed));
        assert!(!Outcome::Passed.is_more_severe_than(Outcome::Passed));
    }

    #[test]
    fn test_failure_kinds() {
        let failures: Vec<_> = PRECEDENCE.iter().filter(|o| o.is_failure()).collect();
        assert_eq!(failures.len(), 4);
        assert!(!Outcome::NotVerified.is_failure());
        assert!(!Outcome::Skipped.is_failure());
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Outcome::from_name("timed out"), Some(Outcome::TimedOut));
        assert_eq!(Outcome::from_name("REQUIRES INSPECTION"), Some(Outcome::Inspect));
        assert_eq!(Outcome::from_name("bogus"), None);
    }
}
