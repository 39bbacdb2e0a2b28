//! User test logic
//!
//! A test case implements up to four phases. Returning an error from a phase
//! blocks the unit; `TestError::Abort` instead replaces every outcome recorded
//! so far with the one it carries.

mod command;
mod registry;

pub use command::CommandTest;
pub use registry::TestRegistry;

use thiserror::Error;

use crate::executor::TestContext;
use crate::models::Outcome;

/// Errors a test phase can return
#[derive(Error, Debug)]
pub enum TestError {
    /// Stop the unit immediately with exactly this outcome
    #[error("{outcome}: {reason}")]
    Abort { outcome: Outcome, reason: String },

    #[error("Test interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

impl TestError {
    pub fn abort(outcome: Outcome, reason: impl Into<String>) -> Self {
        TestError::Abort {
            outcome,
            reason: reason.into(),
        }
    }
}

/// Result of a single test phase
pub type PhaseResult<T = ()> = Result<T, TestError>;

/// Test logic run by the execution pipeline
pub trait TestCase: Send {
    fn setup(&mut self, _ctx: &mut TestContext<'_>) -> PhaseResult {
        Ok(())
    }

    fn execute(&mut self, ctx: &mut TestContext<'_>) -> PhaseResult;

    fn validate(&mut self, _ctx: &mut TestContext<'_>) -> PhaseResult {
        Ok(())
    }

    /// Always called once the unit was instantiated, whatever happened before
    fn cleanup(&mut self, _ctx: &mut TestContext<'_>) -> PhaseResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let abort = TestError::abort(Outcome::Skipped, "not supported here");
        assert_eq!(abort.to_string(), "SKIPPED: not supported here");

        let other: TestError = anyhow::anyhow!("connection refused")
            .context("server did not start")
            .into();
        assert_eq!(other.to_string(), "server did not start: connection refused");
    }
}
