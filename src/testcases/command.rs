//! Built-in command test
//!
//! Runs the descriptor's `command` property through the platform shell inside
//! the unit's output directory and checks its exit status.
//!
//! Properties:
//! - `command`: shell command line (required)
//! - `timeout_secs`: overrides the runner's default command timeout
//! - `expected_exit_status`: defaults to `0`

use anyhow::Context;
use std::fs::File;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{PhaseResult, TestCase, TestError};
use crate::executor::TestContext;
use crate::models::Outcome;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Test logic that runs a shell command
#[derive(Debug, Default)]
pub struct CommandTest {
    status: Option<ExitStatus>,
}

impl CommandTest {
    /// Class name descriptors use to select this test
    pub const CLASS_NAME: &'static str = "command";

    pub fn new() -> Self {
        Self::default()
    }

    fn shell(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        }
    }

    fn stop(child: &mut Child) {
        if let Err(e) = child.kill() {
            debug!("Could not kill child process {}: {}", child.id(), e);
        }
        let _ = child.wait();
    }
}

impl TestCase for CommandTest {
    fn execute(&mut self, ctx: &mut TestContext<'_>) -> PhaseResult {
        let Some(command) = ctx.property("command").map(str::to_string) else {
            return Err(TestError::abort(
                Outcome::Blocked,
                "No 'command' property in descriptor",
            ));
        };
        let timeout = match ctx.property("timeout_secs") {
            Some(value) => Duration::from_secs(
                value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs '{value}'"))?,
            ),
            None => ctx.default_timeout(),
        };

        let out_dir = ctx.output_dir().to_path_buf();
        let stdout = File::create(out_dir.join("command.out"))?;
        let stderr = File::create(out_dir.join("command.err"))?;

        info!("Running command: {}", command);
        let mut child = Self::shell(&command)
            .current_dir(&out_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .with_context(|| format!("Failed to start '{command}'"))?;

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                info!("Command exited after {:.1} secs with {}", started.elapsed().as_secs_f64(), status);
                self.status = Some(status);
                return Ok(());
            }
            if ctx.is_cancelled() {
                warn!("Stopping command {} because the run is being interrupted", child.id());
                Self::stop(&mut child);
                return Err(TestError::Interrupted);
            }
            if started.elapsed() >= timeout {
                Self::stop(&mut child);
                return Err(TestError::abort(
                    Outcome::TimedOut,
                    format!("Command timed out after {} secs", timeout.as_secs()),
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn validate(&mut self, ctx: &mut TestContext<'_>) -> PhaseResult {
        let expected: i32 = match ctx.property("expected_exit_status") {
            Some(value) => value
                .parse()
                .with_context(|| format!("Invalid expected_exit_status '{value}'"))?,
            None => 0,
        };

        match self.status.and_then(|s| s.code()) {
            Some(code) if code == expected => ctx.add_outcome(Outcome::Passed, ""),
            Some(code) => ctx.add_outcome(
                Outcome::Failed,
                format!("Command exited with status {code}, expected {expected}"),
            ),
            None if self.status.is_some() => {
                ctx.add_outcome(Outcome::Failed, "Command was terminated by a signal")
            }
            // validate-only runs have no process to check
            None => ctx.add_outcome(Outcome::NotVerified, "Command was not run"),
        }
        Ok(())
    }
}
