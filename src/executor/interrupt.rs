//! Interrupt handling
//!
//! A request (usually Ctrl-C) pauses dispatch. Interactive runs may ask the
//! operator whether to continue; otherwise the run is aborted, which cancels the
//! token every unit polls.

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What to do after an interrupt request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptDecision {
    Continue,
    Abort,
}

/// Asks the operator how to handle an interrupt
pub trait Prompt: Send + Sync {
    fn ask(&self, remaining: usize) -> InterruptDecision;
}

/// Reads the answer from standard input
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&self, remaining: usize) -> InterruptDecision {
        let stdin = io::stdin();
        loop {
            print!("\nInterrupted with {remaining} tests remaining, continue running tests? [yes|no] ");
            let _ = io::stdout().flush();

            let mut answer = String::new();
            match stdin.lock().read_line(&mut answer) {
                Ok(0) | Err(_) => return InterruptDecision::Abort,
                Ok(_) => {}
            }
            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return InterruptDecision::Continue,
                "n" | "no" => return InterruptDecision::Abort,
                _ => {}
            }
        }
    }
}

/// Whether an interrupt should be put to the operator rather than aborting
pub fn should_prompt(interactive: bool, remaining: usize, prompt_enabled: bool) -> bool {
    interactive && remaining > 0 && prompt_enabled
}

/// Tracks interrupt requests and turns them into decisions
pub struct InterruptController {
    requested: AtomicBool,
    notify: Notify,
    token: CancellationToken,
    prompt: Arc<dyn Prompt>,
    prompt_enabled: bool,
    interactive: bool,
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            notify: Notify::new(),
            token: CancellationToken::new(),
            prompt: Arc::new(StdinPrompt),
            prompt_enabled: true,
            interactive: io::stdin().is_terminal(),
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn prompt_enabled(mut self, enabled: bool) -> Self {
        self.prompt_enabled = enabled;
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Signal an interrupt; safe to call from any thread
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Whether the run was aborted
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token cancelled when the run is aborted
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once an interrupt is pending
    pub async fn wait_requested(&self) {
        loop {
            if self.is_requested() {
                return;
            }
            self.notify.notified().await;
        }
    }

    /// Decide how to handle the pending interrupt
    pub async fn resolve(&self, remaining: usize) -> InterruptDecision {
        let decision = if should_prompt(self.interactive, remaining, self.prompt_enabled) {
            let prompt = self.prompt.clone();
            tokio::task::spawn_blocking(move || prompt.ask(remaining))
                .await
                .unwrap_or(InterruptDecision::Abort)
        } else {
            InterruptDecision::Abort
        };

        match decision {
            InterruptDecision::Continue => {
                info!("Continuing test run");
                self.requested.store(false, Ordering::SeqCst);
            }
            InterruptDecision::Abort => {
                warn!("Aborting test run with {} tests remaining", remaining);
                self.token.cancel();
            }
        }
        decision
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Scripted {
        answer: InterruptDecision,
        asked: AtomicUsize,
    }

    impl Prompt for Scripted {
        fn ask(&self, _remaining: usize) -> InterruptDecision {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn scripted(answer: InterruptDecision) -> Arc<Scripted> {
        Arc::new(Scripted {
            answer,
            asked: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_should_prompt() {
        assert!(should_prompt(true, 3, true));
        assert!(!should_prompt(false, 3, true));
        assert!(!should_prompt(true, 0, true));
        assert!(!should_prompt(true, 3, false));
    }

    #[test]
    fn test_no_prompt_when_nothing_remains() {
        let prompt = scripted(InterruptDecision::Continue);
        let controller = InterruptController::new()
            .with_prompt(prompt.clone())
            .interactive(true);
        controller.request();

        let decision = tokio_test::block_on(controller.resolve(0));
        assert_eq!(decision, InterruptDecision::Abort);
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 0);
        assert!(controller.is_aborted());
        assert!(controller.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_continue_clears_request() {
        let prompt = scripted(InterruptDecision::Continue);
        let controller = InterruptController::new()
            .with_prompt(prompt.clone())
            .interactive(true);
        controller.request();

        assert_eq!(controller.resolve(4).await, InterruptDecision::Continue);
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);
        assert!(!controller.is_requested());
        assert!(!controller.is_aborted());
    }

    #[tokio::test]
    async fn test_wait_requested_wakes_on_request() {
        let controller = Arc::new(InterruptController::new().interactive(false));
        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.wait_requested().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.request();

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        assert_eq!(controller.resolve(2).await, InterruptDecision::Abort);
    }
}
