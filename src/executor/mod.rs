//! Test execution engine
//!
//! The scheduler feeds units to the execution pipeline on a worker pool and
//! reports them through the result aggregator.

mod aggregator;
mod context;
mod integrity;
mod interrupt;
mod pipeline;
mod scheduler;

pub use aggregator::ResultAggregator;
pub use context::TestContext;
pub use integrity::{IntegrityGuard, IntegrityViolation, ProcessSnapshot};
pub use interrupt::{should_prompt, InterruptController, InterruptDecision, Prompt, StdinPrompt};
pub use pipeline::{ExecutionPipeline, PipelineState};
pub use scheduler::{CycleHook, RunError, RunHooks, Scheduler, SchedulerOptions};
