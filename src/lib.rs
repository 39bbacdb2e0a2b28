//! Concurrent system test runner
//!
//! Executes an ordered list of test descriptors for one or more cycles on a
//! pool of workers. Each unit gets its own output directory and log sinks;
//! results are aggregated under a single lock and fanned out to writers.
//!
//! The usual entry point is [`executor::Scheduler`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use systest_runner::config::TestManifest;
//! use systest_runner::executor::{Scheduler, SchedulerOptions};
//! use systest_runner::logging::LogRouter;
//! use systest_runner::testcases::TestRegistry;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let manifest = TestManifest::load("tests.yaml")?;
//! let options = SchedulerOptions { workers: 4, ..Default::default() };
//! let report = Scheduler::new(
//!     options,
//!     Arc::new(TestRegistry::with_builtins()),
//!     Arc::new(LogRouter::default()),
//! )
//! .run(&manifest.select(None))
//! .await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod executor;
pub mod logging;
pub mod models;
pub mod output;
pub mod perf;
pub mod testcases;
pub mod utils;
pub mod writer;
