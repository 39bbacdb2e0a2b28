//! Logging configuration and per-unit log routing
//!
//! The console layer prints everything emitted outside a unit; events emitted
//! while a unit's sinks are attached go only to those sinks.

mod router;
mod sink;

pub use router::{Console, LogRouter, ReplayPolicy, RoutingLayer, SinkGuard};
pub use sink::{BufferedSink, FileSink, LogLine, LogSink, SharedBuffer};

use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::filter::{filter_fn, FilterExt, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Log level configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Install the process-wide subscriber: console output plus unit routing
pub fn init_logger(level: LogLevel, router: Arc<LogRouter>) {
    let console_filter = EnvFilter::new(format!(
        "systest_runner={level},systest={level}",
        level = level.to_tracing_level()
    ));
    let unrouted = router.clone();

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(console_filter.and(filter_fn(move |_| !unrouted.is_routed())));

    let routing = RoutingLayer::new(router).with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(console)
        .with(routing)
        .init();
}
