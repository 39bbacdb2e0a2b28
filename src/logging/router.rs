//! Per-thread log routing
//!
//! Every log record is delivered only to the sink set registered for the thread
//! that emitted it. Buffered console output is replayed under one lock so that
//! two units never interleave on the real console.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::sink::{LogLine, LogSink};
use crate::models::{Outcome, TestUnit};

type SinkSet = Arc<[Arc<dyn LogSink>]>;

/// When a unit's buffered console output is written to the real console
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplayPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

impl ReplayPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "always" => Some(ReplayPolicy::Always),
            "on-failure" | "onfailure" | "failures" => Some(ReplayPolicy::OnFailure),
            "never" => Some(ReplayPolicy::Never),
            _ => None,
        }
    }

    pub fn should_replay(self, outcome: Outcome) -> bool {
        match self {
            ReplayPolicy::Always => true,
            ReplayPolicy::OnFailure => outcome.is_failure(),
            ReplayPolicy::Never => false,
        }
    }
}

/// The real console that replayed output is written to
pub struct Console {
    out: Box<dyn Write + Send>,
}

impl Console {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    pub fn write_lines(&mut self, lines: &[String]) -> io::Result<()> {
        for line in lines {
            writeln!(self.out, "{line}")?;
        }
        self.out.flush()
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

/// Registry mapping each thread to the sink set its records go to
#[derive(Debug)]
pub struct LogRouter {
    routes: Mutex<HashMap<ThreadId, SinkSet>>,
    console: Mutex<Console>,
}

impl LogRouter {
    pub fn new(console: Console) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            console: Mutex::new(console),
        }
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<ThreadId, SinkSet>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the calling thread's sink set until the guard is dropped
    pub fn attach(&self, sinks: Vec<Arc<dyn LogSink>>) -> SinkGuard<'_> {
        let thread = thread::current().id();
        let sinks: SinkSet = sinks.into();
        let previous = self.routes().insert(thread, sinks.clone());
        SinkGuard {
            router: self,
            thread,
            sinks,
            previous,
        }
    }

    /// Whether the calling thread currently has sinks registered
    pub fn is_routed(&self) -> bool {
        self.routes().contains_key(&thread::current().id())
    }

    /// Deliver a record to the calling thread's sinks; discarded if none
    pub fn dispatch(&self, line: &LogLine) {
        let sinks = self.routes().get(&thread::current().id()).cloned();
        if let Some(sinks) = sinks {
            for sink in sinks.iter() {
                sink.write_line(line);
            }
        }
    }

    /// Acquire the console serialization lock
    pub fn lock_console(&self) -> MutexGuard<'_, Console> {
        self.console.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replay a unit's buffered output if the policy allows it
    pub fn replay(&self, unit: &TestUnit, policy: ReplayPolicy) -> io::Result<bool> {
        let mut console = self.lock_console();
        Self::replay_locked(&mut console, unit, policy)
    }

    /// Replay while the caller already holds the console lock
    pub fn replay_locked(
        console: &mut Console,
        unit: &TestUnit,
        policy: ReplayPolicy,
    ) -> io::Result<bool> {
        if !policy.should_replay(unit.current_outcome()) {
            return Ok(false);
        }
        console.write_lines(&unit.console().lines())?;
        Ok(true)
    }
}

impl Default for LogRouter {
    fn default() -> Self {
        Self::new(Console::stdout())
    }
}

/// Restores the previous sink set of its thread when dropped
pub struct SinkGuard<'a> {
    router: &'a LogRouter,
    thread: ThreadId,
    sinks: SinkSet,
    previous: Option<SinkSet>,
}

impl Drop for SinkGuard<'_> {
    fn drop(&mut self) {
        for sink in self.sinks.iter() {
            sink.flush();
            sink.close();
        }
        let mut routes = self.router.routes();
        match self.previous.take() {
            Some(previous) => {
                routes.insert(self.thread, previous);
            }
            None => {
                routes.remove(&self.thread);
            }
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// `tracing` layer feeding events into a [`LogRouter`]
pub struct RoutingLayer {
    router: Arc<LogRouter>,
}

impl RoutingLayer {
    pub fn new(router: Arc<LogRouter>) -> Self {
        Self { router }
    }
}

impl<S: Subscriber> Layer<S> for RoutingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.router.is_routed() {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.router
            .dispatch(&LogLine::new(*event.metadata().level(), visitor.finish()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{BufferedSink, SharedBuffer};
    use crate::models::TestDescriptor;
    use tracing::Level;
    use tracing_subscriber::prelude::*;

    fn sink() -> Arc<BufferedSink> {
        Arc::new(BufferedSink::new(Level::DEBUG))
    }

    #[test]
    fn test_default_route_discards() {
        let router = LogRouter::new(Console::new(SharedBuffer::new()));
        assert!(!router.is_routed());
        router.dispatch(&LogLine::new(Level::INFO, "nobody listens"));
    }

    #[test]
    fn test_attach_replaces_and_detach_restores() {
        let router = LogRouter::new(Console::new(SharedBuffer::new()));
        let outer = sink();
        let inner = sink();

        let outer_guard = router.attach(vec![outer.clone() as Arc<dyn LogSink>]);
        router.dispatch(&LogLine::new(Level::INFO, "outer 1"));
        {
            let _inner_guard = router.attach(vec![inner.clone() as Arc<dyn LogSink>]);
            router.dispatch(&LogLine::new(Level::INFO, "inner"));
        }
        router.dispatch(&LogLine::new(Level::INFO, "outer 2"));
        drop(outer_guard);
        assert!(!router.is_routed());

        assert_eq!(outer.lines().len(), 2);
        assert_eq!(inner.lines().len(), 1);
        assert!(inner.lines()[0].ends_with("inner"));
    }

    #[test]
    fn test_routes_are_per_thread() {
        let router = Arc::new(LogRouter::new(Console::new(SharedBuffer::new())));
        let mine = sink();
        let _guard = router.attach(vec![mine.clone() as Arc<dyn LogSink>]);

        let other = router.clone();
        std::thread::spawn(move || {
            assert!(!other.is_routed());
            other.dispatch(&LogLine::new(Level::INFO, "from another thread"));
        })
        .join()
        .unwrap();

        assert!(mine.is_empty());
    }

    #[test]
    fn test_layer_delivers_tracing_events() {
        let router = Arc::new(LogRouter::new(Console::new(SharedBuffer::new())));
        let subscriber =
            tracing_subscriber::registry().with(RoutingLayer::new(router.clone()));
        let captured = sink();

        tracing::subscriber::with_default(subscriber, || {
            let _guard = router.attach(vec![captured.clone() as Arc<dyn LogSink>]);
            tracing::info!(attempt = 2, "Starting server");
        });

        let lines = captured.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Starting server attempt=2"));
    }

    #[test]
    fn test_replay_policy() {
        let buffer = SharedBuffer::new();
        let router = LogRouter::new(Console::new(buffer.clone()));
        let mut unit = TestUnit::new(Arc::new(TestDescriptor::new("R_001", "/t")), 0);
        unit.console().write_line(&LogLine::new(Level::INFO, "hello from R_001"));
        unit.add_outcome(Outcome::Passed, "");

        assert!(!router.replay(&unit, ReplayPolicy::OnFailure).unwrap());
        assert!(!router.replay(&unit, ReplayPolicy::Never).unwrap());
        assert!(buffer.contents().is_empty());

        assert!(router.replay(&unit, ReplayPolicy::Always).unwrap());
        assert!(buffer.contents().contains("hello from R_001"));
    }

    #[test]
    fn test_replay_policy_from_str() {
        assert_eq!(ReplayPolicy::from_str("on-failure"), Some(ReplayPolicy::OnFailure));
        assert_eq!(ReplayPolicy::from_str("ALWAYS"), Some(ReplayPolicy::Always));
        assert_eq!(ReplayPolicy::from_str("sometimes"), None);
    }
}
