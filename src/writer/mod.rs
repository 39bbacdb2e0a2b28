//! Result writers
//!
//! Writers are notified of unit completion one at a time, under the same lock
//! used for console replay. Optional capabilities let a writer receive
//! published artifacts or inspect output files before they are purged.

mod console;
mod record;

pub use console::{
    ConsoleFailureAnnotationsWriter, ConsoleProgressWriter, ConsoleSummaryWriter,
    DEFAULT_ANNOTATION_FORMAT,
};
pub use record::{CsvResultsWriter, JsonResultsWriter, JSON_RESULTS_CATEGORY};

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::models::{RunDetails, TestUnit};

/// Output stream a console writer prints to
pub type ConsoleOut = Box<dyn Write + Send>;

/// Where a writer sits in the notification order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterKind {
    /// Persists results; only active when recording is enabled
    Record,
    /// Reports progress while the run is going
    Progress,
    /// Prints the final summary; always notified last
    Summary,
}

/// Receives artifacts published by other components, from any thread
pub trait ArtifactPublisher: Send + Sync {
    fn publish_artifact(&self, path: &Path, category: &str);
}

/// Offered each non-empty output file before it is considered for deletion
pub trait TestOutputVisitor: Send + Sync {
    /// Returns true to claim the file so no other visitor sees it
    fn visit_output_file(&self, unit: &TestUnit, path: &Path) -> bool;
}

/// Fans published artifacts out to every registered publisher
#[derive(Clone, Default)]
pub struct ArtifactHub {
    publishers: Arc<Mutex<Vec<Arc<dyn ArtifactPublisher>>>>,
}

impl ArtifactHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, publisher: Arc<dyn ArtifactPublisher>) {
        self.publishers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(publisher);
    }

    pub fn publish(&self, path: &Path, category: &str) {
        let publishers = self
            .publishers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for publisher in publishers {
            publisher.publish_artifact(path, category);
        }
    }
}

impl fmt::Debug for ArtifactHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactHub").finish_non_exhaustive()
    }
}

/// Everything a writer is told before the first unit runs
#[derive(Clone, Debug)]
pub struct WriterSetup {
    pub total_units: usize,
    pub cycles: usize,
    pub workers: usize,
    pub run_details: RunDetails,
    pub started_at: DateTime<Utc>,
    pub artifacts: ArtifactHub,
}

/// A pluggable consumer of run events
///
/// `process_result` receives the unit only for the duration of the call.
pub trait Writer: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> WriterKind {
        WriterKind::Record
    }

    /// Whether the writer takes part in a run with the given record flag
    fn is_enabled(&self, record: bool) -> bool {
        self.kind() != WriterKind::Record || record
    }

    fn setup(&mut self, _setup: &WriterSetup) -> Result<()> {
        Ok(())
    }

    fn process_test_starting(&mut self, _unit: &TestUnit) -> Result<()> {
        Ok(())
    }

    fn process_result(&mut self, unit: &TestUnit) -> Result<()>;

    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    fn artifact_publisher(&self) -> Option<Arc<dyn ArtifactPublisher>> {
        None
    }

    fn output_visitor(&self) -> Option<Arc<dyn TestOutputVisitor>> {
        None
    }
}

/// Put writers in notification order
///
/// Record and progress writers keep their configured order, the failure
/// annotations writer follows them, and summary writers always come last.
pub fn arrange_writers(
    configured: Vec<Box<dyn Writer>>,
    annotations: Box<dyn Writer>,
) -> Vec<Box<dyn Writer>> {
    let (summaries, mut ordered): (Vec<_>, Vec<_>) = configured
        .into_iter()
        .partition(|w| w.kind() == WriterKind::Summary);
    ordered.push(annotations);
    ordered.extend(summaries);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, WriterKind);

    impl Writer for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn kind(&self) -> WriterKind {
            self.1
        }

        fn process_result(&mut self, _unit: &TestUnit) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_arrange_puts_summary_last() {
        let configured: Vec<Box<dyn Writer>> = vec![
            Box::new(Named("summary", WriterKind::Summary)),
            Box::new(Named("json", WriterKind::Record)),
            Box::new(Named("progress", WriterKind::Progress)),
            Box::new(Named("csv", WriterKind::Record)),
        ];
        let arranged = arrange_writers(
            configured,
            Box::new(Named("annotations", WriterKind::Progress)),
        );
        let names: Vec<_> = arranged.iter().map(|w| w.name().to_string()).collect();
        assert_eq!(names, vec!["json", "progress", "csv", "annotations", "summary"]);
    }

    #[test]
    fn test_record_writers_need_record_flag() {
        let record = Named("json", WriterKind::Record);
        let summary = Named("summary", WriterKind::Summary);
        assert!(!record.is_enabled(false));
        assert!(record.is_enabled(true));
        assert!(summary.is_enabled(false));
    }

    #[test]
    fn test_artifact_hub_fans_out() {
        #[derive(Default)]
        struct Collect(Mutex<Vec<String>>);
        impl ArtifactPublisher for Collect {
            fn publish_artifact(&self, path: &Path, category: &str) {
                self.0
                    .lock()
                    .unwrap()
                    .push(format!("{category}:{}", path.display()));
            }
        }

        let hub = ArtifactHub::new();
        let first = Arc::new(Collect::default());
        let second = Arc::new(Collect::default());
        hub.register(first.clone());
        hub.register(second.clone());

        hub.publish(Path::new("results.json"), "JSONResults");
        assert_eq!(first.0.lock().unwrap().as_slice(), ["JSONResults:results.json"]);
        assert_eq!(second.0.lock().unwrap().len(), 1);
    }
}
