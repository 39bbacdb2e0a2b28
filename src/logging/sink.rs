//! Log sinks
//!
//! Destinations a unit's log records can be routed to.

use chrono::{DateTime, Local};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::Level;

/// A single formatted log record
#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: Level,
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogLine {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Local::now(),
            message: message.into(),
        }
    }

    /// Short form used for console output
    pub fn console_format(&self) -> String {
        format!(
            "{} {:<5} {}",
            self.timestamp.format("%H:%M:%S"),
            self.level.as_str(),
            self.message
        )
    }

    /// Long form used in run.log
    pub fn file_format(&self) -> String {
        format!(
            "{} {:<5} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.level.as_str(),
            self.message
        )
    }
}

/// Destination for routed log records
pub trait LogSink: Send + Sync + fmt::Debug {
    fn write_line(&self, line: &LogLine);

    fn flush(&self) {}

    /// Release any held resources; later writes are dropped
    fn close(&self) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory sink holding console output for deferred replay
#[derive(Debug)]
pub struct BufferedSink {
    max_level: Level,
    lines: Mutex<Vec<String>>,
}

impl BufferedSink {
    pub fn new(max_level: Level) -> Self {
        Self {
            max_level,
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    pub fn text(&self) -> String {
        let lines = lock(&self.lines);
        let mut text = lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.lines).is_empty()
    }
}

impl LogSink for BufferedSink {
    fn write_line(&self, line: &LogLine) {
        if line.level <= self.max_level {
            lock(&self.lines).push(line.console_format());
        }
    }
}

/// Persistent per-unit log file
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    max_level: Level,
    file: Mutex<Option<BufWriter<File>>>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>, max_level: Level) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            max_level,
            file: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn write_line(&self, line: &LogLine) {
        if line.level > self.max_level {
            return;
        }
        if let Some(file) = lock(&self.file).as_mut() {
            // nowhere to report a failing log write
            let _ = writeln!(file, "{}", line.file_format());
        }
    }

    fn flush(&self) {
        if let Some(file) = lock(&self.file).as_mut() {
            let _ = file.flush();
        }
    }

    fn close(&self) {
        if let Some(mut file) = lock(&self.file).take() {
            let _ = file.flush();
        }
    }
}

/// Cloneable in-memory writer, handy for capturing console output
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.bytes)).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.bytes).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_buffered_sink_filters_level() {
        let sink = BufferedSink::new(Level::INFO);
        sink.write_line(&LogLine::new(Level::DEBUG, "hidden"));
        sink.write_line(&LogLine::new(Level::WARN, "shown"));

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("WARN  shown"));
    }

    #[test]
    fn test_file_sink_writes_until_closed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.log");
        let sink = FileSink::create(&path, Level::DEBUG).unwrap();

        sink.write_line(&LogLine::new(Level::DEBUG, "first"));
        sink.close();
        sink.write_line(&LogLine::new(Level::INFO, "after close"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("DEBUG first"));
        assert!(!content.contains("after close"));
    }
}
