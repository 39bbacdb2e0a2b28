//! Test descriptor model
//!
//! Descriptors arrive already discovered and mode-expanded; the runner only reads them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn default_output() -> PathBuf {
    PathBuf::from("Output")
}

fn default_input() -> PathBuf {
    PathBuf::from("Input")
}

fn default_reference() -> PathBuf {
    PathBuf::from("Reference")
}

fn default_class() -> String {
    "command".to_string()
}

/// Immutable description of one runnable test
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestDescriptor {
    /// Stable test identifier
    pub id: String,

    /// Mode this descriptor was expanded for, if any
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub title: String,

    /// Registry name of the test logic to instantiate
    #[serde(default = "default_class")]
    pub class_name: String,

    /// Module or file the test logic is declared in, for reporting
    #[serde(default)]
    pub module: Option<PathBuf>,

    #[serde(default)]
    pub groups: Vec<String>,

    /// Directory containing the test
    #[serde(default)]
    pub test_dir: PathBuf,

    #[serde(default = "default_output")]
    pub output: PathBuf,

    #[serde(default = "default_input")]
    pub input: PathBuf,

    #[serde(default = "default_reference")]
    pub reference: PathBuf,

    /// Present when the test must not be executed
    #[serde(default)]
    pub skipped_reason: Option<String>,

    /// Free-form properties consumed by the test logic
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl TestDescriptor {
    pub fn new(id: impl Into<String>, test_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            mode: None,
            title: String::new(),
            class_name: default_class(),
            module: None,
            groups: Vec::new(),
            test_dir: test_dir.into(),
            output: default_output(),
            input: default_input(),
            reference: default_reference(),
            skipped_reason: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.skipped_reason = Some(reason.into());
        self
    }

    /// Id including the mode suffix, e.g. `MyTest~fast`
    pub fn id_with_mode(&self) -> String {
        match &self.mode {
            Some(mode) => format!("{}~{}", self.id, mode),
            None => self.id.clone(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.test_dir.join(path)
        }
    }

    pub fn output_root(&self) -> PathBuf {
        self.resolve(&self.output)
    }

    pub fn input_dir(&self) -> PathBuf {
        self.resolve(&self.input)
    }

    pub fn reference_dir(&self) -> PathBuf {
        self.resolve(&self.reference)
    }

    /// The declared test file, falling back to the test directory
    pub fn test_file(&self) -> PathBuf {
        self.module
            .as_deref()
            .map(|m| self.resolve(m))
            .unwrap_or_else(|| self.test_dir.clone())
    }
}
