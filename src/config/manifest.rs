//! Test manifest loading
//!
//! A manifest is an ordered list of descriptors in YAML or JSON. Relative test
//! directories resolve against the manifest's own directory.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::{file::is_yaml_file, ConfigError};
use crate::models::TestDescriptor;

/// Ordered descriptor list read from a manifest file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestManifest {
    pub tests: Vec<TestDescriptor>,
}

impl TestManifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let mut manifest: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?
        } else {
            serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for test in &mut manifest.tests {
            if test.test_dir.as_os_str().is_empty() {
                test.test_dir = base.join(&test.id);
            } else if test.test_dir.is_relative() {
                test.test_dir = base.join(&test.test_dir);
            }
        }

        manifest.validate()?;
        Ok(manifest)
    }

    /// Reject duplicate (id, mode) pairs
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for test in &self.tests {
            if test.id.is_empty() {
                return Err(ConfigError::Invalid("test with empty id".into()));
            }
            if !seen.insert(test.id_with_mode()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate test {}",
                    test.id_with_mode()
                )));
            }
        }
        Ok(())
    }

    /// Descriptors to run, in manifest order, optionally restricted to one mode
    pub fn select(&self, mode: Option<&str>) -> Vec<Arc<TestDescriptor>> {
        self.tests
            .iter()
            .filter(|t| match mode {
                Some(mode) => t.mode.as_deref() == Some(mode),
                None => true,
            })
            .cloned()
            .map(Arc::new)
            .collect()
    }
}
