//! Run metadata
//!
//! Details are collected mutably during setup and frozen before any unit is dispatched.

use chrono::Utc;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Mutable collector for run details; consumed by [`RunDetailsBuilder::freeze`]
#[derive(Clone, Debug, Default)]
pub struct RunDetailsBuilder {
    entries: BTreeMap<String, String>,
}

impl RunDetailsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated with host, platform and start time
    pub fn with_defaults() -> Self {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "localhost".to_string());

        Self::new()
            .set("hostname", hostname)
            .set("os", std::env::consts::OS)
            .set("arch", std::env::consts::ARCH)
            .set("startTime", Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .set("runnerVersion", env!("CARGO_PKG_VERSION"))
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn freeze(self) -> RunDetails {
        RunDetails {
            entries: Arc::new(self.entries),
        }
    }
}

/// Read-only snapshot of run metadata shared by every unit and writer
#[derive(Clone, Debug, Default)]
pub struct RunDetails {
    entries: Arc<BTreeMap<String, String>>,
}

impl Serialize for RunDetails {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.as_ref().serialize(serializer)
    }
}

impl RunDetails {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freeze_shares_snapshot() {
        let details = RunDetailsBuilder::new()
            .set("cycles", "2")
            .set("workers", "4")
            .freeze();
        let copy = details.clone();

        assert_eq!(copy.get("cycles"), Some("2"));
        assert_eq!(copy.len(), 2);
        assert!(Arc::ptr_eq(&details.entries, &copy.entries));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let details = RunDetailsBuilder::new()
            .set("workers", "4")
            .set("cycles", "2")
            .freeze();
        let json = serde_json::to_string(&details).unwrap();
        assert_eq!(json, r#"{"cycles":"2","workers":"4"}"#);
    }

    #[test]
    fn test_defaults_present() {
        let details = RunDetailsBuilder::with_defaults().freeze();
        assert_eq!(details.get("os"), Some(std::env::consts::OS));
        assert!(details.get("startTime").is_some());
    }
}
