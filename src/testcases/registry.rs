//! Test registry
//!
//! Maps the class name declared by a descriptor to a factory for its logic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{CommandTest, TestCase};
use crate::models::TestDescriptor;

type Factory = Arc<dyn Fn(&TestDescriptor) -> Box<dyn TestCase> + Send + Sync>;

/// Factories for test logic keyed by class name
#[derive(Clone, Default)]
pub struct TestRegistry {
    factories: HashMap<String, Factory>,
}

impl TestRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `command` test
    pub fn with_builtins() -> Self {
        Self::new().with(CommandTest::CLASS_NAME, |_| Box::new(CommandTest::new()))
    }

    pub fn register<F>(&mut self, class_name: impl Into<String>, factory: F)
    where
        F: Fn(&TestDescriptor) -> Box<dyn TestCase> + Send + Sync + 'static,
    {
        self.factories.insert(class_name.into(), Arc::new(factory));
    }

    pub fn with<F>(mut self, class_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&TestDescriptor) -> Box<dyn TestCase> + Send + Sync + 'static,
    {
        self.register(class_name, factory);
        self
    }

    /// Instantiate the logic declared by `descriptor`, if its class is known
    pub fn create(&self, descriptor: &TestDescriptor) -> Option<Box<dyn TestCase>> {
        self.factories
            .get(&descriptor.class_name)
            .map(|factory| factory(descriptor))
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }

    /// Registered class names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for TestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRegistry")
            .field("classes", &self.names())
            .finish()
    }
}
