//! Workflow context - shared key-value state for one run

use serde_json::{Map, Value};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Owned copy of a context's contents
pub type ContextData = Map<String, Value>;

/// Execution context for a workflow run
///
/// A cheap-to-clone handle: every clone shares the same underlying store, so
/// the stages and gate checks of one run all see each other's writes. Use
/// [`WorkflowContext::snapshot`] for an independent deep copy.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    inner: Arc<RwLock<ContextData>>,
}

impl WorkflowContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context holding the given data
    pub fn from_data(data: ContextData) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ContextData> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ContextData> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a value (cloned out of the store)
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Set a value, returning the previous one
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.write().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Deep copy of the current contents
    pub fn snapshot(&self) -> ContextData {
        self.read().clone()
    }

    /// Overwrite keys with the given data; keys absent from `data` are kept
    pub fn merge(&self, data: ContextData) {
        self.write().extend(data);
    }
}
