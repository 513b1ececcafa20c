//! Persisted key/value backend port.
//!
//! The backend outlives every settings screen.  The store reads each declared
//! field from it once when the screen opens and writes each committed value
//! back.  Keys are the stable field names from
//! [`FieldKey::name`](crate::FieldKey::name); the backend is told the declared
//! type on load so it can rebuild a typed value from whatever it stores.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::domain::field::{FieldType, FieldValue};

/// Error type for backend operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// A stored value cannot be read as the field's declared type.
    #[error("stored value for `{key}` is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    /// The underlying storage failed.
    #[error("backend storage failed: {0}")]
    Storage(String),
}

/// Long-lived storage for field values.
pub trait PersistedBackend {
    /// Loads the value stored under `key`, or `None` when absent.
    fn load(&self, key: &str, ty: FieldType) -> Result<Option<FieldValue>, BackendError>;

    /// Stores `value` under `key`.
    fn save(&mut self, key: &str, value: &FieldValue) -> Result<(), BackendError>;
}

/// In-memory backend.
///
/// Clones share the same map, so a test can keep a handle and inspect what the
/// store wrote after handing a clone to it.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    values: Arc<Mutex<BTreeMap<String, FieldValue>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with `(key, value)` pairs.
    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: Into<String>,
    {
        let map = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            values: Arc::new(Mutex::new(map)),
        }
    }

    /// Returns the raw stored value, bypassing type checks.
    pub fn stored(&self, key: &str) -> Option<FieldValue> {
        self.lock().ok()?.get(key).cloned()
    }

    /// Writes a value directly, as another screen or process would.
    pub fn put(&self, key: &str, value: FieldValue) {
        if let Ok(mut map) = self.lock() {
            map.insert(key.to_string(), value);
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, FieldValue>>, BackendError> {
        self.values
            .lock()
            .map_err(|_| BackendError::Storage("memory backend lock poisoned".to_string()))
    }
}

impl PersistedBackend for MemoryBackend {
    fn load(&self, key: &str, ty: FieldType) -> Result<Option<FieldValue>, BackendError> {
        match self.lock()?.get(key) {
            None => Ok(None),
            Some(value) if ty.accepts(value) => Ok(Some(value.clone())),
            Some(_) => Err(BackendError::TypeMismatch {
                key: key.to_string(),
                expected: ty.label(),
            }),
        }
    }

    fn save(&mut self, key: &str, value: &FieldValue) -> Result<(), BackendError> {
        self.lock()?.insert(key.to_string(), value.clone());
        Ok(())
    }
}
