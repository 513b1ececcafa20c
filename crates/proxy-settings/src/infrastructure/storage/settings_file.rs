//! Settings file backend.
//!
//! Field values live in a flat `[settings]` table keyed by the stable field
//! name:
//!
//! ```toml
//! [settings]
//! mixedPort = 7890
//! remoteDns = "tls://1.1.1.1"
//! bypassLan = true
//! mux = ["h2mux", "smux"]
//! logLevel = "3"
//! ```
//!
//! The whole file is rewritten on every save.  Choice fields are stored as
//! strings; bare integers written by hand are accepted on load.

use std::path::{Path, PathBuf};

use proxy_settings_core::{BackendError, FieldType, FieldValue, PersistedBackend};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::{write_file, ConfigError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default)]
    settings: toml::Table,
}

/// [`PersistedBackend`] over a TOML file.
///
/// Nothing is cached: every load reads the file and every save rewrites it
/// from its current content, so values written by another screen or process
/// are seen on the next load and are not clobbered.
#[derive(Debug, Clone)]
pub struct TomlFileBackend {
    path: PathBuf,
}

impl TomlFileBackend {
    /// Opens the settings file at `path`.  A missing file is an empty one;
    /// it is created on the first save.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file exists but cannot be read and
    /// [`ConfigError::Parse`] if it is not valid TOML.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let backend = Self { path: path.into() };
        let settings = backend.read()?;
        debug!(path = %backend.path.display(), keys = settings.len(), "settings file opened");
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<toml::Table, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(toml::from_str::<SettingsDocument>(&content)?.settings),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(toml::Table::new()),
            Err(source) => Err(ConfigError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write(&self, settings: toml::Table) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(&SettingsDocument { settings })?;
        write_file(&self.path, &content)
    }
}

impl PersistedBackend for TomlFileBackend {
    fn load(&self, key: &str, ty: FieldType) -> Result<Option<FieldValue>, BackendError> {
        let settings = self.read().map_err(storage_error)?;
        settings
            .get(key)
            .map(|value| from_toml(key, value, ty))
            .transpose()
    }

    fn save(&mut self, key: &str, value: &FieldValue) -> Result<(), BackendError> {
        let mut settings = self.read().map_err(storage_error)?;
        settings.insert(key.to_string(), to_toml(value));
        self.write(settings).map_err(storage_error)
    }
}

fn storage_error(e: ConfigError) -> BackendError {
    BackendError::Storage(e.to_string())
}

fn to_toml(value: &FieldValue) -> toml::Value {
    match value {
        FieldValue::Int(n) => toml::Value::Integer(*n),
        FieldValue::Str(s) | FieldValue::Enum(s) => toml::Value::String(s.clone()),
        FieldValue::Bool(b) => toml::Value::Boolean(*b),
        FieldValue::StrSet(items) => toml::Value::Array(
            items
                .iter()
                .map(|item| toml::Value::String(item.clone()))
                .collect(),
        ),
    }
}

fn from_toml(key: &str, value: &toml::Value, ty: FieldType) -> Result<FieldValue, BackendError> {
    let mismatch = || BackendError::TypeMismatch {
        key: key.to_string(),
        expected: ty.label(),
    };
    match (ty, value) {
        (FieldType::Integer, toml::Value::Integer(n)) => Ok(FieldValue::Int(*n)),
        (FieldType::String, toml::Value::String(s)) => Ok(FieldValue::Str(s.clone())),
        (FieldType::Boolean, toml::Value::Boolean(b)) => Ok(FieldValue::Bool(*b)),
        (FieldType::Enum(_), toml::Value::String(s)) => Ok(FieldValue::Enum(s.clone())),
        (FieldType::Enum(_), toml::Value::Integer(n)) => Ok(FieldValue::Enum(n.to_string())),
        (FieldType::StringSet, toml::Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(mismatch))
            .collect::<Result<_, _>>()
            .map(FieldValue::StrSet),
        _ => Err(mismatch()),
    }
}
