//! TOML-based application configuration.
//!
//! Reads and writes [`AppConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\ProxySettings\config.toml`
//! - Linux:    `~/.config/proxy-settings/config.toml`
//! - macOS:    `~/Library/Application Support/ProxySettings/config.toml`
//!
//! This file configures the host, not the proxy.  The user-editable proxy
//! settings live in a separate settings file (see
//! [`settings_file`](super::settings_file)); `[storage] settings_file` says
//! where.
//!
//! ```toml
//! [storage]
//! settings_file = "/var/lib/proxy/settings.toml"
//!
//! [platform]
//! metered_network = true
//!
//! [session]
//! strict_contracts = false
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Every section and key may be omitted; `#[serde(default = "...")]` fills
//! the gaps so a first run works without any file at all.

use std::path::{Path, PathBuf};

use proxy_settings_core::PlatformCapabilities;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::settings_session::SessionOptions;

/// Name of the settings file placed next to the config file by default.
pub const DEFAULT_SETTINGS_FILE: &str = "settings.toml";

/// Error type for configuration and settings file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The content could not be serialized to TOML.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The config file exists and overwriting was not requested.
    #[error("{0} already exists, pass --force to overwrite")]
    AlreadyExists(PathBuf),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the proxy settings are persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Settings file path.  Defaults to `settings.toml` in the config directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,
}

/// Capabilities of the platform the host runs on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformConfig {
    /// Whether the OS reports metered networks.  When `false` the
    /// metered-network field is removed from the screen.
    #[serde(default = "default_true")]
    pub metered_network: bool,
}

/// Settings-session behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Fail edits whose subscribers mutate their own field.  Unset means
    /// "strict in debug builds only".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_contracts: Option<bool>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`
    /// or any `EnvFilter` directive.  `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            metered_network: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Session options derived from this configuration.
    pub fn session_options(&self) -> SessionOptions {
        let defaults = SessionOptions::default();
        SessionOptions {
            capabilities: PlatformCapabilities {
                metered_network: self.platform.metered_network,
            },
            strict_contracts: self
                .session
                .strict_contracts
                .unwrap_or(defaults.strict_contracts),
        }
    }

    /// Resolves the settings file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoPlatformConfigDir`] when no path is configured
    /// and the platform directory cannot be determined.
    pub fn settings_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.settings_file {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join(DEFAULT_SETTINGS_FILE)),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file, returning
/// `AppConfig::default()` if the file does not yet exist.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform config file.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    write_file(path, &content)
}

/// Writes `config` to `path`, or to the platform config file when `path` is
/// `None`, and returns the path written.
///
/// # Errors
///
/// Returns [`ConfigError::AlreadyExists`] when the file exists and `force`
/// is false, and the [`save_config_to`] errors otherwise.
pub fn init_config_file(
    config: &AppConfig,
    path: Option<&Path>,
    force: bool,
) -> Result<PathBuf, ConfigError> {
    let target = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    if target.exists() && !force {
        return Err(ConfigError::AlreadyExists(target));
    }
    match path {
        Some(path) => save_config_to(config, path)?,
        None => save_config(config)?,
    }
    Ok(target)
}

/// Writes `content` to `path`, creating the parent directory first.
pub(crate) fn write_file(path: &Path, content: &str) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory, including the application folder.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("ProxySettings"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("proxy-settings"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("ProxySettings")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
