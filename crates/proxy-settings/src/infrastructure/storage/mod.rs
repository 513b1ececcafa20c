//! Storage infrastructure: configuration and settings files.
//!
//! - `config`: the host's [`AppConfig`](config::AppConfig): where the
//!   settings file lives, platform capabilities, session strictness and the
//!   log level.  Defaults apply when the file does not exist yet.
//! - `settings_file`: [`TomlFileBackend`](settings_file::TomlFileBackend),
//!   the [`PersistedBackend`](proxy_settings_core::PersistedBackend) the
//!   settings screen reads from and writes through to.

pub mod config;
pub mod settings_file;
