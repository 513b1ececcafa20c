//! Infrastructure layer for the settings engine.
//!
//! Contains the adapters behind the application ports: the TOML settings
//! file and app config, service controllers, and the UI bridge that turns
//! binder calls into serialisable events.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `proxy_settings_core`, but MUST NOT be imported by the `application` layer.

pub mod service;
pub mod storage;
pub mod ui_bridge;
