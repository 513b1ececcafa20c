//! Application layer of the settings screen.
//!
//! Sits between the pure engine in `proxy_settings_core` and the adapters in
//! [`crate::infrastructure`].  Code here depends only on traits and domain
//! types: no files, no channels, no terminal.
//!
//! - **`settings_session`**: [`SettingsSession`](settings_session::SettingsSession),
//!   the orchestrator that owns the store for one visit to the screen and
//!   runs every edit through validation, commit, dependency resolution and
//!   the change policy.
//!
//! - **`service_control`**: The [`ServiceController`](service_control::ServiceController)
//!   port to the background proxy service and the state gate in front of it.
//!
//! - **`screen`**: The [`ScreenBinder`](screen::ScreenBinder) port through
//!   which the session enables, hides and updates what the user sees.

pub mod screen;
pub mod service_control;
pub mod settings_session;
