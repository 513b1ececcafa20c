//! The configuration store and its persistence port.
//!
//! - [`config_store`]: [`ConfigStore`](config_store::ConfigStore): the single
//!   owner of every field value for the lifetime of one settings screen.
//! - [`backend`]: [`PersistedBackend`](backend::PersistedBackend), the
//!   long-lived key/value storage the store is seeded from and writes
//!   through to, plus an in-memory implementation.

pub mod backend;
pub mod config_store;
