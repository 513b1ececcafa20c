//! # proxy-settings-core
//!
//! Engine behind the settings screen of the proxy client.  A user edits typed
//! fields (ports, DNS endpoints, mux limits, routing toggles); each edit is
//! validated, committed to a single [`ConfigStore`], propagated to dependent
//! fields and UI affordances through the [`DependencyGraph`], and classified
//! by the [`ChangePolicy`] into the service action it requires.
//!
//! This crate has zero dependencies on OS APIs, UI frameworks, files or async
//! runtimes.  The application crate wires it to a real backend, a running
//! proxy service and a screen.
//!
//! # Architecture overview
//!
//! ```text
//! user edit ─► Validator ─► ConfigStore::set ─► subscribers
//!                                   │
//!                                   ├─► DependencyGraph::resolve ─► (target, enabled/visible)
//!                                   │                              └► recompute other fields
//!                                   └─► ChangePolicy::plan ─► immediate action
//!                                                          └► PendingBatch (Stop > Restart > Reload)
//! ```
//!
//! - **`domain`**: Pure data and rules: the field registry, validators, the
//!   static dependency graph, effect classes and the batching policy.
//!
//! - **`store`**: The [`ConfigStore`] itself (typed get/set, dirty flag,
//!   synchronous subscriptions with a re-entrancy guard) and the
//!   [`PersistedBackend`] port it writes through.

pub mod domain;
pub mod error;
pub mod store;

pub use domain::field::{Field, FieldKey, FieldSpec, FieldType, FieldValue};
pub use domain::graph::{
    Affordance, DependencyEdge, DependencyGraph, EdgeEffect, GraphError, PlatformCapabilities,
    Predicate, RecomputeRule, Resolution, StaticRule, Target,
};
pub use domain::policy::{
    ChangePlan, ChangePolicy, EffectClass, PendingAction, PendingBatch, PresentationRequest,
    ServiceState,
};
pub use domain::validator::{ValidationError, Validator};
pub use error::{ServiceError, SettingsError};
pub use store::backend::{BackendError, MemoryBackend, PersistedBackend};
pub use store::config_store::{ConfigStore, FieldChange, SubscriptionId, Topic};
