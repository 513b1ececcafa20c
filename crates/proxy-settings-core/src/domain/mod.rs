//! Domain entities for the settings engine.
//!
//! Everything here is a pure function of its inputs: no store access, no
//! service calls, no I/O.  That keeps each rule testable in isolation and lets
//! the store and the session compose them freely.
//!
//! - [`field`]: the statically typed field registry.
//! - [`validator`]: per-field input constraints.
//! - [`graph`]: which fields enable, reveal or recompute which targets.
//! - [`policy`]: effect classes and the service-action batching rules.

pub mod field;
pub mod graph;
pub mod policy;
pub mod validator;
