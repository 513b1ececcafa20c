//! Service infrastructure: implementations of
//! [`ServiceController`](crate::application::service_control::ServiceController).
//!
//! - `channel`: forwards requests over a tokio channel to a service task.
//! - `mock`: records requests; used by integration tests and dry runs.

pub mod channel;
pub mod mock;

pub use channel::{ChannelServiceController, ServiceCommand, ServiceReport};
pub use mock::RecordingServiceController;
