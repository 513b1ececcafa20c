//! Recording service controller for tests and dry runs.
//!
//! Records every request instead of talking to a service, and can be told to
//! fail them.  Optionally follows the lifecycle the way a real service would,
//! so that a stop is visible to later requests.

use std::sync::{Mutex, MutexGuard, PoisonError};

use proxy_settings_core::{PendingAction, ServiceError, ServiceState};

use crate::application::service_control::ServiceController;

/// A [`ServiceController`] that records requests.
#[derive(Debug)]
pub struct RecordingServiceController {
    state: Mutex<ServiceState>,
    calls: Mutex<Vec<PendingAction>>,
    failure: Mutex<Option<ServiceError>>,
    follow_transitions: bool,
}

impl RecordingServiceController {
    /// Creates a controller whose state never changes on its own.
    pub fn new(state: ServiceState) -> Self {
        Self {
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            follow_transitions: false,
        }
    }

    /// Creates a controller that moves to `Stopped` when asked to stop.
    pub fn following(state: ServiceState) -> Self {
        Self {
            follow_transitions: true,
            ..Self::new(state)
        }
    }

    /// Makes every following request fail with `error` (still recorded).
    pub fn fail_with(&self, error: ServiceError) {
        *lock(&self.failure) = Some(error);
    }

    pub fn set_state(&self, state: ServiceState) {
        *lock(&self.state) = state;
    }

    /// Requests received so far, in order.
    pub fn calls(&self) -> Vec<PendingAction> {
        lock(&self.calls).clone()
    }

    fn record(&self, action: PendingAction) -> Result<(), ServiceError> {
        lock(&self.calls).push(action);
        if let Some(error) = lock(&self.failure).clone() {
            return Err(error);
        }
        if self.follow_transitions && action == PendingAction::Stop {
            *lock(&self.state) = ServiceState::Stopped;
        }
        Ok(())
    }
}

impl Default for RecordingServiceController {
    fn default() -> Self {
        Self::new(ServiceState::Stopped)
    }
}

impl ServiceController for RecordingServiceController {
    fn state(&self) -> ServiceState {
        *lock(&self.state)
    }

    fn reload(&self) -> Result<(), ServiceError> {
        self.record(PendingAction::Reload)
    }

    fn restart(&self) -> Result<(), ServiceError> {
        self.record(PendingAction::Restart)
    }

    fn stop(&self) -> Result<(), ServiceError> {
        self.record(PendingAction::Stop)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
