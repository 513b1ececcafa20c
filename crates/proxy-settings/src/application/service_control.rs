//! Port to the background proxy service, and the gate every request passes.
//!
//! The service owns its lifecycle; the settings engine only asks it to
//! reload, restart or stop.  Requests are fire-and-forget: a request that the
//! current [`ServiceState`] does not accept is silently skipped, and a request
//! that fails is reported but never undoes the configuration change that
//! caused it.

use proxy_settings_core::{PendingAction, ServiceError, ServiceState};
use tracing::{debug, info};

/// Controller of the background proxy service.
///
/// Infrastructure implementations talk to a real service over a channel; test
/// implementations record calls.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceController: Send + Sync {
    /// Current lifecycle state.
    fn state(&self) -> ServiceState;

    /// `true` when the service is started.
    fn is_running(&self) -> bool {
        self.state().is_started()
    }

    /// Asks the service to re-read its configuration without dropping
    /// connections.
    fn reload(&self) -> Result<(), ServiceError>;

    /// Asks the service to restart with the current configuration.
    fn restart(&self) -> Result<(), ServiceError>;

    /// Asks the service to stop.
    fn stop(&self) -> Result<(), ServiceError>;
}

/// Sends `action` to `controller` if its current state accepts it.
///
/// Returns `Ok(true)` when a request went out, `Ok(false)` when there was
/// nothing to send or the state did not permit it.
///
/// # Errors
///
/// Propagates the controller's [`ServiceError`].
pub fn request(
    controller: &dyn ServiceController,
    action: PendingAction,
) -> Result<bool, ServiceError> {
    if action.is_none() {
        return Ok(false);
    }

    let state = controller.state();
    if !action.permitted_in(state) {
        debug!(action = action.label(), ?state, "service state does not accept request, skipped");
        return Ok(false);
    }

    match action {
        PendingAction::Reload => controller.reload()?,
        PendingAction::Restart => controller.restart()?,
        PendingAction::Stop => controller.stop()?,
        PendingAction::None => return Ok(false),
    }
    info!(action = action.label(), ?state, "service action requested");
    Ok(true)
}
