//! Service controller backed by a tokio channel.
//!
//! The settings engine is synchronous; the proxy service is not.  Requests are
//! pushed onto an unbounded channel, which never blocks the caller, and a
//! service task applies them in order.  The task publishes its lifecycle
//! state through a `watch` channel that the controller reads synchronously.
//!
//! ```text
//! SettingsSession ─► ChannelServiceController ──mpsc──► run_service task
//!        ▲                      │                            │
//!        └──── state() ◄─────── watch ◄──────────────────────┘
//! ```

use proxy_settings_core::{ServiceError, ServiceState};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::service_control::ServiceController;

/// Request sent to the service task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCommand {
    Reload,
    Restart,
    Stop,
}

/// What the service task did before its command channel closed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub reloads: u32,
    pub restarts: u32,
    pub stops: u32,
    /// Commands the service state did not accept when they arrived.
    pub ignored: u32,
}

/// [`ServiceController`] that forwards requests to a service task.
#[derive(Debug, Clone)]
pub struct ChannelServiceController {
    commands: mpsc::UnboundedSender<ServiceCommand>,
    state: watch::Receiver<ServiceState>,
}

impl ChannelServiceController {
    pub fn new(
        commands: mpsc::UnboundedSender<ServiceCommand>,
        state: watch::Receiver<ServiceState>,
    ) -> Self {
        Self { commands, state }
    }

    /// Spawns [`run_service`] on the current runtime, starting in `initial`,
    /// and returns a controller connected to it.
    ///
    /// The task ends once every clone of the controller has been dropped.
    pub fn spawn(initial: ServiceState) -> (Self, JoinHandle<ServiceReport>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial);
        let handle = tokio::spawn(run_service(command_rx, state_tx));
        (Self::new(command_tx, state_rx), handle)
    }

    /// A receiver that observes the service state independently of this
    /// controller.
    pub fn state_receiver(&self) -> watch::Receiver<ServiceState> {
        self.state.clone()
    }

    fn send(&self, command: ServiceCommand) -> Result<(), ServiceError> {
        self.commands
            .send(command)
            .map_err(|_| ServiceError::Unavailable("service task has exited".to_string()))?;
        debug!(?command, "service command queued");
        Ok(())
    }
}

impl ServiceController for ChannelServiceController {
    fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    fn reload(&self) -> Result<(), ServiceError> {
        self.send(ServiceCommand::Reload)
    }

    fn restart(&self) -> Result<(), ServiceError> {
        self.send(ServiceCommand::Restart)
    }

    fn stop(&self) -> Result<(), ServiceError> {
        self.send(ServiceCommand::Stop)
    }
}

/// Local stand-in for the proxy service: applies commands to the lifecycle
/// state machine until the command channel closes.
pub async fn run_service(
    mut commands: mpsc::UnboundedReceiver<ServiceCommand>,
    state: watch::Sender<ServiceState>,
) -> ServiceReport {
    let mut report = ServiceReport::default();

    while let Some(command) = commands.recv().await {
        let current = *state.borrow();
        match command {
            ServiceCommand::Reload if current.is_started() => {
                report.reloads += 1;
                info!("service reloaded its configuration");
            }
            ServiceCommand::Restart if current.is_started() => {
                state.send_replace(ServiceState::Stopping);
                state.send_replace(ServiceState::Starting);
                state.send_replace(ServiceState::Started);
                report.restarts += 1;
                info!("service restarted");
            }
            ServiceCommand::Stop if current.is_running() => {
                state.send_replace(ServiceState::Stopping);
                state.send_replace(ServiceState::Stopped);
                report.stops += 1;
                info!("service stopped");
            }
            _ => {
                report.ignored += 1;
                warn!(?command, ?current, "service ignored command in its current state");
            }
        }
    }

    debug!(?report, "service command channel closed");
    report
}
