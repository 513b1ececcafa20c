//! Change policy: which service action a field change requires.
//!
//! Every field belongs to one [`EffectClass`].  When a change commits, the
//! class and the current [`ServiceState`] resolve to a [`PendingAction`]:
//!
//! ```text
//! Cosmetic      ─► None
//! NeedsReload   ─► Reload   if Started
//! NeedsRestart  ─► Restart  if Started
//! NeedsStop     ─► Stop     if Started or Starting
//! Destructive   ─► Stop     if Started or Starting, issued before the commit
//! ```
//!
//! Deferred actions are not executed one by one.  They accumulate in a
//! [`PendingBatch`] that keeps only the strongest (`Stop > Restart > Reload >
//! None`) and is flushed once, when the screen is left or the user applies.
//!
//! A few fields also act on the presentation layer.  Those requests are
//! returned in [`ChangePlan::presentation`] and never go through the batch.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::field::{FieldKey, FieldValue};

/// Lifecycle of the background proxy service.  Owned by the service controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl ServiceState {
    pub fn is_started(self) -> bool {
        self == ServiceState::Started
    }

    /// `Started` or on its way there.
    pub fn is_running(self) -> bool {
        matches!(self, ServiceState::Started | ServiceState::Starting)
    }
}

/// Category of disruption a field change causes to the live service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectClass {
    /// Presentation only; the service never notices.
    Cosmetic,
    NeedsReload,
    NeedsRestart,
    NeedsStop,
    /// The service must not keep running with the old value for even one
    /// moment after the commit, so it is stopped before the value is stored.
    Destructive,
}

/// Service action requested by a change or a batch of changes.
///
/// Variants are declared weakest first, so `Ord` is the batching precedence.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    #[default]
    None,
    Reload,
    Restart,
    Stop,
}

impl PendingAction {
    pub fn is_none(self) -> bool {
        self == PendingAction::None
    }

    /// The action that survives when both are pending.
    pub fn strongest(self, other: PendingAction) -> PendingAction {
        self.max(other)
    }

    /// Whether the service accepts this request in `state`.
    ///
    /// Reload and restart need a started service; stop also applies while
    /// the service is still starting.
    pub fn permitted_in(self, state: ServiceState) -> bool {
        match self {
            PendingAction::None => false,
            PendingAction::Reload | PendingAction::Restart => state.is_started(),
            PendingAction::Stop => state.is_running(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PendingAction::None => "none",
            PendingAction::Reload => "reload",
            PendingAction::Restart => "restart",
            PendingAction::Stop => "stop",
        }
    }
}

/// Request aimed at the presentation layer rather than the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum PresentationRequest {
    /// Re-apply the colour theme and recreate the screen.
    ReapplyTheme { theme: i64 },
    /// Re-apply the day/night mode.
    ReapplyNightMode { mode: String },
    /// Rebuild the navigation menu with or without the Clash API entry.
    RefreshNavMenu { clash_api: bool },
    /// Open the per-app proxy picker.
    OpenAppManager,
}

/// Everything one committed change asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePlan {
    /// Issued before the value is stored.
    pub before_commit: PendingAction,
    /// Issued right after the commit, outside the batch.
    pub immediate: PendingAction,
    /// Added to the pending batch.
    pub deferred: PendingAction,
    pub presentation: Vec<PresentationRequest>,
}

/// Static classification of fields into effect classes.
#[derive(Debug, Clone)]
pub struct ChangePolicy {
    classes: HashMap<FieldKey, EffectClass>,
}

impl ChangePolicy {
    /// The classification the settings screen ships with.
    pub fn standard() -> Self {
        use FieldKey::*;
        let reload = [
            MixedPort,
            AppendHttpProxy,
            ShowDirectSpeed,
            TrafficSniffing,
            MuxConcurrency,
            TcpKeepAliveInterval,
            BypassLan,
            BypassLanInCore,
            Mtu,
            EnableFakeDns,
            RemoteDns,
            DirectDns,
            EnableDnsRouting,
            LocalDnsPort,
            Ipv6Mode,
            AllowAccess,
            ResolveDestination,
            TunImplementation,
            AcquireWakeLock,
            SpeedInterval,
            EnableClashApi,
        ];

        let mut classes = HashMap::new();
        for key in reload {
            classes.insert(key, EffectClass::NeedsReload);
        }
        classes.insert(LogLevel, EffectClass::NeedsRestart);
        classes.insert(LogBufSize, EffectClass::NeedsRestart);
        classes.insert(ServiceMode, EffectClass::Destructive);
        Self { classes }
    }

    /// Returns a copy of this policy with `key` reclassified.
    pub fn with_class(mut self, key: FieldKey, class: EffectClass) -> Self {
        self.classes.insert(key, class);
        self
    }

    /// Effect class of `key`; unlisted fields are cosmetic.
    pub fn class_of(&self, key: FieldKey) -> EffectClass {
        self.classes
            .get(&key)
            .copied()
            .unwrap_or(EffectClass::Cosmetic)
    }

    /// Maps an effect class to the action it needs in `state`.
    pub fn resolve(class: EffectClass, state: ServiceState) -> PendingAction {
        match class {
            EffectClass::Cosmetic => PendingAction::None,
            EffectClass::NeedsReload if state.is_started() => PendingAction::Reload,
            EffectClass::NeedsRestart if state.is_started() => PendingAction::Restart,
            EffectClass::NeedsStop | EffectClass::Destructive if state.is_running() => {
                PendingAction::Stop
            }
            _ => PendingAction::None,
        }
    }

    /// Plans the consequences of `key` changing to `value` while the service
    /// is in `state`.
    pub fn plan(&self, key: FieldKey, value: &FieldValue, state: ServiceState) -> ChangePlan {
        let class = self.class_of(key);
        let action = Self::resolve(class, state);
        let mut plan = ChangePlan::default();
        if class == EffectClass::Destructive {
            plan.before_commit = action;
        } else {
            plan.deferred = action;
        }

        match key {
            FieldKey::AppTheme => {
                if state.is_started() {
                    plan.immediate = PendingAction::Reload;
                }
                if let Some(theme) = value.as_int() {
                    plan.presentation
                        .push(PresentationRequest::ReapplyTheme { theme });
                }
            }
            FieldKey::NightTheme => {
                if let Some(mode) = value.as_str() {
                    plan.presentation.push(PresentationRequest::ReapplyNightMode {
                        mode: mode.to_string(),
                    });
                }
            }
            FieldKey::EnableClashApi => {
                if let Some(clash_api) = value.as_bool() {
                    plan.presentation
                        .push(PresentationRequest::RefreshNavMenu { clash_api });
                }
            }
            FieldKey::ProxyApps => plan.presentation.push(PresentationRequest::OpenAppManager),
            _ => {}
        }
        plan
    }
}

impl Default for ChangePolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Strongest deferred action across a batch of changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBatch {
    pending: PendingAction,
    stop_issued: bool,
    changes: usize,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one change's deferred action to the batch.
    pub fn record(&mut self, action: PendingAction) {
        self.changes += 1;
        // Once the service has been told to stop, nothing weaker is worth sending.
        if self.stop_issued {
            return;
        }
        self.pending = self.pending.strongest(action);
    }

    /// Marks that a stop already went out during this batch.
    pub fn note_stop_issued(&mut self) {
        self.stop_issued = true;
        self.pending = PendingAction::None;
    }

    pub fn pending(&self) -> PendingAction {
        self.pending
    }

    /// Number of changes recorded since the last flush or discard.
    pub fn len(&self) -> usize {
        self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes == 0
    }

    /// Returns the action to apply and starts a new batch.
    pub fn take(&mut self) -> PendingAction {
        std::mem::take(self).pending
    }

    /// Drops the batch without applying it; returns what was dropped.
    pub fn discard(&mut self) -> PendingAction {
        self.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enum_value(v: &str) -> FieldValue {
        FieldValue::Enum(v.to_string())
    }

    #[test]
    fn test_precedence_order_is_stop_restart_reload_none() {
        assert!(PendingAction::Stop > PendingAction::Restart);
        assert!(PendingAction::Restart > PendingAction::Reload);
        assert!(PendingAction::Reload > PendingAction::None);
    }

    #[test]
    fn test_resolve_reload_and_restart_only_when_started() {
        for state in [
            ServiceState::Stopped,
            ServiceState::Starting,
            ServiceState::Stopping,
        ] {
            assert_eq!(
                ChangePolicy::resolve(EffectClass::NeedsReload, state),
                PendingAction::None
            );
            assert_eq!(
                ChangePolicy::resolve(EffectClass::NeedsRestart, state),
                PendingAction::None
            );
        }
        assert_eq!(
            ChangePolicy::resolve(EffectClass::NeedsReload, ServiceState::Started),
            PendingAction::Reload
        );
        assert_eq!(
            ChangePolicy::resolve(EffectClass::NeedsRestart, ServiceState::Started),
            PendingAction::Restart
        );
    }

    #[test]
    fn test_resolve_stop_while_started_or_starting() {
        assert_eq!(
            ChangePolicy::resolve(EffectClass::NeedsStop, ServiceState::Starting),
            PendingAction::Stop
        );
        assert_eq!(
            ChangePolicy::resolve(EffectClass::NeedsStop, ServiceState::Started),
            PendingAction::Stop
        );
        assert_eq!(
            ChangePolicy::resolve(EffectClass::NeedsStop, ServiceState::Stopping),
            PendingAction::None
        );
        assert_eq!(
            ChangePolicy::resolve(EffectClass::Cosmetic, ServiceState::Started),
            PendingAction::None
        );
    }

    #[test]
    fn test_unlisted_field_is_cosmetic() {
        let policy = ChangePolicy::standard();
        assert_eq!(policy.class_of(FieldKey::MuxProtocols), EffectClass::Cosmetic);
        assert_eq!(policy.class_of(FieldKey::ProfileTrafficStatistics), EffectClass::Cosmetic);
    }

    #[test]
    fn test_standard_classification_of_key_fields() {
        let policy = ChangePolicy::standard();
        assert_eq!(policy.class_of(FieldKey::MixedPort), EffectClass::NeedsReload);
        assert_eq!(policy.class_of(FieldKey::LogLevel), EffectClass::NeedsRestart);
        assert_eq!(policy.class_of(FieldKey::ServiceMode), EffectClass::Destructive);
    }

    #[test]
    fn test_service_mode_plans_stop_before_commit() {
        let policy = ChangePolicy::standard();

        let plan = policy.plan(
            FieldKey::ServiceMode,
            &enum_value("proxy"),
            ServiceState::Started,
        );

        assert_eq!(plan.before_commit, PendingAction::Stop);
        assert_eq!(plan.deferred, PendingAction::None);
    }

    #[test]
    fn test_app_theme_reloads_immediately_only_when_started() {
        let policy = ChangePolicy::standard();

        let started = policy.plan(FieldKey::AppTheme, &FieldValue::Int(3), ServiceState::Started);
        let stopped = policy.plan(FieldKey::AppTheme, &FieldValue::Int(3), ServiceState::Stopped);

        assert_eq!(started.immediate, PendingAction::Reload);
        assert_eq!(started.deferred, PendingAction::None);
        assert_eq!(
            started.presentation,
            vec![PresentationRequest::ReapplyTheme { theme: 3 }]
        );
        assert_eq!(stopped.immediate, PendingAction::None);
        assert_eq!(stopped.presentation.len(), 1);
    }

    #[test]
    fn test_night_theme_never_touches_the_service() {
        let policy = ChangePolicy::standard();

        let plan = policy.plan(FieldKey::NightTheme, &enum_value("2"), ServiceState::Started);

        assert_eq!(plan.before_commit, PendingAction::None);
        assert_eq!(plan.immediate, PendingAction::None);
        assert_eq!(plan.deferred, PendingAction::None);
        assert_eq!(
            plan.presentation,
            vec![PresentationRequest::ReapplyNightMode {
                mode: "2".to_string()
            }]
        );
    }

    #[test]
    fn test_clash_api_refreshes_nav_and_defers_reload() {
        let policy = ChangePolicy::standard();
        let plan = policy.plan(
            FieldKey::EnableClashApi,
            &FieldValue::Bool(true),
            ServiceState::Started,
        );
        assert_eq!(plan.deferred, PendingAction::Reload);
        assert_eq!(
            plan.presentation,
            vec![PresentationRequest::RefreshNavMenu { clash_api: true }]
        );
    }

    #[test]
    fn test_batch_keeps_strongest_action() {
        // Arrange
        let mut batch = PendingBatch::new();

        // Act: cosmetic, reload, stop, then another reload
        batch.record(PendingAction::None);
        batch.record(PendingAction::Reload);
        batch.record(PendingAction::Stop);
        batch.record(PendingAction::Reload);

        // Assert
        assert_eq!(batch.pending(), PendingAction::Stop);
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn test_batch_take_resets() {
        let mut batch = PendingBatch::new();
        batch.record(PendingAction::Restart);

        assert_eq!(batch.take(), PendingAction::Restart);
        assert_eq!(batch.pending(), PendingAction::None);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_batch_ignores_actions_after_stop_was_issued() {
        let mut batch = PendingBatch::new();
        batch.record(PendingAction::Reload);
        batch.note_stop_issued();
        batch.record(PendingAction::Restart);

        assert_eq!(batch.pending(), PendingAction::None);
        assert_eq!(batch.take(), PendingAction::None);

        // A fresh batch accepts actions again.
        batch.record(PendingAction::Reload);
        assert_eq!(batch.pending(), PendingAction::Reload);
    }

    #[test]
    fn test_permitted_in_follows_service_state_machine() {
        assert!(!PendingAction::Reload.permitted_in(ServiceState::Starting));
        assert!(!PendingAction::Restart.permitted_in(ServiceState::Stopped));
        assert!(PendingAction::Stop.permitted_in(ServiceState::Starting));
        assert!(!PendingAction::Stop.permitted_in(ServiceState::Stopping));
        assert!(!PendingAction::None.permitted_in(ServiceState::Started));
    }
}
