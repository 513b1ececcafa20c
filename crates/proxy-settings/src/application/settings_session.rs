//! SettingsSession: drives one visit to the settings screen.
//!
//! The session owns the [`ConfigStore`] for as long as the screen is open and
//! runs every edit through the same pipeline:
//!
//! ```text
//! apply(key, value)
//!  ├─ check            invalid → Notice::InvalidInput, nothing committed
//!  ├─ before_commit    Stop for destructive fields while the service runs
//!  ├─ store.set        subscribers run, every change is queued
//!  └─ for each queued change (the edit, subscriber writes, recomputes)
//!       ├─ graph.resolve    enable / visible → binder, recompute → other fields
//!       ├─ immediate        actions that cannot wait for the batch
//!       ├─ batch.record     deferred action, strongest wins
//!       └─ present          theme / night mode / nav menu / app picker
//! ```
//!
//! A field set by a subscriber goes through the same graph and policy as the
//! edit itself.  A destructive field set that way cannot be stopped ahead of
//! its commit, so its stop goes out right after it.
//!
//! The batch is flushed once, by [`SettingsSession::flush`] or when the
//! screen is left via [`SettingsSession::close`].
//!
//! Everything here is synchronous and single-threaded: edit *n* is fully
//! processed, subscribers included, before edit *n + 1* starts.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use proxy_settings_core::{
    ChangePlan, ChangePolicy, ConfigStore, DependencyGraph, FieldChange, FieldKey, FieldValue, PendingAction,
    PendingBatch, PersistedBackend, PlatformCapabilities, Resolution, ServiceState, SettingsError,
    StaticRule, SubscriptionId, Topic,
};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use super::screen::{Notice, ScreenBinder};
use super::service_control::{self, ServiceController};

/// Host-supplied knobs for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub capabilities: PlatformCapabilities,
    /// Turn a subscriber's re-entrant mutation into an error returned from
    /// [`SettingsSession::apply`].  When `false` it is only logged.
    pub strict_contracts: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            capabilities: PlatformCapabilities::default(),
            strict_contracts: cfg!(debug_assertions),
        }
    }
}

/// Result of one accepted edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    pub field: FieldKey,
    pub previous: FieldValue,
    pub current: FieldValue,
    /// `false` when the edit carried the value the field already had.
    pub changed: bool,
    /// Consequences on dependent fields and affordances, for the edit and
    /// every change it caused, in processing order.
    pub resolutions: Vec<Resolution>,
    /// Service requests sent while processing this edit.
    pub dispatched: Vec<PendingAction>,
    /// Strongest action waiting for the next flush.
    pub pending: PendingAction,
}

/// One open settings screen.
pub struct SettingsSession {
    id: Uuid,
    store: ConfigStore,
    graph: DependencyGraph,
    policy: ChangePolicy,
    batch: PendingBatch,
    controller: Arc<dyn ServiceController>,
    binder: Arc<dyn ScreenBinder>,
    options: SessionOptions,
    /// Changes committed to the store and not yet propagated.
    changes: Rc<RefCell<VecDeque<FieldChange>>>,
}

/// How queued changes are followed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Propagation {
    /// Opening the screen: recomputes are committed, nothing is planned.
    Seed,
    /// A user edit: every change is classified and batched.
    Edit,
    /// Values re-read from the backend: recomputes stay clean, nothing is planned.
    Refresh,
}

#[derive(Debug, Default)]
struct Propagated {
    resolutions: Vec<Resolution>,
    dispatched: Vec<PendingAction>,
}

impl SettingsSession {
    /// Opens a session with the standard dependency graph and change policy.
    pub fn open(
        backend: Box<dyn PersistedBackend>,
        controller: Arc<dyn ServiceController>,
        binder: Arc<dyn ScreenBinder>,
        options: SessionOptions,
    ) -> Self {
        Self::open_with(
            DependencyGraph::standard(),
            ChangePolicy::standard(),
            backend,
            controller,
            binder,
            options,
        )
    }

    /// Opens a session with a custom graph and policy.
    ///
    /// Seeds the store from `backend`, applies the platform's static rules,
    /// pushes the initial enable/visible state of every edge and runs the
    /// recompute edges once.  None of this counts as an edit: the session
    /// starts clean, with an empty batch.
    pub fn open_with(
        graph: DependencyGraph,
        policy: ChangePolicy,
        backend: Box<dyn PersistedBackend>,
        controller: Arc<dyn ServiceController>,
        binder: Arc<dyn ScreenBinder>,
        options: SessionOptions,
    ) -> Self {
        let id = Uuid::new_v4();
        let mut store = ConfigStore::with_all_fields(backend);

        let changes = Rc::new(RefCell::new(VecDeque::new()));
        let mirror = Arc::clone(&binder);
        let queue = Rc::clone(&changes);
        store.subscribe(Topic::Any, move |_, change: &FieldChange| {
            mirror.value_changed(change.key, &change.current);
            queue.borrow_mut().push_back(change.clone());
        });

        let mut session = Self {
            id,
            store,
            graph,
            policy,
            batch: PendingBatch::new(),
            controller,
            binder,
            options,
            changes,
        };

        session.apply_static_rules();
        let initial = session
            .graph
            .initial_state(|key| session.store.get(key).ok().cloned());
        for resolution in &initial {
            session.apply_resolution(resolution, Propagation::Seed);
        }
        session.propagate(Propagation::Seed, None);

        session.store.clear_dirty();
        for field in session.store.take_contract_violations() {
            error!(session = %session.id, %field, "re-entrant mutation while opening");
        }
        info!(
            session = %session.id,
            fields = session.store.keys().len(),
            edges = session.graph.edges().len(),
            "settings session opened"
        );
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn get(&self, key: FieldKey) -> Result<&FieldValue, SettingsError> {
        self.store.get(key)
    }

    pub fn get_by_name(&self, name: &str) -> Result<&FieldValue, SettingsError> {
        self.store.get_by_name(name)
    }

    /// Every field with its current value, in screen order.
    pub fn fields(&self) -> Vec<(FieldKey, &FieldValue)> {
        self.store
            .keys()
            .into_iter()
            .filter_map(|key| self.store.get(key).ok().map(|value| (key, value)))
            .collect()
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// `true` when edits were committed since open or the last flush.
    pub fn is_dirty(&self) -> bool {
        self.store.is_dirty()
    }

    pub fn pending(&self) -> PendingAction {
        self.batch.pending()
    }

    /// Number of edits recorded in the current batch.
    pub fn pending_changes(&self) -> usize {
        self.batch.len()
    }

    pub fn service_state(&self) -> ServiceState {
        self.controller.state()
    }

    /// Registers an extra collaborator on the store.
    ///
    /// The callback may set other fields but not the one it is notified
    /// about; see [`SessionOptions::strict_contracts`].
    pub fn subscribe<F>(&mut self, topic: Topic, callback: F) -> SubscriptionId
    where
        F: FnMut(&mut ConfigStore, &FieldChange) + 'static,
    {
        self.store.subscribe(topic, callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Applies a typed edit.
    ///
    /// # Errors
    ///
    /// - [`SettingsError::Validation`] if the value is rejected; nothing is
    ///   committed and the binder receives [`Notice::InvalidInput`].
    /// - [`SettingsError::UnknownField`] if the store does not declare `key`.
    /// - [`SettingsError::ReentrantMutation`] with strict contracts, after the
    ///   commit has completed, when a subscriber set its own field.
    pub fn apply(&mut self, key: FieldKey, value: FieldValue) -> Result<EditOutcome, SettingsError> {
        let _span = info_span!("apply", session = %self.id, field = %key).entered();

        let value = match self.store.check(key, value) {
            Ok(value) => value,
            Err(err) => {
                self.reject(&err);
                return Err(err);
            }
        };

        let previous = self.store.get(key)?.clone();
        if previous == value {
            debug!("value unchanged, edit ignored");
            return Ok(EditOutcome {
                field: key,
                previous,
                current: value,
                changed: false,
                resolutions: Vec::new(),
                dispatched: Vec::new(),
                pending: self.batch.pending(),
            });
        }

        let plan = self.policy.plan(key, &value, self.controller.state());
        let mut dispatched = Vec::new();

        if self.dispatch_in_batch(plan.before_commit) {
            dispatched.push(plan.before_commit);
        }

        self.store.set(key, value.clone())?;
        let propagated = self.propagate(Propagation::Edit, Some((key, plan)));
        dispatched.extend(propagated.dispatched);

        self.check_contracts()?;

        Ok(EditOutcome {
            field: key,
            previous,
            current: value,
            changed: true,
            resolutions: propagated.resolutions,
            dispatched,
            pending: self.batch.pending(),
        })
    }

    /// Applies an edit given as the field's stable name and raw text.
    ///
    /// # Errors
    ///
    /// As [`apply`](Self::apply), plus [`SettingsError::UnknownField`] for a
    /// name that is not declared and [`SettingsError::Validation`] for text
    /// that does not parse as the field's type.
    pub fn apply_raw(&mut self, name: &str, raw: &str) -> Result<EditOutcome, SettingsError> {
        let key = match FieldKey::from_name(name) {
            Ok(key) => key,
            Err(err) => {
                error!(session = %self.id, field = name, "edit for an undeclared field");
                return Err(err);
            }
        };
        let value = match self.store.parse(key, raw) {
            Ok(value) => value,
            Err(err) => {
                self.reject(&err);
                return Err(err);
            }
        };
        self.apply(key, value)
    }

    /// Sends the strongest pending action, if the service accepts it, and
    /// starts a new batch.  Returns the action that was sent.
    pub fn flush(&mut self) -> PendingAction {
        let action = self.batch.take();
        self.store.clear_dirty();
        if self.dispatch(action) {
            action
        } else {
            PendingAction::None
        }
    }

    /// Drops the pending action without sending it.  Returns what was dropped.
    pub fn discard_pending(&mut self) -> PendingAction {
        let dropped = self.batch.discard();
        if !dropped.is_none() {
            info!(session = %self.id, action = dropped.label(), "pending service action discarded");
        }
        dropped
    }

    /// Re-reads `keys` from the backend after another screen edited them.
    ///
    /// Changed values reach the binder and the dependency graph like an
    /// edit, but are not treated as one: the store stays clean, recomputed
    /// fields are not written back and no service action is planned.
    /// Returns the keys whose value changed.
    pub fn refresh_from_backend(&mut self, keys: &[FieldKey]) -> Result<Vec<FieldKey>, SettingsError> {
        let mut changed = Vec::new();
        for &key in keys {
            if self.store.refresh(key)? {
                changed.push(key);
            }
            self.propagate(Propagation::Refresh, None);
        }
        self.check_contracts()?;
        if !changed.is_empty() {
            debug!(session = %self.id, ?changed, "fields refreshed from backend");
        }
        Ok(changed)
    }

    /// The screen came back to the foreground.  The per-app proxy list is
    /// edited on its own screen, so it is re-read here.
    pub fn resume(&mut self) -> Result<Vec<FieldKey>, SettingsError> {
        self.refresh_from_backend(&[FieldKey::ProxyApps])
    }

    /// Leaves the screen: flushes the batch and drops the store.
    pub fn close(mut self) -> PendingAction {
        let sent = self.flush();
        info!(session = %self.id, action = sent.label(), "settings session closed");
        sent
    }

    fn apply_static_rules(&mut self) {
        for rule in self.graph.static_rules(&self.options.capabilities) {
            match rule {
                StaticRule::Remove(target) => self.binder.remove(target),
                StaticRule::Hide(target) => self.binder.set_visible(target, false),
            }
        }
    }

    /// Drains the change queue, following each change through the graph and,
    /// for edits, the policy.  Recomputed fields are queued in turn; recompute
    /// edges are acyclic, so this terminates.
    ///
    /// `primary` is the edit being applied with the plan made before its
    /// commit; every other change is planned when it is reached.
    fn propagate(
        &mut self,
        mode: Propagation,
        mut primary: Option<(FieldKey, ChangePlan)>,
    ) -> Propagated {
        let mut out = Propagated::default();
        while let Some(change) = self.next_change() {
            if change.previous == change.current {
                continue;
            }

            let resolutions = self.graph.resolve(change.key, &change.current);
            for resolution in &resolutions {
                self.apply_resolution(resolution, mode);
            }
            out.resolutions.extend(resolutions);

            if mode != Propagation::Edit {
                continue;
            }
            let plan = match primary.take() {
                Some((key, plan)) if key == change.key => plan,
                other => {
                    primary = other;
                    let plan = self
                        .policy
                        .plan(change.key, &change.current, self.controller.state());
                    if self.dispatch_in_batch(plan.before_commit) {
                        out.dispatched.push(plan.before_commit);
                    }
                    plan
                }
            };
            if self.dispatch_in_batch(plan.immediate) {
                out.dispatched.push(plan.immediate);
            }
            self.batch.record(plan.deferred);
            for request in plan.presentation {
                self.binder.present(request);
            }
        }
        out
    }

    fn next_change(&self) -> Option<FieldChange> {
        self.changes.borrow_mut().pop_front()
    }

    fn apply_resolution(&mut self, resolution: &Resolution, mode: Propagation) {
        match resolution {
            Resolution::Enable { target, enabled } => self.binder.set_enabled(*target, *enabled),
            Resolution::Visible { target, visible } => self.binder.set_visible(*target, *visible),
            Resolution::Recompute { target, value } => {
                self.commit_derived(*target, value.clone(), mode)
            }
        }
    }

    /// Commits a value computed by a recompute edge.  The store queues the
    /// change, so the recomputed field's own edges run from the queue.
    fn commit_derived(&mut self, key: FieldKey, value: FieldValue, mode: Propagation) {
        match self.store.get(key) {
            Ok(current) if *current == value => return,
            Ok(_) => {}
            Err(err) => {
                error!(field = %key, error = %err, "recompute target is not declared");
                return;
            }
        }

        let committed = match mode {
            Propagation::Refresh => self.store.refresh_derived(key, value).map(|_| ()),
            Propagation::Seed | Propagation::Edit => self.store.set(key, value).map(|_| ()),
        };
        if let Err(err) = committed {
            error!(field = %key, error = %err, "recomputed value rejected");
        }
    }

    /// Dispatches an action that belongs to the current batch.  A stop that
    /// goes out supersedes everything else the batch would send.
    fn dispatch_in_batch(&mut self, action: PendingAction) -> bool {
        let sent = self.dispatch(action);
        if sent && action == PendingAction::Stop {
            self.batch.note_stop_issued();
        }
        sent
    }

    fn dispatch(&self, action: PendingAction) -> bool {
        match service_control::request(self.controller.as_ref(), action) {
            Ok(sent) => sent,
            Err(err) => {
                warn!(
                    session = %self.id,
                    action = action.label(),
                    error = %err,
                    "service action failed, configuration change kept"
                );
                self.binder.notify(Notice::ServiceActionFailed {
                    action,
                    message: err.to_string(),
                });
                false
            }
        }
    }

    fn reject(&self, err: &SettingsError) {
        match err {
            SettingsError::Validation(invalid) => {
                debug!(session = %self.id, field = %invalid.field, reason = %invalid.reason, "edit rejected");
                self.binder.notify(Notice::InvalidInput {
                    field: invalid.field,
                    reason: invalid.reason.clone(),
                });
            }
            other => error!(session = %self.id, error = %other, "edit failed"),
        }
    }

    fn check_contracts(&mut self) -> Result<(), SettingsError> {
        let violations = self.store.take_contract_violations();
        let Some(&field) = violations.first() else {
            return Ok(());
        };
        if self.options.strict_contracts {
            return Err(SettingsError::ReentrantMutation { field });
        }
        warn!(session = %self.id, ?violations, "re-entrant mutations ignored");
        Ok(())
    }
}

impl std::fmt::Debug for SettingsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsSession")
            .field("id", &self.id)
            .field("store", &self.store)
            .field("batch", &self.batch)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use proxy_settings_core::{
        Affordance, EffectClass, MemoryBackend, PresentationRequest, ServiceError, Target,
    };

    use super::*;
    use crate::application::service_control::MockServiceController;

    // ── Test doubles ──────────────────────────────────────────────────────────

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Enabled(Target, bool),
        Visible(Target, bool),
        Removed(Target),
        Value(FieldKey, FieldValue),
        Present(PresentationRequest),
        Notice(Notice),
    }

    /// Records every binder call; optionally mirrors value changes into a
    /// shared journal so ordering against service calls can be checked.
    #[derive(Default)]
    struct RecordingBinder {
        calls: Mutex<Vec<Call>>,
        journal: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl RecordingBinder {
        fn with_journal(journal: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                journal: Some(journal),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl ScreenBinder for RecordingBinder {
        fn set_enabled(&self, target: Target, enabled: bool) {
            self.push(Call::Enabled(target, enabled));
        }
        fn set_visible(&self, target: Target, visible: bool) {
            self.push(Call::Visible(target, visible));
        }
        fn remove(&self, target: Target) {
            self.push(Call::Removed(target));
        }
        fn value_changed(&self, field: FieldKey, value: &FieldValue) {
            if let Some(journal) = &self.journal {
                journal.lock().unwrap().push(format!("commit:{field}"));
            }
            self.push(Call::Value(field, value.clone()));
        }
        fn present(&self, request: PresentationRequest) {
            self.push(Call::Present(request));
        }
        fn notify(&self, notice: Notice) {
            self.push(Call::Notice(notice));
        }
    }

    fn controller_in(state: ServiceState) -> MockServiceController {
        let mut controller = MockServiceController::new();
        controller.expect_state().return_const(state);
        controller
    }

    fn options(strict: bool) -> SessionOptions {
        SessionOptions {
            capabilities: PlatformCapabilities::default(),
            strict_contracts: strict,
        }
    }

    fn open(
        backend: MemoryBackend,
        controller: MockServiceController,
    ) -> (SettingsSession, Arc<RecordingBinder>) {
        let binder = Arc::new(RecordingBinder::default());
        let session = SettingsSession::open(
            Box::new(backend),
            Arc::new(controller),
            binder.clone(),
            options(true),
        );
        (session, binder)
    }

    fn field(key: FieldKey) -> Target {
        Target::Field(key)
    }

    fn set_of(items: &[&str]) -> FieldValue {
        FieldValue::StrSet(items.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>())
    }

    // ── open ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_open_seeds_defaults_and_starts_clean() {
        // Arrange / Act
        let (session, _binder) = open(MemoryBackend::new(), controller_in(ServiceState::Stopped));

        // Assert
        assert_eq!(session.get(FieldKey::MixedPort).unwrap(), &FieldValue::Int(2080));
        assert_eq!(session.get(FieldKey::LocalDnsPort).unwrap(), &FieldValue::Int(6450));
        assert!(!session.is_dirty());
        assert_eq!(session.pending(), PendingAction::None);
        assert_eq!(session.pending_changes(), 0);
    }

    #[test]
    fn test_open_pushes_initial_dependency_state() {
        let backend = MemoryBackend::with_values([
            ("speedInterval", FieldValue::Enum("0".to_string())),
            ("bypassLan", FieldValue::Bool(true)),
        ]);

        let (_session, binder) = open(backend, controller_in(ServiceState::Stopped));

        let calls = binder.calls();
        assert!(calls.contains(&Call::Enabled(field(FieldKey::ProfileTrafficStatistics), false)));
        assert!(calls.contains(&Call::Enabled(field(FieldKey::BypassLanInCore), true)));
        assert!(calls.contains(&Call::Visible(
            Target::Affordance(Affordance::ClashDashboardEntry),
            false
        )));
    }

    #[test]
    fn test_open_applies_static_rules_for_platform() {
        // Arrange
        let binder = Arc::new(RecordingBinder::default());
        let opts = SessionOptions {
            capabilities: PlatformCapabilities {
                metered_network: false,
            },
            strict_contracts: true,
        };

        // Act
        let _session = SettingsSession::open(
            Box::new(MemoryBackend::new()),
            Arc::new(controller_in(ServiceState::Stopped)),
            binder.clone(),
            opts,
        );

        // Assert
        let calls = binder.calls();
        assert!(calls.contains(&Call::Removed(field(FieldKey::MeteredNetwork))));
        assert!(calls.contains(&Call::Visible(field(FieldKey::TcpKeepAliveInterval), false)));
    }

    #[test]
    fn test_open_runs_recompute_edges_without_dirtying() {
        let backend = MemoryBackend::with_values([("nekoPlugins", set_of(&["hysteria"]))]);

        let (session, _binder) = open(backend.clone(), controller_in(ServiceState::Started));

        assert_eq!(session.get(FieldKey::RoutePackages).unwrap(), &set_of(&["hysteria"]));
        assert!(!session.is_dirty());
        assert_eq!(session.pending(), PendingAction::None);
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn test_out_of_range_port_is_rejected_and_surfaced() {
        // Arrange
        let backend = MemoryBackend::new();
        let (mut session, binder) = open(backend.clone(), controller_in(ServiceState::Started));

        // Act
        let err = session.apply_raw("mixedPort", "70000").unwrap_err();

        // Assert
        assert!(matches!(err, SettingsError::Validation(_)));
        assert_eq!(session.get(FieldKey::MixedPort).unwrap(), &FieldValue::Int(2080));
        assert_eq!(backend.stored("mixedPort"), None);
        assert!(!session.is_dirty());
        assert_eq!(session.pending(), PendingAction::None);
        assert!(binder
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Notice(Notice::InvalidInput { field: FieldKey::MixedPort, .. }))));
    }

    #[test]
    fn test_non_numeric_input_is_rejected() {
        let (mut session, _binder) = open(MemoryBackend::new(), controller_in(ServiceState::Stopped));

        let err = session.apply_raw("muxConcurrency", "eight").unwrap_err();

        assert!(matches!(err, SettingsError::Validation(_)));
        assert_eq!(session.get(FieldKey::MuxConcurrency).unwrap(), &FieldValue::Int(8));
    }

    #[test]
    fn test_unknown_field_name_fails() {
        let (mut session, _binder) = open(MemoryBackend::new(), controller_in(ServiceState::Stopped));

        let err = session.apply_raw("notAField", "1").unwrap_err();

        assert!(matches!(err, SettingsError::UnknownField(ref name) if name == "notAField"));
        assert!(err.is_contract_violation());
    }

    // ── Dependency graph ──────────────────────────────────────────────────────

    #[test]
    fn test_speed_interval_zero_disables_traffic_statistics() {
        let (mut session, binder) = open(MemoryBackend::new(), controller_in(ServiceState::Stopped));

        session.apply_raw("speedInterval", "0").unwrap();
        let after_off = binder.calls();
        session.apply_raw("speedInterval", "3000").unwrap();
        let after_on = binder.calls();

        let stats = field(FieldKey::ProfileTrafficStatistics);
        assert_eq!(after_off.last(), Some(&Call::Enabled(stats, false)));
        assert_eq!(after_on.last(), Some(&Call::Enabled(stats, true)));
    }

    #[test]
    fn test_enabling_clash_api_shows_dashboard_and_refreshes_menu() {
        let (mut session, binder) = open(MemoryBackend::new(), controller_in(ServiceState::Stopped));

        let outcome = session.apply(FieldKey::EnableClashApi, FieldValue::Bool(true)).unwrap();

        assert_eq!(
            outcome.resolutions,
            vec![Resolution::Visible {
                target: Target::Affordance(Affordance::ClashDashboardEntry),
                visible: true
            }]
        );
        assert!(binder
            .calls()
            .contains(&Call::Present(PresentationRequest::RefreshNavMenu { clash_api: true })));
    }

    #[test]
    fn test_plugin_edit_is_mirrored_into_route_packages() {
        let (mut session, binder) = open(MemoryBackend::new(), controller_in(ServiceState::Stopped));

        session.apply(FieldKey::NekoPlugins, set_of(&["naive", "tuic"])).unwrap();

        assert_eq!(session.get(FieldKey::RoutePackages).unwrap(), &set_of(&["naive", "tuic"]));
        assert!(binder
            .calls()
            .contains(&Call::Value(FieldKey::RoutePackages, set_of(&["naive", "tuic"]))));
    }

    // ── Change policy and batching ────────────────────────────────────────────

    #[test]
    fn test_reload_field_while_stopped_sends_nothing() {
        // Arrange: no reload/restart/stop expectations, any call panics.
        let (mut session, _binder) = open(MemoryBackend::new(), controller_in(ServiceState::Stopped));

        // Act
        session.apply_raw("remoteDns", "tls://1.1.1.1").unwrap();
        let sent = session.flush();

        // Assert
        assert_eq!(sent, PendingAction::None);
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_reload_field_while_started_is_deferred_to_flush() {
        let mut controller = controller_in(ServiceState::Started);
        controller.expect_reload().times(1).returning(|| Ok(()));
        let (mut session, _binder) = open(MemoryBackend::new(), controller);

        let outcome = session.apply_raw("mixedPort", "7890").unwrap();
        assert!(outcome.dispatched.is_empty());
        assert_eq!(outcome.pending, PendingAction::Reload);

        assert_eq!(session.flush(), PendingAction::Reload);
        assert_eq!(session.pending(), PendingAction::None);
    }

    #[test]
    fn test_cosmetic_reload_and_stop_in_one_batch_send_a_single_stop() {
        // Arrange
        let mut controller = controller_in(ServiceState::Started);
        controller.expect_stop().times(1).returning(|| Ok(()));
        controller.expect_reload().never();
        controller.expect_restart().never();
        let binder = Arc::new(RecordingBinder::default());
        let policy = ChangePolicy::standard().with_class(FieldKey::Mtu, EffectClass::NeedsStop);
        let mut session = SettingsSession::open_with(
            DependencyGraph::standard(),
            policy,
            Box::new(MemoryBackend::new()),
            Arc::new(controller),
            binder,
            options(true),
        );

        // Act
        session.apply(FieldKey::MuxProtocols, set_of(&["h2mux"])).unwrap();
        session.apply_raw("directDns", "local").unwrap();
        session.apply_raw("mtu", "1500").unwrap();
        let sent = session.flush();

        // Assert
        assert_eq!(sent, PendingAction::Stop);
    }

    #[test]
    fn test_restart_outranks_reload_in_a_batch() {
        let mut controller = controller_in(ServiceState::Started);
        controller.expect_restart().times(1).returning(|| Ok(()));
        controller.expect_reload().never();
        let (mut session, _binder) = open(MemoryBackend::new(), controller);

        session.apply_raw("logLevel", "3").unwrap();
        session.apply_raw("enableFakeDns", "true").unwrap();

        assert_eq!(session.pending_changes(), 2);
        assert_eq!(session.close(), PendingAction::Restart);
    }

    #[test]
    fn test_service_mode_change_stops_service_before_commit() {
        // Arrange
        let journal = Arc::new(Mutex::new(Vec::new()));
        let backend = MemoryBackend::new();
        let mut controller = controller_in(ServiceState::Started);
        {
            let journal = Arc::clone(&journal);
            let backend = backend.clone();
            controller.expect_stop().times(1).returning(move || {
                // Nothing about the new mode is stored yet.
                assert_eq!(backend.stored("serviceMode"), None);
                journal.lock().unwrap().push("stop".to_string());
                Ok(())
            });
        }
        controller.expect_reload().never();
        let binder = Arc::new(RecordingBinder::with_journal(Arc::clone(&journal)));
        let mut session = SettingsSession::open(
            Box::new(backend.clone()),
            Arc::new(controller),
            binder,
            options(true),
        );

        // Act
        let outcome = session.apply_raw("serviceMode", "proxy").unwrap();
        session.apply_raw("remoteDns", "tls://9.9.9.9").unwrap();
        let sent = session.flush();

        // Assert
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["stop".to_string(), "commit:serviceMode".to_string(), "commit:remoteDns".to_string()]
        );
        assert_eq!(outcome.dispatched, vec![PendingAction::Stop]);
        assert_eq!(outcome.pending, PendingAction::None);
        assert_eq!(sent, PendingAction::None);
        assert_eq!(backend.stored("serviceMode"), Some(FieldValue::Enum("proxy".to_string())));
    }

    #[test]
    fn test_theme_change_reloads_immediately_and_reapplies_theme() {
        let mut controller = controller_in(ServiceState::Started);
        controller.expect_reload().times(1).returning(|| Ok(()));
        let (mut session, binder) = open(MemoryBackend::new(), controller);

        let outcome = session.apply_raw("appTheme", "4").unwrap();

        assert_eq!(outcome.dispatched, vec![PendingAction::Reload]);
        assert_eq!(outcome.pending, PendingAction::None);
        assert!(binder
            .calls()
            .contains(&Call::Present(PresentationRequest::ReapplyTheme { theme: 4 })));
    }

    #[test]
    fn test_service_failure_keeps_commit_and_notifies() {
        // Arrange
        let mut controller = controller_in(ServiceState::Started);
        controller.expect_reload().times(1).returning(|| {
            Err(ServiceError::Unavailable("binder died".to_string()))
        });
        let (mut session, binder) = open(MemoryBackend::new(), controller);

        // Act
        let outcome = session.apply_raw("appTheme", "2").unwrap();

        // Assert
        assert!(outcome.dispatched.is_empty());
        assert_eq!(session.get(FieldKey::AppTheme).unwrap(), &FieldValue::Int(2));
        assert!(binder.calls().iter().any(|c| matches!(
            c,
            Call::Notice(Notice::ServiceActionFailed { action: PendingAction::Reload, .. })
        )));
    }

    #[test]
    fn test_discard_pending_sends_nothing() {
        let mut controller = controller_in(ServiceState::Started);
        controller.expect_restart().never();
        let (mut session, _binder) = open(MemoryBackend::new(), controller);

        session.apply_raw("logBufSize", "200").unwrap();

        assert_eq!(session.discard_pending(), PendingAction::Restart);
        assert_eq!(session.flush(), PendingAction::None);
    }

    #[test]
    fn test_unchanged_value_is_not_an_edit() {
        let (mut session, binder) = open(MemoryBackend::new(), controller_in(ServiceState::Started));
        let before = binder.calls().len();

        let outcome = session.apply(FieldKey::MixedPort, FieldValue::Int(2080)).unwrap();

        assert!(!outcome.changed);
        assert!(!session.is_dirty());
        assert_eq!(binder.calls().len(), before);
    }

    #[test]
    fn test_non_positive_log_buffer_falls_back_to_default() {
        let (mut session, _binder) = open(MemoryBackend::new(), controller_in(ServiceState::Stopped));
        session.apply_raw("logBufSize", "120").unwrap();

        let outcome = session.apply_raw("logBufSize", "0").unwrap();

        assert_eq!(outcome.current, FieldValue::Int(50));
        assert_eq!(session.get(FieldKey::LogBufSize).unwrap(), &FieldValue::Int(50));
    }

    // ── Re-entrancy ───────────────────────────────────────────────────────────

    #[test]
    fn test_reentrant_mutation_fails_loudly_in_strict_mode() {
        // Arrange
        let (mut session, _binder) = open(MemoryBackend::new(), controller_in(ServiceState::Stopped));
        session.subscribe(Topic::Field(FieldKey::MixedPort), |store, _| {
            let _ = store.set(FieldKey::MixedPort, FieldValue::Int(1));
        });

        // Act
        let err = session.apply_raw("mixedPort", "3128").unwrap_err();

        // Assert
        assert!(matches!(
            err,
            SettingsError::ReentrantMutation { field: FieldKey::MixedPort }
        ));
        assert_eq!(session.get(FieldKey::MixedPort).unwrap(), &FieldValue::Int(3128));
    }

    #[test]
    fn test_reentrant_mutation_is_logged_only_when_lenient() {
        let binder = Arc::new(RecordingBinder::default());
        let mut session = SettingsSession::open(
            Box::new(MemoryBackend::new()),
            Arc::new(controller_in(ServiceState::Stopped)),
            binder,
            options(false),
        );
        session.subscribe(Topic::Field(FieldKey::MixedPort), |store, _| {
            let _ = store.set(FieldKey::MixedPort, FieldValue::Int(1));
        });

        let outcome = session.apply_raw("mixedPort", "3128").unwrap();

        assert_eq!(outcome.current, FieldValue::Int(3128));
        assert_eq!(session.get(FieldKey::MixedPort).unwrap(), &FieldValue::Int(3128));
    }

    #[test]
    fn test_subscriber_may_set_a_different_field() {
        let (mut session, _binder) = open(MemoryBackend::new(), controller_in(ServiceState::Stopped));
        session.subscribe(Topic::Field(FieldKey::BypassLan), |store, change| {
            let _ = store.set(FieldKey::BypassLanInCore, change.current.clone());
        });

        session.apply(FieldKey::BypassLan, FieldValue::Bool(true)).unwrap();

        assert_eq!(session.get(FieldKey::BypassLanInCore).unwrap(), &FieldValue::Bool(true));
    }

    #[test]
    fn test_field_set_by_subscriber_runs_through_graph_and_policy() {
        // Arrange
        let (mut session, binder) = open(MemoryBackend::new(), controller_in(ServiceState::Started));
        session.subscribe(Topic::Field(FieldKey::MuxProtocols), |store, _| {
            let _ = store.set(FieldKey::SpeedInterval, FieldValue::Enum("0".to_string()));
        });

        // Act
        let outcome = session
            .apply(FieldKey::MuxProtocols, set_of(&["h2mux"]))
            .unwrap();

        // Assert
        let stats = field(FieldKey::ProfileTrafficStatistics);
        assert!(binder.calls().contains(&Call::Enabled(stats, false)));
        assert_eq!(
            outcome.resolutions,
            vec![Resolution::Enable {
                target: stats,
                enabled: false
            }]
        );
        assert_eq!(outcome.pending, PendingAction::Reload);
        assert_eq!(session.pending_changes(), 2);
    }

    #[test]
    fn test_destructive_field_set_by_subscriber_stops_right_after_commit() {
        let mut controller = controller_in(ServiceState::Started);
        controller.expect_stop().times(1).returning(|| Ok(()));
        controller.expect_reload().never();
        let (mut session, _binder) = open(MemoryBackend::new(), controller);
        session.subscribe(Topic::Field(FieldKey::MixedPort), |store, _| {
            let _ = store.set(FieldKey::ServiceMode, FieldValue::Enum("proxy".to_string()));
        });

        let outcome = session.apply_raw("mixedPort", "7890").unwrap();

        assert_eq!(outcome.dispatched, vec![PendingAction::Stop]);
        assert_eq!(outcome.pending, PendingAction::None);
        assert_eq!(session.flush(), PendingAction::None);
    }

    // ── Resume ────────────────────────────────────────────────────────────────

    #[test]
    fn test_resume_picks_up_app_list_changes_from_backend() {
        // Arrange
        let backend = MemoryBackend::new();
        let (mut session, binder) = open(backend.clone(), controller_in(ServiceState::Started));
        backend.put("proxyApps", FieldValue::Bool(true));

        // Act
        let changed = session.resume().unwrap();

        // Assert
        assert_eq!(changed, vec![FieldKey::ProxyApps]);
        assert_eq!(session.get(FieldKey::ProxyApps).unwrap(), &FieldValue::Bool(true));
        assert!(binder
            .calls()
            .contains(&Call::Value(FieldKey::ProxyApps, FieldValue::Bool(true))));
        assert!(!session.is_dirty());
        assert_eq!(session.pending(), PendingAction::None);
    }

    #[test]
    fn test_resume_without_outside_changes_is_quiet() {
        let (mut session, _binder) = open(MemoryBackend::new(), controller_in(ServiceState::Stopped));

        assert!(session.resume().unwrap().is_empty());
    }

    #[test]
    fn test_refresh_of_plugins_recomputes_routes_without_dirtying() {
        // Arrange
        let backend = MemoryBackend::new();
        let (mut session, binder) = open(backend.clone(), controller_in(ServiceState::Started));
        backend.put("nekoPlugins", set_of(&["x"]));

        // Act
        let changed = session.refresh_from_backend(&[FieldKey::NekoPlugins]).unwrap();

        // Assert
        assert_eq!(changed, vec![FieldKey::NekoPlugins]);
        assert_eq!(session.get(FieldKey::RoutePackages).unwrap(), &set_of(&["x"]));
        assert!(binder
            .calls()
            .contains(&Call::Value(FieldKey::RoutePackages, set_of(&["x"]))));
        assert!(!session.is_dirty());
        assert_eq!(session.pending_changes(), 0);
        assert_eq!(backend.stored("routePackages"), None);
    }
}
