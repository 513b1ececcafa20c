//! UI command bridge: exposes the settings session to a frontend as JSON.
//!
//! A frontend never holds engine types.  It calls the command functions in
//! this module with field names and raw text, and receives
//! `CommandResult<T>` envelopes of plain DTOs:
//!
//! ```json
//! { "success": true, "data": { "field": "mixedPort", ... }, "error": null }
//! ```
//!
//! Binder calls made while a command runs (enable, hide, value changes,
//! presentation requests, notices) are queued by [`EventQueueBinder`] as
//! [`ScreenEvent`]s and returned with the command's response, so the frontend
//! can replay them in order.
//!
//! Any change to a DTO here must be mirrored in the frontend's types.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use proxy_settings_core::{
    FieldKey, FieldValue, PendingAction, PersistedBackend, PresentationRequest, Target,
};
use serde::{Deserialize, Serialize};

use crate::application::{
    screen::{Notice, ScreenBinder},
    service_control::ServiceController,
    settings_session::{EditOutcome, SessionOptions, SettingsSession},
};

// ── Screen events ─────────────────────────────────────────────────────────────

/// One binder call, as sent to the frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScreenEvent {
    Enabled { target: Target, enabled: bool },
    Visible { target: Target, visible: bool },
    Removed { target: Target },
    ValueChanged { field: FieldKey, value: FieldValue },
    Presentation { request: PresentationRequest },
    Notice { notice: Notice },
}

/// Last known presentation state of one field or affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetView {
    pub enabled: bool,
    pub visible: bool,
    pub removed: bool,
}

impl Default for TargetView {
    fn default() -> Self {
        Self {
            enabled: true,
            visible: true,
            removed: false,
        }
    }
}

#[derive(Debug, Default)]
struct BinderState {
    queue: Vec<ScreenEvent>,
    views: HashMap<Target, TargetView>,
}

/// [`ScreenBinder`] that queues events for the frontend and remembers the
/// current enable/visible state of every target it was told about.
#[derive(Debug, Default)]
pub struct EventQueueBinder {
    state: Mutex<BinderState>,
}

impl EventQueueBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every queued event.
    pub fn drain(&self) -> Vec<ScreenEvent> {
        std::mem::take(&mut self.lock().queue)
    }

    pub fn pending_events(&self) -> usize {
        self.lock().queue.len()
    }

    /// Current view of `target`; targets never mentioned are enabled and visible.
    pub fn view(&self, target: Target) -> TargetView {
        self.lock().views.get(&target).copied().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, BinderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: ScreenEvent) {
        self.lock().queue.push(event);
    }

    fn update_view(&self, target: Target, event: ScreenEvent, f: impl FnOnce(&mut TargetView)) {
        let mut state = self.lock();
        f(state.views.entry(target).or_default());
        state.queue.push(event);
    }
}

impl ScreenBinder for EventQueueBinder {
    fn set_enabled(&self, target: Target, enabled: bool) {
        self.update_view(target, ScreenEvent::Enabled { target, enabled }, |v| {
            v.enabled = enabled
        });
    }

    fn set_visible(&self, target: Target, visible: bool) {
        self.update_view(target, ScreenEvent::Visible { target, visible }, |v| {
            v.visible = visible
        });
    }

    fn remove(&self, target: Target) {
        self.update_view(target, ScreenEvent::Removed { target }, |v| {
            v.removed = true;
            v.visible = false;
        });
    }

    fn value_changed(&self, field: FieldKey, value: &FieldValue) {
        self.push(ScreenEvent::ValueChanged {
            field,
            value: value.clone(),
        });
    }

    fn present(&self, request: PresentationRequest) {
        self.push(ScreenEvent::Presentation { request });
    }

    fn notify(&self, notice: Notice) {
        self.push(ScreenEvent::Notice { notice });
    }
}

// ── Shared bridge state ───────────────────────────────────────────────────────

/// A session together with the binder it renders through.
pub struct SettingsBridge {
    pub session: SettingsSession,
    pub binder: Arc<EventQueueBinder>,
}

impl SettingsBridge {
    /// Opens a session rendering into a fresh [`EventQueueBinder`].
    ///
    /// Events produced while opening (initial state, static rules) stay
    /// queued and are returned with the first command.
    pub fn open(
        backend: Box<dyn PersistedBackend>,
        controller: Arc<dyn ServiceController>,
        options: SessionOptions,
    ) -> Self {
        let binder = Arc::new(EventQueueBinder::new());
        let session = SettingsSession::open(backend, controller, binder.clone(), options);
        Self { session, binder }
    }
}

// ── Data Transfer Objects ─────────────────────────────────────────────────────

/// One field as shown on the screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDto {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: FieldValue,
    /// Human-readable value.
    pub display: String,
    pub enabled: bool,
    pub visible: bool,
}

/// Response to an accepted edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditDto {
    pub session: String,
    pub field: String,
    pub previous: String,
    pub current: String,
    pub changed: bool,
    pub dispatched: Vec<String>,
    pub pending: String,
    pub events: Vec<ScreenEvent>,
}

impl EditDto {
    fn new(session: &SettingsSession, outcome: EditOutcome, events: Vec<ScreenEvent>) -> Self {
        Self {
            session: session.id().to_string(),
            field: outcome.field.name().to_string(),
            previous: outcome.previous.to_string(),
            current: outcome.current.to_string(),
            changed: outcome.changed,
            dispatched: outcome
                .dispatched
                .iter()
                .map(|a| a.label().to_string())
                .collect(),
            pending: outcome.pending.label().to_string(),
            events,
        }
    }
}

/// Response to a flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushDto {
    /// Action sent to the service, `"none"` if nothing was sent.
    pub sent: String,
    pub events: Vec<ScreenEvent>,
}

/// Unified response wrapper used by every command.
///
/// A failed command still returns the screen events it produced, such as the
/// inline notice for a rejected value.  Successful responses carry their
/// events in `data`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ScreenEvent>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            events: Vec::new(),
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            events: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: Vec<ScreenEvent>) -> Self {
        self.events = events;
        self
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn field_dto(bridge: &SettingsBridge, key: FieldKey, value: &FieldValue) -> FieldDto {
    let view = bridge.binder.view(Target::Field(key));
    FieldDto {
        name: key.name().to_string(),
        kind: key.spec().ty.label().to_string(),
        value: value.clone(),
        display: value.to_string(),
        enabled: view.enabled,
        visible: view.visible && !view.removed,
    }
}

/// Returns every field still on the screen, in screen order.
pub fn list_fields(bridge: &SettingsBridge) -> CommandResult<Vec<FieldDto>> {
    let dtos = bridge
        .session
        .fields()
        .into_iter()
        .filter(|(key, _)| !bridge.binder.view(Target::Field(*key)).removed)
        .map(|(key, value)| field_dto(bridge, key, value))
        .collect();
    CommandResult::ok(dtos)
}

/// Returns one field by its stable name.
pub fn get_field(bridge: &SettingsBridge, name: &str) -> CommandResult<FieldDto> {
    let key = match FieldKey::from_name(name) {
        Ok(key) => key,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    match bridge.session.get(key) {
        Ok(value) => CommandResult::ok(field_dto(bridge, key, value)),
        Err(e) => CommandResult::err(e.to_string()),
    }
}

/// Applies an edit given as raw text.
///
/// A rejected edit returns the validation message as the error, with the
/// [`Notice::InvalidInput`] event attached; nothing was committed.
pub fn apply_edit(bridge: &mut SettingsBridge, name: &str, raw: &str) -> CommandResult<EditDto> {
    let result = bridge.session.apply_raw(name, raw);
    let events = bridge.binder.drain();
    match result {
        Ok(outcome) => CommandResult::ok(EditDto::new(&bridge.session, outcome, events)),
        Err(e) => CommandResult::err(e.to_string()).with_events(events),
    }
}

/// Sends the pending service action.
pub fn flush_pending(bridge: &mut SettingsBridge) -> CommandResult<FlushDto> {
    let sent = bridge.session.flush();
    CommandResult::ok(FlushDto {
        sent: sent.label().to_string(),
        events: bridge.binder.drain(),
    })
}

/// Drops the pending service action; returns what was dropped.
pub fn discard_pending(bridge: &mut SettingsBridge) -> CommandResult<String> {
    CommandResult::ok(bridge.session.discard_pending().label().to_string())
}

/// Re-reads fields edited on other screens.  Returns the names that changed.
pub fn resume(bridge: &mut SettingsBridge) -> CommandResult<Vec<String>> {
    match bridge.session.resume() {
        Ok(changed) => CommandResult::ok(changed.iter().map(|k| k.name().to_string()).collect()),
        Err(e) => CommandResult::err(e.to_string()),
    }
}

/// Closes the session, flushing the batch.  Returns the action sent.
pub fn close(bridge: SettingsBridge) -> PendingAction {
    bridge.session.close()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
