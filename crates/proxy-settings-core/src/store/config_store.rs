//! Typed configuration store with synchronous change notification.
//!
//! # Lifecycle
//!
//! A [`ConfigStore`] is opened when the settings screen is entered, seeded
//! from the [`PersistedBackend`] (defaults fill absent keys), mutated while the
//! screen is active, and dropped when the screen is torn down.  The backend is
//! the long-lived owner of the values; the store is the single source of
//! truth while the screen is open.
//!
//! # Notification
//!
//! `set` notifies subscribers synchronously, on the caller's thread, in
//! registration order, before returning.  Subscribers receive `&mut
//! ConfigStore` and may set *other* fields.  Setting a field whose own
//! notification is still running fails with
//! [`SettingsError::ReentrantMutation`] and leaves the running commit intact.
//!
//! ```text
//! set(k, v) ─► check type + validator ─► store ─► dirty = true ─► backend.save
//!                                                       │
//!                                                       └─► notify subscribers(k) in order
//!                                                             └─► set(k, _) inside → ReentrantMutation
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, error, warn};

use crate::domain::field::{Field, FieldKey, FieldSpec, FieldValue};
use crate::domain::validator::ValidationError;
use crate::error::SettingsError;
use crate::store::backend::PersistedBackend;

/// A committed change, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub key: FieldKey,
    pub previous: FieldValue,
    pub current: FieldValue,
}

/// What a subscriber listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Field(FieldKey),
    /// Every committed change.
    Any,
}

impl Topic {
    fn matches(self, key: FieldKey) -> bool {
        match self {
            Topic::Field(k) => k == key,
            Topic::Any => true,
        }
    }
}

/// Handle returned by [`ConfigStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = dyn FnMut(&mut ConfigStore, &FieldChange);

struct Subscriber {
    id: SubscriptionId,
    topic: Topic,
    callback: Rc<RefCell<Box<Callback>>>,
}

/// Owner of every field value for one settings screen.
pub struct ConfigStore {
    fields: HashMap<FieldKey, Field>,
    backend: Box<dyn PersistedBackend>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
    dirty: bool,
    /// Fields whose notification is currently running, innermost last.
    notifying: Vec<FieldKey>,
    violations: Vec<FieldKey>,
}

impl ConfigStore {
    /// Opens a store over `specs`, seeding each field from `backend`.
    ///
    /// Absent keys take their declared default.  A stored value that does not
    /// fit the field's type or validator is logged and replaced by the default;
    /// the store never holds an invalid value.
    pub fn open<I>(specs: I, backend: Box<dyn PersistedBackend>) -> Self
    where
        I: IntoIterator<Item = FieldSpec>,
    {
        let mut fields = HashMap::new();
        for spec in specs {
            let key = spec.key;
            let mut field = Field::from_spec(spec);
            match backend.load(key.name(), field.spec.ty) {
                Ok(Some(stored)) => match check_value(&field.spec, stored) {
                    Ok(value) => field.value = value,
                    Err(e) => warn!(field = %key, error = %e, "stored value rejected, using default"),
                },
                Ok(None) => {}
                Err(e) => warn!(field = %key, error = %e, "failed to load field, using default"),
            }
            fields.insert(key, field);
        }
        debug!(fields = fields.len(), "config store opened");

        Self {
            fields,
            backend,
            subscribers: Vec::new(),
            next_subscription: 0,
            dirty: false,
            notifying: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Opens a store holding every field of the settings screen.
    pub fn with_all_fields(backend: Box<dyn PersistedBackend>) -> Self {
        Self::open(FieldKey::ALL.iter().map(|k| k.spec()), backend)
    }

    /// Current value of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::UnknownField`] if `key` is not declared here.
    pub fn get(&self, key: FieldKey) -> Result<&FieldValue, SettingsError> {
        self.field(key).map(|f| &f.value)
    }

    /// Current value of the field persisted under `name`.
    pub fn get_by_name(&self, name: &str) -> Result<&FieldValue, SettingsError> {
        self.get(FieldKey::from_name(name)?)
    }

    /// Declaration of `key`.
    pub fn spec(&self, key: FieldKey) -> Result<&FieldSpec, SettingsError> {
        self.field(key).map(|f| &f.spec)
    }

    pub fn contains(&self, key: FieldKey) -> bool {
        self.fields.contains_key(&key)
    }

    /// Declared keys, in screen order.
    pub fn keys(&self) -> Vec<FieldKey> {
        FieldKey::ALL
            .iter()
            .copied()
            .filter(|k| self.fields.contains_key(k))
            .collect()
    }

    /// Runs the type check and validator without committing.
    ///
    /// Returns the value that `set` would store (validators may normalise it).
    pub fn check(&self, key: FieldKey, value: FieldValue) -> Result<FieldValue, SettingsError> {
        let field = self.field(key)?;
        Ok(check_value(&field.spec, value)?)
    }

    /// Parses raw user input for `key`'s declared type.
    pub fn parse(&self, key: FieldKey, raw: &str) -> Result<FieldValue, SettingsError> {
        let field = self.field(key)?;
        field
            .spec
            .ty
            .parse(raw)
            .map_err(|reason| ValidationError::new(key, reason).into())
    }

    /// Validates and commits `value`, returning the previous value.
    ///
    /// On failure nothing is stored and nobody is notified.
    ///
    /// # Errors
    ///
    /// - [`SettingsError::UnknownField`] if `key` is not declared.
    /// - [`SettingsError::Validation`] if the value is rejected.
    /// - [`SettingsError::ReentrantMutation`] if called from a notification of `key`.
    pub fn set(&mut self, key: FieldKey, value: FieldValue) -> Result<FieldValue, SettingsError> {
        if self.notifying.contains(&key) {
            error!(field = %key, "subscriber tried to set the field it is being notified about");
            self.violations.push(key);
            return Err(SettingsError::ReentrantMutation { field: key });
        }

        let value = self.check(key, value)?;
        let field = self
            .fields
            .get_mut(&key)
            .ok_or_else(|| SettingsError::UnknownField(key.name().to_string()))?;
        let previous = std::mem::replace(&mut field.value, value.clone());
        self.dirty = true;

        if let Err(e) = self.backend.save(key.name(), &value) {
            // The in-memory commit stands; the backend is expected to be reliable.
            error!(field = %key, error = %e, "failed to persist committed value");
        }
        debug!(field = %key, %previous, current = %value, "field committed");

        self.notify(FieldChange {
            key,
            previous: previous.clone(),
            current: value,
        });
        Ok(previous)
    }

    /// Parses `raw` for `key` and commits it.
    pub fn set_raw(&mut self, key: FieldKey, raw: &str) -> Result<FieldValue, SettingsError> {
        let value = self.parse(key, raw)?;
        self.set(key, value)
    }

    /// Re-reads `key` from the backend after something outside this screen
    /// changed it.
    ///
    /// A differing valid value replaces the current one and subscribers are
    /// notified, but the store is not marked dirty and nothing is written
    /// back.  Returns `true` if the value changed.
    pub fn refresh(&mut self, key: FieldKey) -> Result<bool, SettingsError> {
        let spec = self.spec(key)?.clone();
        let Some(stored) = self.backend.load(key.name(), spec.ty)? else {
            return Ok(false);
        };
        let value = check_value(&spec, stored)?;
        self.replace_clean(key, value)
    }

    /// Commits a value derived from a refreshed field.
    ///
    /// Validated like [`set`](Self::set) and notified like
    /// [`refresh`](Self::refresh): the store is not marked dirty and nothing
    /// is written back.  Returns `true` if the value changed.
    pub fn refresh_derived(&mut self, key: FieldKey, value: FieldValue) -> Result<bool, SettingsError> {
        if self.notifying.contains(&key) {
            error!(field = %key, "subscriber tried to set the field it is being notified about");
            self.violations.push(key);
            return Err(SettingsError::ReentrantMutation { field: key });
        }
        let value = self.check(key, value)?;
        self.replace_clean(key, value)
    }

    /// Registers `callback` for changes matching `topic`.
    pub fn subscribe<F>(&mut self, topic: Topic, callback: F) -> SubscriptionId
    where
        F: FnMut(&mut ConfigStore, &FieldChange) + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push(Subscriber {
            id,
            topic,
            callback: Rc::new(RefCell::new(Box::new(callback))),
        });
        id
    }

    /// Removes a subscription.  Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// `true` once any value has been committed since open or the last
    /// [`clear_dirty`](Self::clear_dirty).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Fields a subscriber tried to set re-entrantly since the last call.
    pub fn take_contract_violations(&mut self) -> Vec<FieldKey> {
        std::mem::take(&mut self.violations)
    }

    fn field(&self, key: FieldKey) -> Result<&Field, SettingsError> {
        self.fields
            .get(&key)
            .ok_or_else(|| SettingsError::UnknownField(key.name().to_string()))
    }

    fn replace_clean(&mut self, key: FieldKey, value: FieldValue) -> Result<bool, SettingsError> {
        let field = self
            .fields
            .get_mut(&key)
            .ok_or_else(|| SettingsError::UnknownField(key.name().to_string()))?;
        if field.value == value {
            return Ok(false);
        }
        let previous = std::mem::replace(&mut field.value, value.clone());
        debug!(field = %key, %previous, current = %value, "field refreshed");
        self.notify(FieldChange {
            key,
            previous,
            current: value,
        });
        Ok(true)
    }

    fn notify(&mut self, change: FieldChange) {
        let targets: Vec<(SubscriptionId, Rc<RefCell<Box<Callback>>>)> = self
            .subscribers
            .iter()
            .filter(|s| s.topic.matches(change.key))
            .map(|s| (s.id, Rc::clone(&s.callback)))
            .collect();
        if targets.is_empty() {
            return;
        }

        self.notifying.push(change.key);
        for (id, callback) in targets {
            // An earlier callback may have unsubscribed this one.
            if !self.subscribers.iter().any(|s| s.id == id) {
                continue;
            }
            match callback.try_borrow_mut() {
                Ok(mut guard) => {
                    let f = &mut *guard;
                    f(&mut *self, &change);
                }
                Err(_) => {
                    warn!(field = %change.key, subscription = id.0, "subscriber already running, skipped nested notification");
                }
            }
        }
        self.notifying.pop();
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("fields", &self.fields.len())
            .field("subscribers", &self.subscribers.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

fn check_value(spec: &FieldSpec, value: FieldValue) -> Result<FieldValue, ValidationError> {
    if !spec.ty.accepts(&value) {
        return Err(ValidationError::new(
            spec.key,
            format!("expected a {}, got `{value}`", spec.ty.label()),
        ));
    }
    match spec.validator {
        Some(validator) => validator.check(spec.key, value),
        None => Ok(value),
    }
}
