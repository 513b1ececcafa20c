//! Port to the screen that renders the settings.

use proxy_settings_core::{FieldKey, FieldValue, PendingAction, PresentationRequest, Target};
use serde::{Deserialize, Serialize};

/// Message shown to the user outside the normal field rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// An edit was rejected; shown next to the field.  Nothing was committed.
    InvalidInput { field: FieldKey, reason: String },
    /// The service refused or failed an action.  The configuration change
    /// that caused it was kept.
    ServiceActionFailed {
        action: PendingAction,
        message: String,
    },
}

/// Renders fields and affordances.
///
/// All methods are called synchronously from the session, on the thread that
/// applied the edit, after the corresponding value has been committed.
pub trait ScreenBinder: Send + Sync {
    fn set_enabled(&self, target: Target, enabled: bool);

    fn set_visible(&self, target: Target, visible: bool);

    /// Takes an element off the screen for the rest of the session.
    fn remove(&self, target: Target);

    /// A committed value changed, including values changed by recompute
    /// edges or by a refresh from the backend.
    fn value_changed(&self, field: FieldKey, value: &FieldValue);

    fn present(&self, request: PresentationRequest);

    fn notify(&self, notice: Notice);
}
