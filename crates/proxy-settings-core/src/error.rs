//! Error taxonomy shared by the store, the session and the service port.
//!
//! | Error | Kind | Handling |
//! |-------|------|----------|
//! | [`SettingsError::UnknownField`] | programming error | fail fast |
//! | [`SettingsError::Validation`] | rejected input | shown next to the field, nothing committed |
//! | [`SettingsError::ReentrantMutation`] | subscriber broke its contract | loud in debug, logged in release |
//! | [`SettingsError::Service`] | live service refused an action | notice only, commit stands |
//! | [`SettingsError::Backend`] | persisted backend failure | boundary only |

use thiserror::Error;

use crate::domain::field::FieldKey;
use crate::domain::validator::ValidationError;
use crate::store::backend::BackendError;

/// Failure reported by the external service controller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The service process or binder is not reachable.
    #[error("service is unavailable: {0}")]
    Unavailable(String),

    /// The service received the request but refused or failed it.
    #[error("service rejected {action}: {reason}")]
    Rejected {
        action: &'static str,
        reason: String,
    },
}

/// Top-level error type of the settings engine.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The field is not declared in this store.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// The value was rejected and not committed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A subscriber tried to set the field whose notification it is handling.
    #[error("re-entrant mutation of `{field}` while its change notification is running")]
    ReentrantMutation { field: FieldKey },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SettingsError {
    /// Returns `true` for errors that indicate a bug rather than bad input or
    /// an external failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            SettingsError::UnknownField(_) | SettingsError::ReentrantMutation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_converts_transparently() {
        let err: SettingsError = ValidationError::new(FieldKey::Mtu, "too small").into();
        assert_eq!(err.to_string(), "invalid value for `mtu`: too small");
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn test_reentrant_mutation_is_a_contract_violation() {
        let err = SettingsError::ReentrantMutation {
            field: FieldKey::SpeedInterval,
        };
        assert!(err.is_contract_violation());
        assert!(err.to_string().contains("speedInterval"));
    }

    #[test]
    fn test_service_error_display_includes_action() {
        let err = ServiceError::Rejected {
            action: "reload",
            reason: "core busy".to_string(),
        };
        assert_eq!(err.to_string(), "service rejected reload: core busy");
    }
}
