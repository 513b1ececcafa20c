//! Per-field input constraints.
//!
//! A [`Validator`] is bound to a field at declaration time (see
//! [`FieldKey::spec`](super::field::FieldKey::spec)) and runs before the store
//! commits a value.  Validators never touch the store or the service, so they
//! can be exercised with nothing but a value.
//!
//! Most validators are predicates.  [`Validator::PositiveOr`] is a transform:
//! it replaces a non-positive buffer size with a fallback instead of rejecting
//! the edit, which is what the log buffer dialog has always done.

use thiserror::Error;

use super::field::{FieldKey, FieldValue};

/// Highest valid TCP/UDP port.
pub const MAX_PORT: i64 = 65535;

/// A rejected input.  The value was not committed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid value for `{field}`: {reason}")]
pub struct ValidationError {
    pub field: FieldKey,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: FieldKey, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Built-in validator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Integers in `[1, 65535]`.
    Port,
    /// Strings that are not empty or whitespace-only.
    NonEmpty,
    /// Integers in `[min, max]`, inclusive.
    NumericRange { min: i64, max: i64 },
    /// Positive integers pass; anything else becomes `fallback`.
    PositiveOr { fallback: i64 },
}

impl Validator {
    /// Checks `value` for `field`, returning the value to commit.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the value is rejected.
    pub fn check(&self, field: FieldKey, value: FieldValue) -> Result<FieldValue, ValidationError> {
        match *self {
            Validator::Port => {
                let port = expect_int(field, &value)?;
                if (1..=MAX_PORT).contains(&port) {
                    Ok(value)
                } else {
                    Err(ValidationError::new(
                        field,
                        format!("port {port} is outside 1..={MAX_PORT}"),
                    ))
                }
            }
            Validator::NonEmpty => match value.as_str() {
                Some(s) if !s.trim().is_empty() => Ok(value),
                Some(_) => Err(ValidationError::new(field, "value must not be empty")),
                None => Err(ValidationError::new(field, "expected a string")),
            },
            Validator::NumericRange { min, max } => {
                let n = expect_int(field, &value)?;
                if (min..=max).contains(&n) {
                    Ok(value)
                } else {
                    Err(ValidationError::new(
                        field,
                        format!("{n} is outside {min}..={max}"),
                    ))
                }
            }
            Validator::PositiveOr { fallback } => {
                let n = expect_int(field, &value)?;
                if n > 0 {
                    Ok(value)
                } else {
                    Ok(FieldValue::Int(fallback))
                }
            }
        }
    }
}

fn expect_int(field: FieldKey, value: &FieldValue) -> Result<i64, ValidationError> {
    value
        .as_int()
        .ok_or_else(|| ValidationError::new(field, "expected an integer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(n: i64) -> Result<FieldValue, ValidationError> {
        Validator::Port.check(FieldKey::MixedPort, FieldValue::Int(n))
    }

    #[test]
    fn test_port_accepts_boundaries() {
        assert_eq!(port(1).unwrap(), FieldValue::Int(1));
        assert_eq!(port(65535).unwrap(), FieldValue::Int(65535));
    }

    #[test]
    fn test_port_rejects_values_just_outside_range() {
        assert!(port(0).is_err());
        assert!(port(65536).is_err());
    }

    #[test]
    fn test_port_rejects_exactly_the_values_outside_range() {
        for n in [-70000, -1, 0, 65536, 65537, i64::MAX, i64::MIN] {
            assert!(port(n).is_err(), "{n} must be rejected");
        }
        for n in [1, 2, 80, 443, 2080, 65534, 65535] {
            assert!(port(n).is_ok(), "{n} must be accepted");
        }
    }

    #[test]
    fn test_port_rejects_non_numeric_value() {
        let err = Validator::Port
            .check(FieldKey::MixedPort, FieldValue::Str("http".to_string()))
            .unwrap_err();
        assert_eq!(err.field, FieldKey::MixedPort);
        assert!(err.reason.contains("integer"));
    }

    #[test]
    fn test_non_empty_rejects_blank_strings() {
        let v = Validator::NonEmpty;
        assert!(v.check(FieldKey::RemoteDns, FieldValue::Str(String::new())).is_err());
        assert!(v.check(FieldKey::RemoteDns, FieldValue::Str("   ".to_string())).is_err());
        assert!(v
            .check(FieldKey::RemoteDns, FieldValue::Str("tls://1.1.1.1".to_string()))
            .is_ok());
    }

    #[test]
    fn test_numeric_range_is_inclusive() {
        let v = Validator::NumericRange { min: 1, max: 128 };
        assert!(v.check(FieldKey::MuxConcurrency, FieldValue::Int(1)).is_ok());
        assert!(v.check(FieldKey::MuxConcurrency, FieldValue::Int(128)).is_ok());
        assert!(v.check(FieldKey::MuxConcurrency, FieldValue::Int(0)).is_err());
        assert!(v.check(FieldKey::MuxConcurrency, FieldValue::Int(129)).is_err());
    }

    #[test]
    fn test_positive_or_replaces_non_positive_with_fallback() {
        let v = Validator::PositiveOr { fallback: 50 };
        assert_eq!(
            v.check(FieldKey::LogBufSize, FieldValue::Int(0)).unwrap(),
            FieldValue::Int(50)
        );
        assert_eq!(
            v.check(FieldKey::LogBufSize, FieldValue::Int(-3)).unwrap(),
            FieldValue::Int(50)
        );
        assert_eq!(
            v.check(FieldKey::LogBufSize, FieldValue::Int(256)).unwrap(),
            FieldValue::Int(256)
        );
    }

    #[test]
    fn test_validation_error_message_names_the_field() {
        let err = port(0).unwrap_err();
        assert!(err.to_string().contains("mixedPort"));
    }
}
