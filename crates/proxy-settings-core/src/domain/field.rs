//! Statically typed field registry.
//!
//! Every setting shown on the screen is a variant of [`FieldKey`].  The key
//! carries its persisted name, its declared [`FieldType`], its default value
//! and its optional [`Validator`], so code inside the engine never looks a
//! field up by string or casts its value at runtime.  String names only
//! appear at the two boundaries: the persisted backend and raw user input.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::validator::Validator;
use crate::error::SettingsError;

/// Choices for the night-mode selector (follow system, light, dark, auto).
pub const NIGHT_THEME_CHOICES: &[&str] = &["0", "1", "2", "3"];
/// Choices for the service mode selector.
pub const SERVICE_MODE_CHOICES: &[&str] = &["vpn", "proxy"];
/// Choices for IPv6 handling (disable, enable, prefer, only).
pub const IPV6_MODE_CHOICES: &[&str] = &["0", "1", "2", "3"];
/// Choices for traffic sniffing (off, http, http + tls).
pub const TRAFFIC_SNIFFING_CHOICES: &[&str] = &["0", "1", "2"];
/// Choices for the core log level, from silent to trace.
pub const LOG_LEVEL_CHOICES: &[&str] = &["0", "1", "2", "3", "4", "5"];
/// Speed sample interval in milliseconds; `"0"` disables sampling.
pub const SPEED_INTERVAL_CHOICES: &[&str] = &["0", "500", "1000", "3000", "10000"];
/// TUN stack implementations (mixed, system, gvisor).
pub const TUN_IMPLEMENTATION_CHOICES: &[&str] = &["0", "1", "2"];

/// Log buffer size used when the user enters a non-positive value.
pub const DEFAULT_LOG_BUF_SIZE: i64 = 50;

/// Identity of every field on the settings screen.
///
/// The persisted name returned by [`FieldKey::name`] is stable; renaming a
/// variant is fine, changing its name string is a storage migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldKey {
    AppTheme,
    NightTheme,
    ServiceMode,
    MixedPort,
    AllowAccess,
    AppendHttpProxy,
    LocalDnsPort,
    ShowDirectSpeed,
    Ipv6Mode,
    TrafficSniffing,
    MuxConcurrency,
    MuxProtocols,
    TcpKeepAliveInterval,
    BypassLan,
    BypassLanInCore,
    RemoteDns,
    DirectDns,
    EnableDnsRouting,
    EnableFakeDns,
    LogLevel,
    LogBufSize,
    Mtu,
    MeteredNetwork,
    ProxyApps,
    ProfileTrafficStatistics,
    SpeedInterval,
    TunImplementation,
    ResolveDestination,
    AcquireWakeLock,
    EnableClashApi,
    NekoPlugins,
    RoutePackages,
}

impl FieldKey {
    /// All declared fields, in screen order.
    pub const ALL: [FieldKey; 32] = [
        FieldKey::AppTheme,
        FieldKey::NightTheme,
        FieldKey::ServiceMode,
        FieldKey::MixedPort,
        FieldKey::AllowAccess,
        FieldKey::AppendHttpProxy,
        FieldKey::LocalDnsPort,
        FieldKey::ShowDirectSpeed,
        FieldKey::Ipv6Mode,
        FieldKey::TrafficSniffing,
        FieldKey::MuxConcurrency,
        FieldKey::MuxProtocols,
        FieldKey::TcpKeepAliveInterval,
        FieldKey::BypassLan,
        FieldKey::BypassLanInCore,
        FieldKey::RemoteDns,
        FieldKey::DirectDns,
        FieldKey::EnableDnsRouting,
        FieldKey::EnableFakeDns,
        FieldKey::LogLevel,
        FieldKey::LogBufSize,
        FieldKey::Mtu,
        FieldKey::MeteredNetwork,
        FieldKey::ProxyApps,
        FieldKey::ProfileTrafficStatistics,
        FieldKey::SpeedInterval,
        FieldKey::TunImplementation,
        FieldKey::ResolveDestination,
        FieldKey::AcquireWakeLock,
        FieldKey::EnableClashApi,
        FieldKey::NekoPlugins,
        FieldKey::RoutePackages,
    ];

    /// Stable persisted name of the field.
    pub fn name(self) -> &'static str {
        match self {
            FieldKey::AppTheme => "appTheme",
            FieldKey::NightTheme => "nightTheme",
            FieldKey::ServiceMode => "serviceMode",
            FieldKey::MixedPort => "mixedPort",
            FieldKey::AllowAccess => "allowAccess",
            FieldKey::AppendHttpProxy => "appendHttpProxy",
            FieldKey::LocalDnsPort => "portLocalDns",
            FieldKey::ShowDirectSpeed => "showDirectSpeed",
            FieldKey::Ipv6Mode => "ipv6Mode",
            FieldKey::TrafficSniffing => "trafficSniffing",
            FieldKey::MuxConcurrency => "muxConcurrency",
            FieldKey::MuxProtocols => "mux",
            FieldKey::TcpKeepAliveInterval => "tcpKeepAliveInterval",
            FieldKey::BypassLan => "bypassLan",
            FieldKey::BypassLanInCore => "bypassLanInCore",
            FieldKey::RemoteDns => "remoteDns",
            FieldKey::DirectDns => "directDns",
            FieldKey::EnableDnsRouting => "enableDnsRouting",
            FieldKey::EnableFakeDns => "enableFakeDns",
            FieldKey::LogLevel => "logLevel",
            FieldKey::LogBufSize => "logBufSize",
            FieldKey::Mtu => "mtu",
            FieldKey::MeteredNetwork => "meteredNetwork",
            FieldKey::ProxyApps => "proxyApps",
            FieldKey::ProfileTrafficStatistics => "profileTrafficStatistics",
            FieldKey::SpeedInterval => "speedInterval",
            FieldKey::TunImplementation => "tunImplementation",
            FieldKey::ResolveDestination => "resolveDestination",
            FieldKey::AcquireWakeLock => "acquireWakeLock",
            FieldKey::EnableClashApi => "enableClashAPI",
            FieldKey::NekoPlugins => "nekoPlugins",
            FieldKey::RoutePackages => "routePackages",
        }
    }

    /// Resolves a persisted name back to its key.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::UnknownField`] when no field has that name.
    pub fn from_name(name: &str) -> Result<FieldKey, SettingsError> {
        FieldKey::ALL
            .iter()
            .copied()
            .find(|key| key.name() == name)
            .ok_or_else(|| SettingsError::UnknownField(name.to_string()))
    }

    /// Declaration of this field: type, default and validator.
    pub fn spec(self) -> FieldSpec {
        use FieldKey::*;
        match self {
            AppTheme => FieldSpec::new(self, FieldType::Integer, FieldValue::Int(0)),
            NightTheme => FieldSpec::choice(self, NIGHT_THEME_CHOICES, "0"),
            ServiceMode => FieldSpec::choice(self, SERVICE_MODE_CHOICES, "vpn"),
            MixedPort => FieldSpec::new(self, FieldType::Integer, FieldValue::Int(2080))
                .with_validator(Validator::Port),
            AllowAccess => FieldSpec::flag(self, false),
            AppendHttpProxy => FieldSpec::flag(self, false),
            LocalDnsPort => FieldSpec::new(self, FieldType::Integer, FieldValue::Int(6450))
                .with_validator(Validator::Port),
            ShowDirectSpeed => FieldSpec::flag(self, true),
            Ipv6Mode => FieldSpec::choice(self, IPV6_MODE_CHOICES, "0"),
            TrafficSniffing => FieldSpec::choice(self, TRAFFIC_SNIFFING_CHOICES, "1"),
            MuxConcurrency => FieldSpec::new(self, FieldType::Integer, FieldValue::Int(8))
                .with_validator(Validator::NumericRange { min: 1, max: 128 }),
            MuxProtocols => FieldSpec::new(self, FieldType::StringSet, FieldValue::empty_set()),
            TcpKeepAliveInterval => {
                FieldSpec::new(self, FieldType::Integer, FieldValue::Int(15))
                    .with_validator(Validator::NumericRange { min: 1, max: 3600 })
            }
            BypassLan => FieldSpec::flag(self, false),
            BypassLanInCore => FieldSpec::flag(self, false),
            RemoteDns => FieldSpec::new(
                self,
                FieldType::String,
                FieldValue::Str("https://dns.google/dns-query".to_string()),
            )
            .with_validator(Validator::NonEmpty),
            DirectDns => FieldSpec::new(
                self,
                FieldType::String,
                FieldValue::Str("https://223.5.5.5/dns-query".to_string()),
            )
            .with_validator(Validator::NonEmpty),
            EnableDnsRouting => FieldSpec::flag(self, true),
            EnableFakeDns => FieldSpec::flag(self, false),
            LogLevel => FieldSpec::choice(self, LOG_LEVEL_CHOICES, "0"),
            LogBufSize => {
                FieldSpec::new(self, FieldType::Integer, FieldValue::Int(DEFAULT_LOG_BUF_SIZE))
                    .with_validator(Validator::PositiveOr {
                        fallback: DEFAULT_LOG_BUF_SIZE,
                    })
            }
            Mtu => FieldSpec::new(self, FieldType::Integer, FieldValue::Int(9000))
                .with_validator(Validator::NumericRange {
                    min: 1280,
                    max: 65535,
                }),
            MeteredNetwork => FieldSpec::flag(self, false),
            ProxyApps => FieldSpec::flag(self, false),
            ProfileTrafficStatistics => FieldSpec::flag(self, true),
            SpeedInterval => FieldSpec::choice(self, SPEED_INTERVAL_CHOICES, "1000"),
            TunImplementation => FieldSpec::choice(self, TUN_IMPLEMENTATION_CHOICES, "0"),
            ResolveDestination => FieldSpec::flag(self, false),
            AcquireWakeLock => FieldSpec::flag(self, false),
            EnableClashApi => FieldSpec::flag(self, false),
            NekoPlugins => FieldSpec::new(self, FieldType::StringSet, FieldValue::empty_set()),
            RoutePackages => FieldSpec::new(self, FieldType::StringSet, FieldValue::empty_set()),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<FieldKey> for String {
    fn from(key: FieldKey) -> Self {
        key.name().to_string()
    }
}

impl TryFrom<String> for FieldKey {
    type Error = SettingsError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        FieldKey::from_name(&name)
    }
}

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    String,
    Boolean,
    StringSet,
    /// A string restricted to a fixed list of choices.
    Enum(&'static [&'static str]),
}

impl FieldType {
    /// Returns `true` if `value` has this type (and, for enums, is one of the choices).
    pub fn accepts(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (FieldType::Integer, FieldValue::Int(_))
            | (FieldType::String, FieldValue::Str(_))
            | (FieldType::Boolean, FieldValue::Bool(_))
            | (FieldType::StringSet, FieldValue::StrSet(_)) => true,
            (FieldType::Enum(choices), FieldValue::Enum(v)) => choices.contains(&v.as_str()),
            _ => false,
        }
    }

    /// Parses raw text typed by the user into a value of this type.
    ///
    /// String sets are comma separated; blank entries are dropped.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the text does not parse.
    pub fn parse(&self, raw: &str) -> Result<FieldValue, String> {
        let trimmed = raw.trim();
        match self {
            FieldType::Integer => trimmed
                .parse::<i64>()
                .map(FieldValue::Int)
                .map_err(|_| format!("`{trimmed}` is not a number")),
            FieldType::String => Ok(FieldValue::Str(raw.to_string())),
            FieldType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Ok(FieldValue::Bool(true)),
                "false" | "0" | "off" => Ok(FieldValue::Bool(false)),
                _ => Err(format!("`{trimmed}` is not a boolean")),
            },
            FieldType::StringSet => Ok(FieldValue::StrSet(
                trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            FieldType::Enum(choices) => {
                if choices.contains(&trimmed) {
                    Ok(FieldValue::Enum(trimmed.to_string()))
                } else {
                    Err(format!(
                        "`{trimmed}` is not one of [{}]",
                        choices.join(", ")
                    ))
                }
            }
        }
    }

    /// Short name used in error messages.
    pub fn label(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::StringSet => "string set",
            FieldType::Enum(_) => "choice",
        }
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Int(i64),
    Str(String),
    Bool(bool),
    StrSet(BTreeSet<String>),
    Enum(String),
}

impl FieldValue {
    pub fn empty_set() -> Self {
        FieldValue::StrSet(BTreeSet::new())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text of a string or enum value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(v) | FieldValue::Enum(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            FieldValue::StrSet(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Str(v) | FieldValue::Enum(v) => f.write_str(v),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::StrSet(v) => {
                let items: Vec<&str> = v.iter().map(String::as_str).collect();
                write!(f, "{}", items.join(","))
            }
        }
    }
}

/// Declaration of a field: identity, type, default and validator.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub key: FieldKey,
    pub ty: FieldType,
    pub default: FieldValue,
    pub validator: Option<Validator>,
}

impl FieldSpec {
    pub fn new(key: FieldKey, ty: FieldType, default: FieldValue) -> Self {
        Self {
            key,
            ty,
            default,
            validator: None,
        }
    }

    fn flag(key: FieldKey, default: bool) -> Self {
        Self::new(key, FieldType::Boolean, FieldValue::Bool(default))
    }

    fn choice(key: FieldKey, choices: &'static [&'static str], default: &str) -> Self {
        Self::new(
            key,
            FieldType::Enum(choices),
            FieldValue::Enum(default.to_string()),
        )
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }
}

/// A declared field together with its current value.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub spec: FieldSpec,
    pub value: FieldValue,
}

impl Field {
    /// Creates a field holding its default value.
    pub fn from_spec(spec: FieldSpec) -> Self {
        let value = spec.default.clone();
        Self { spec, value }
    }
}
