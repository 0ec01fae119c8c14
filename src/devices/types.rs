//! Device types shared by the registry, event pipeline and calibration engine

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::DefaultPropertyState;
use super::transport::DeviceTransport;
use crate::config::REDACTED;
use crate::{Error, Result};

/// Property names keyed by transport-level index
pub type PropertyNames = BTreeMap<u8, String>;

/// Type tag selecting type-specific behaviour
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceKind {
    /// Roller shutter reporting open/close/stop on its default property
    Blind,
    /// Any other device, handled generically
    Other(String),
}

impl DeviceKind {
    /// Whether this device gets the blind calibration logic
    #[must_use]
    pub const fn is_blind(&self) -> bool {
        matches!(self, Self::Blind)
    }
}

impl From<&str> for DeviceKind {
    fn from(kind: &str) -> Self {
        if kind.eq_ignore_ascii_case("blind") {
            Self::Blind
        } else {
            Self::Other(kind.to_string())
        }
    }
}

impl From<String> for DeviceKind {
    fn from(kind: String) -> Self {
        Self::from(kind.as_str())
    }
}

impl From<DeviceKind> for String {
    fn from(kind: DeviceKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blind => write!(f, "blind"),
            Self::Other(kind) => write!(f, "{kind}"),
        }
    }
}

/// Where to reach a device: an IP address or an opaque device ID, never both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Address {
    Ip(IpAddr),
    Id(String),
}

impl Address {
    /// Build an address from the optional ip/id pair of a define request
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` unless exactly one of the two is given
    /// and the ip parses
    pub fn from_parts(ip: Option<&str>, id: Option<&str>) -> Result<Self> {
        match (ip, id) {
            (Some(_), Some(_)) => Err(Error::InvalidArgument(
                "specify either ip or id, not both".to_string(),
            )),
            (Some(ip), None) => ip
                .trim()
                .parse()
                .map(Self::Ip)
                .map_err(|e| Error::InvalidArgument(format!("invalid ip '{ip}': {e}"))),
            (None, Some(id)) if !id.trim().is_empty() => Ok(Self::Id(id.trim().to_string())),
            _ => Err(Error::InvalidArgument(
                "an ip or a device id is required".to_string(),
            )),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "ip {ip}"),
            Self::Id(id) => write!(f, "id {id}"),
        }
    }
}

/// A device property value as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl PropertyValue {
    /// Parse a command argument: booleans and integers first, text otherwise
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => raw
                .parse::<i64>()
                .map_or_else(|_| Self::Text(raw.to_string()), Self::Int),
        }
    }

    /// Text content, if this is a text value
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean value
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether this is the given text value
    #[must_use]
    pub fn is(&self, text: &str) -> bool {
        self.as_str() == Some(text)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Measured full-travel durations of a calibrated blind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelTimes {
    /// Time from fully open to fully closed, in milliseconds
    pub close_ms: i64,
    /// Time from fully closed to fully open, in milliseconds
    pub open_ms: i64,
}

/// Server-provided state of a blind
///
/// `percentage` is 0 when fully open and 100 when fully closed. It is only
/// set once `travel` is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlindState {
    #[serde(default)]
    pub travel: Option<TravelTimes>,
    #[serde(default)]
    pub percentage: Option<f64>,
}

impl BlindState {
    /// Commit a calibration; the blind is assumed fully open afterwards
    pub fn commit(&mut self, travel: TravelTimes) {
        self.travel = Some(travel);
        self.percentage = Some(0.0);
    }
}

/// Input of a `define` request
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub name: String,
    pub kind: DeviceKind,
    pub address: Address,
    pub local_key: String,
    #[serde(default)]
    pub properties: PropertyNames,
}

impl fmt::Debug for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("address", &self.address)
            .field("local_key", &REDACTED)
            .field("properties", &self.properties)
            .finish()
    }
}

/// Persistent record of a known device
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    pub name: String,
    pub kind: DeviceKind,
    pub address: Address,
    pub local_key: String,
    #[serde(default)]
    pub properties: PropertyNames,
    #[serde(default)]
    pub blind: BlindState,
}

impl fmt::Debug for DeviceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("address", &self.address)
            .field("local_key", &REDACTED)
            .field("properties", &self.properties)
            .field("blind", &self.blind)
            .finish()
    }
}

impl DeviceDefinition {
    /// Whether the spec describes the same physical device (name aside)
    #[must_use]
    pub fn same_identity(&self, spec: &DeviceSpec) -> bool {
        self.kind == spec.kind && self.address == spec.address && self.local_key == spec.local_key
    }
}

impl From<DeviceSpec> for DeviceDefinition {
    fn from(spec: DeviceSpec) -> Self {
        Self {
            name: spec.name,
            kind: spec.kind,
            address: spec.address,
            local_key: spec.local_key,
            properties: spec.properties,
            blind: BlindState::default(),
        }
    }
}

/// Identifies one attachment of a transport handle to a device
///
/// A device that is undefined and defined again gets a fresh session ID, so
/// late events from the old handle never reach the new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transient state of an initialized device
pub struct DeviceSession {
    pub id: SessionId,
    pub handle: Arc<dyn DeviceTransport>,
    /// Snapshot of the definition's property names, discarded on undefine
    pub properties: PropertyNames,
    pub default_state: DefaultPropertyState,
    /// Set while a reconnect loop is running for this session
    pub reconnecting: Arc<AtomicBool>,
}

impl DeviceSession {
    #[must_use]
    pub fn new(handle: Arc<dyn DeviceTransport>, properties: PropertyNames) -> Self {
        Self {
            id: SessionId::new(),
            handle,
            properties,
            default_state: DefaultPropertyState::default(),
            reconnecting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Configured name of a property, falling back to its index
    #[must_use]
    pub fn property_name(&self, index: u8) -> String {
        self.properties
            .get(&index)
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }

    /// Resolve a property given by index or by configured name
    #[must_use]
    pub fn resolve_property(&self, property: &str) -> Option<u8> {
        if let Ok(index) = property.trim().parse::<u8>() {
            return Some(index);
        }
        self.properties
            .iter()
            .find(|(_, name)| name.as_str() == property)
            .map(|(index, _)| *index)
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("connected", &self.handle.is_connected())
            .field("properties", &self.properties)
            .field("default_state", &self.default_state)
            .finish_non_exhaustive()
    }
}
