//! Core identity and event types shared by producers and subscribers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable identity of an entity (a managed resource, service or group).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId(id.to_string())
    }
}

/// How a sensor's values are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Each event carries the new current value of an attribute.
    Attribute,
    /// Each event is a one-off notification with no retained value.
    Notification,
}

/// A named, typed channel of state changes an entity can emit.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sensor {
    name: String,
    kind: SensorKind,
}

impl Sensor {
    /// An attribute sensor, e.g. `service.state`.
    pub fn attribute(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SensorKind::Attribute,
        }
    }

    /// A notification sensor, e.g. `group.member.added`.
    pub fn notification(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SensorKind::Notification,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }
}

impl fmt::Debug for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sensor({}:{:?})", self.name, self.kind)
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A state change emitted by `source` on `sensor`.
///
/// The payload is opaque to the dispatch core; it is carried through to
/// listeners untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorEvent {
    pub source: EntityId,
    pub sensor: Sensor,
    pub value: serde_json::Value,
    pub timestamp: Timestamp,
}

impl SensorEvent {
    /// Create an event stamped with the current time.
    pub fn new(source: EntityId, sensor: Sensor, value: serde_json::Value) -> Self {
        Self {
            source,
            sensor,
            value,
            timestamp: Timestamp::now(),
        }
    }

    pub fn source(&self) -> &EntityId {
        &self.source
    }

    pub fn sensor(&self) -> &Sensor {
        &self.sensor
    }
}
