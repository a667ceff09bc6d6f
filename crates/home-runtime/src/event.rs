//! Immutable events flowing through the home event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Kinds of events produced by devices and services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DeviceStateChanged,
    TemperatureAlert,
    MotionDetected,
    PowerThresholdExceeded,
    DeviceMalfunction,
    AutomationTriggered,
    UserCommand,
}

impl EventKind {
    /// Every kind, in declaration order
    pub const ALL: [EventKind; 7] = [
        EventKind::DeviceStateChanged,
        EventKind::TemperatureAlert,
        EventKind::MotionDetected,
        EventKind::PowerThresholdExceeded,
        EventKind::DeviceMalfunction,
        EventKind::AutomationTriggered,
        EventKind::UserCommand,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DeviceStateChanged => "DEVICE_STATE_CHANGED",
            EventKind::TemperatureAlert => "TEMPERATURE_ALERT",
            EventKind::MotionDetected => "MOTION_DETECTED",
            EventKind::PowerThresholdExceeded => "POWER_THRESHOLD_EXCEEDED",
            EventKind::DeviceMalfunction => "DEVICE_MALFUNCTION",
            EventKind::AutomationTriggered => "AUTOMATION_TRIGGERED",
            EventKind::UserCommand => "USER_COMMAND",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single notification. Payload is fixed at construction.
///
/// Two events are equal only when they share an id.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    id: Uuid,
    kind: EventKind,
    source: String,
    payload: Map<String, Value>,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Build an event. Object payloads are taken as-is, `null` becomes an
    /// empty payload and any other value is stored under `"value"`.
    pub fn new(kind: EventKind, source: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        Self {
            id: Uuid::new_v4(),
            kind,
            source: source.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Add a payload entry while the event is still being built
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// String payload entry, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} from {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.kind,
            self.source,
            Value::Object(self.payload.clone())
        )
    }
}
