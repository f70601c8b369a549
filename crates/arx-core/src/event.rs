//! Event types carried on the event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wildcard used to subscribe to every event
    pub fn match_all() -> Self {
        Self("*".to_string())
    }

    pub fn is_match_all(&self) -> bool {
        self.0 == "*"
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An operational event: a schema-agnostic JSON payload plus metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier (ULID)
    pub id: String,

    /// The type of event
    pub event_type: EventType,

    /// The event payload
    pub data: serde_json::Value,

    /// Where the event came from
    #[serde(default)]
    pub origin: EventOrigin,

    pub time_fired: DateTime<Utc>,
}

impl Event {
    /// Event fired now, with a fresh ULID
    pub fn new(event_type: impl Into<EventType>, data: serde_json::Value) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            event_type: event_type.into(),
            data,
            origin: EventOrigin::Local,
            time_fired: Utc::now(),
        }
    }

    pub fn with_origin(mut self, origin: EventOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Override the fired timestamp
    pub fn at(mut self, time_fired: DateTime<Utc>) -> Self {
        self.time_fired = time_fired;
        self
    }
}

/// Origin of an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    /// Produced inside this process
    #[default]
    Local,
    /// Received from a device gateway or another service
    Remote,
}
