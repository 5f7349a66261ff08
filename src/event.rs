use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

/// One decoded message from the broker topic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrokerEvent {
    pub timestamp: DateTime<FixedOffset>,
    /// Absent in the payload reads as `Null`
    #[serde(default)]
    pub message: EventBody,
}

/// The opaque `message` field. Only ever rendered for display.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EventBody {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
    Null,
    Structured(serde_json::Value),
}

impl Default for EventBody {
    fn default() -> Self {
        EventBody::Null
    }
}

impl std::fmt::Display for EventBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventBody::Text(text) => f.write_str(text),
            EventBody::Number(n) => write!(f, "{}", n),
            EventBody::Bool(b) => write!(f, "{}", b),
            EventBody::Null => f.write_str("null"),
            EventBody::Structured(value) => write!(f, "{}", value),
        }
    }
}

impl BrokerEvent {
    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}
