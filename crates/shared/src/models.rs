//! Decoded hub data: events, entity states and their context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type the hub emits whenever an entity changes state.
pub const STATE_CHANGED: &str = "state_changed";

/// Origin and causality of a state change or event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Context {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Snapshot of a single entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

impl EntityState {
    /// The `friendly_name` attribute, if the entity has one.
    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(Value::as_str)
    }

    /// Domain part of the entity id (`switch` for `switch.garage`).
    pub fn domain(&self) -> &str {
        entity_domain(&self.entity_id)
    }
}

/// Domain part of an entity id; the whole id when there is no dot.
pub fn entity_domain(entity_id: &str) -> &str {
    entity_id.split_once('.').map_or(entity_id, |(domain, _)| domain)
}

/// Payload of a `state_changed` event. Either side is `None` when the
/// entity was added or removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateChanged {
    pub entity_id: String,
    #[serde(default)]
    pub old_state: Option<EntityState>,
    #[serde(default)]
    pub new_state: Option<EntityState>,
}

/// Typed event body.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    StateChanged(StateChanged),
    /// Any event type without a dedicated decoding.
    Other(Value),
}

/// A decoded push event delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent", into = "RawEvent")]
pub struct Event {
    pub event_type: String,
    pub data: EventData,
    pub origin: Option<String>,
    pub time_fired: Option<DateTime<Utc>>,
    pub context: Option<Context>,
}

impl Event {
    /// The state change carried by this event, if it is a `state_changed` event.
    pub fn state_changed(&self) -> Option<&StateChanged> {
        match &self.data {
            EventData::StateChanged(change) => Some(change),
            EventData::Other(_) => None,
        }
    }
}

/// Event exactly as it appears under the `event` key of an event frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawEvent {
    event_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_fired: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<Context>,
}

impl TryFrom<RawEvent> for Event {
    type Error = String;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let data = if raw.event_type == STATE_CHANGED {
            let change = serde_json::from_value::<StateChanged>(raw.data)
                .map_err(|e| format!("invalid state_changed data: {}", e))?;
            EventData::StateChanged(change)
        } else {
            EventData::Other(raw.data)
        };

        Ok(Self {
            event_type: raw.event_type,
            data,
            origin: raw.origin,
            time_fired: raw.time_fired,
            context: raw.context,
        })
    }
}

impl From<Event> for RawEvent {
    fn from(event: Event) -> Self {
        let data = match event.data {
            EventData::StateChanged(change) => {
                serde_json::to_value(change).unwrap_or(Value::Null)
            }
            EventData::Other(value) => value,
        };
        Self {
            event_type: event.event_type,
            data,
            origin: event.origin,
            time_fired: event.time_fired,
            context: event.context,
        }
    }
}
