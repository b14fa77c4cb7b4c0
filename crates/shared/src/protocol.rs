//! Hub WebSocket protocol: outbound commands and inbound frame classification.
//!
//! Every frame is a JSON object with a `type` field. Commands after the
//! handshake carry an integer `id` that the server echoes back on the
//! matching `result` (and on every `event` of a subscription).

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Event, ProtocolError, ServerError};

/// Integer identifier correlating a command with its result.
pub type MessageId = u64;

/// Commands the client sends to the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        access_token: String,
    },
    SubscribeEvents {
        id: MessageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_type: Option<String>,
    },
    UnsubscribeEvents {
        id: MessageId,
        subscription: MessageId,
    },
    CallService {
        id: MessageId,
        domain: String,
        service: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Value>,
    },
    GetStates {
        id: MessageId,
    },
    GetConfig {
        id: MessageId,
    },
    GetServices {
        id: MessageId,
    },
}

impl ClientMessage {
    pub fn auth(access_token: impl Into<String>) -> Self {
        ClientMessage::Auth {
            access_token: access_token.into(),
        }
    }

    /// The correlation id, `None` for the auth frame.
    pub fn id(&self) -> Option<MessageId> {
        match self {
            ClientMessage::Auth { .. } => None,
            ClientMessage::SubscribeEvents { id, .. }
            | ClientMessage::UnsubscribeEvents { id, .. }
            | ClientMessage::CallService { id, .. }
            | ClientMessage::GetStates { id }
            | ClientMessage::GetConfig { id }
            | ClientMessage::GetServices { id } => Some(*id),
        }
    }

    /// Replace the correlation id. The auth frame is returned unchanged.
    pub fn with_id(mut self, new_id: MessageId) -> Self {
        match &mut self {
            ClientMessage::Auth { .. } => {}
            ClientMessage::SubscribeEvents { id, .. }
            | ClientMessage::UnsubscribeEvents { id, .. }
            | ClientMessage::CallService { id, .. }
            | ClientMessage::GetStates { id }
            | ClientMessage::GetConfig { id }
            | ClientMessage::GetServices { id } => *id = new_id,
        }
        self
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

/// Serialize `payload` into a JSON object, the shape every command must have.
pub fn to_object<T: Serialize + ?Sized>(payload: &T) -> Result<Map<String, Value>, ProtocolError> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProtocolError::Encode(format!(
            "payload must be a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ProtocolError::Encode(e.to_string())),
    }
}

/// Set the correlation id of a command, overwriting any id already present.
pub fn stamp_id(frame: &mut Map<String, Value>, id: MessageId) {
    frame.insert("id".to_string(), Value::from(id));
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Body of a `result` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultMessage {
    pub id: MessageId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerError>,
}

impl ResultMessage {
    /// Collapse into the payload on success or the server's error on failure.
    pub fn into_result(self) -> Result<Value, ServerError> {
        if self.success {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self.error.unwrap_or_else(|| {
                ServerError::new("unknown_error", "request failed without an error payload")
            }))
        }
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    AuthRequired { ha_version: Option<String> },
    AuthOk { ha_version: Option<String> },
    AuthInvalid { message: Option<String> },
    Event { id: MessageId, event: Event },
    Result(ResultMessage),
    /// A well-formed frame with a `type` this client does not handle.
    Unrecognized(String),
}

#[derive(Deserialize)]
struct AuthFrame {
    #[serde(default)]
    ha_version: Option<String>,
}

#[derive(Deserialize)]
struct AuthInvalidFrame {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct EventFrame {
    id: MessageId,
    event: Event,
}

/// Classify a text frame by its `type` field.
pub fn classify(text: &str) -> Result<Inbound, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing string `type` field".to_string()))?
        .to_string();

    match kind.as_str() {
        "auth_required" => {
            let frame: AuthFrame = decode(&kind, value)?;
            Ok(Inbound::AuthRequired {
                ha_version: frame.ha_version,
            })
        }
        "auth_ok" => {
            let frame: AuthFrame = decode(&kind, value)?;
            Ok(Inbound::AuthOk {
                ha_version: frame.ha_version,
            })
        }
        "auth_invalid" => {
            let frame: AuthInvalidFrame = decode(&kind, value)?;
            Ok(Inbound::AuthInvalid {
                message: frame.message,
            })
        }
        "event" => {
            let frame: EventFrame = decode(&kind, value)?;
            Ok(Inbound::Event {
                id: frame.id,
                event: frame.event,
            })
        }
        "result" => decode(&kind, value).map(Inbound::Result),
        _ => Ok(Inbound::Unrecognized(kind)),
    }
}

fn decode<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::Decode {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_frame_shape() {
        let json = ClientMessage::auth("T").to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, json!({"type": "auth", "access_token": "T"}));
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let msg = ClientMessage::SubscribeEvents {
            id: 1,
            event_type: Some("state_changed".to_string()),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"id": 1, "type": "subscribe_events", "event_type": "state_changed"})
        );
    }

    #[test]
    fn test_call_service_frame_shape() {
        let msg = ClientMessage::CallService {
            id: 7,
            domain: "switch".to_string(),
            service: "toggle".to_string(),
            service_data: Some(json!({"entity_id": "switch.garage"})),
            target: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 7,
                "type": "call_service",
                "domain": "switch",
                "service": "toggle",
                "service_data": {"entity_id": "switch.garage"}
            })
        );
    }

    #[test]
    fn test_with_id_rewrites_correlated_frames_only() {
        let msg = ClientMessage::GetStates { id: 0 }.with_id(42);
        assert_eq!(msg.id(), Some(42));
        assert_eq!(ClientMessage::auth("T").with_id(9).id(), None);
    }

    #[test]
    fn test_stamp_id_overwrites_existing_id() {
        let mut map = to_object(&json!({"type": "get_states", "id": 3})).unwrap();
        stamp_id(&mut map, 11);
        assert_eq!(map.get("id"), Some(&json!(11)));
        assert_eq!(map.get("type"), Some(&json!("get_states")));
    }

    #[test]
    fn test_to_object_rejects_non_objects() {
        let err = to_object(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, ProtocolError::Encode(ref m) if m.contains("an array")));
    }

    #[test]
    fn test_classify_handshake_frames() {
        assert_eq!(
            classify(r#"{"type":"auth_required","ha_version":"2023.10.1"}"#).unwrap(),
            Inbound::AuthRequired {
                ha_version: Some("2023.10.1".to_string())
            }
        );
        assert_eq!(
            classify(r#"{"type":"auth_ok"}"#).unwrap(),
            Inbound::AuthOk { ha_version: None }
        );
        assert_eq!(
            classify(r#"{"type":"auth_invalid","message":"Invalid access token"}"#).unwrap(),
            Inbound::AuthInvalid {
                message: Some("Invalid access token".to_string())
            }
        );
    }

    #[test]
    fn test_classify_result_success_and_failure() {
        let ok = classify(r#"{"id":5,"type":"result","success":true,"result":[]}"#).unwrap();
        match ok {
            Inbound::Result(result) => {
                assert_eq!(result.id, 5);
                assert_eq!(result.into_result(), Ok(json!([])));
            }
            other => panic!("expected result, got {:?}", other),
        }

        let failed = classify(
            r#"{"id":6,"type":"result","success":false,"error":{"code":"not_found","message":"Service not found."}}"#,
        )
        .unwrap();
        match failed {
            Inbound::Result(result) => assert_eq!(
                result.into_result(),
                Err(ServerError::new("not_found", "Service not found."))
            ),
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[test]
    fn test_result_without_payload_is_null() {
        let result = ResultMessage {
            id: 1,
            success: true,
            result: None,
            error: None,
        };
        assert_eq!(result.into_result(), Ok(Value::Null));
    }

    #[test]
    fn test_classify_event() {
        let frame = json!({
            "id": 1,
            "type": "event",
            "event": {
                "event_type": "state_changed",
                "data": {"entity_id": "switch.garage", "old_state": null, "new_state": null},
                "origin": "LOCAL"
            }
        });
        match classify(&frame.to_string()).unwrap() {
            Inbound::Event { id, event } => {
                assert_eq!(id, 1);
                assert_eq!(event.state_changed().unwrap().entity_id, "switch.garage");
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_unknown_type() {
        assert_eq!(
            classify(r#"{"id":2,"type":"pong"}"#).unwrap(),
            Inbound::Unrecognized("pong".to_string())
        );
    }

    #[test]
    fn test_classify_malformed_frames() {
        assert!(matches!(classify("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(classify(r#"{"id":1}"#), Err(ProtocolError::Malformed(_))));
        assert!(matches!(classify(r#"{"type":5}"#), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            classify(r#"{"type":"result","success":true}"#),
            Err(ProtocolError::Decode { ref kind, .. }) if kind == "result"
        ));
        assert!(matches!(
            classify(r#"{"type":"event","id":1,"event":{"event_type":"state_changed","data":{"old_state":1}}}"#),
            Err(ProtocolError::Decode { ref kind, .. }) if kind == "event"
        ));
    }
}
