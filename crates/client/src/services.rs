//! Service calls targeting a single entity.

use std::future::Future;

use homelink_shared::{entity_domain, ClientMessage};
use serde_json::{json, Value};

use crate::error::Result;
use crate::ws::Session;

/// A `call_service` command before it gets an id.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub service_data: Option<Value>,
    pub target: Option<Value>,
}

impl ServiceCall {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data: None,
            target: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.service_data = Some(data);
        self
    }

    /// Drive `entity_id` to `new_state`.
    ///
    /// Switches take the state as the service name (`switch.toggle`,
    /// `switch.turn_on`); everything else goes through the generic
    /// `homeassistant.turn_<state>` service.
    pub fn for_entity_state(entity_id: &str, new_state: &str) -> Self {
        let call = if entity_domain(entity_id) == "switch" {
            Self::new("switch", new_state)
        } else {
            Self::new("homeassistant", format!("turn_{}", new_state))
        };
        call.with_data(json!({ "entity_id": entity_id }))
    }

    pub fn toggle(entity_id: &str) -> Self {
        Self::new("homeassistant", "toggle").with_data(json!({ "entity_id": entity_id }))
    }

    pub fn turn_on(entity_id: &str) -> Self {
        Self::new("homeassistant", "turn_on").with_data(json!({ "entity_id": entity_id }))
    }

    pub fn turn_off(entity_id: &str) -> Self {
        Self::new("homeassistant", "turn_off").with_data(json!({ "entity_id": entity_id }))
    }

    /// The wire command, with a placeholder id the session overwrites.
    pub fn to_message(&self) -> ClientMessage {
        ClientMessage::CallService {
            id: 0,
            domain: self.domain.clone(),
            service: self.service.clone(),
            service_data: self.service_data.clone(),
            target: self.target.clone(),
        }
    }
}

impl Session {
    /// Send a service call through the correlated request path.
    pub fn call(&self, call: &ServiceCall) -> impl Future<Output = Result<Value>> + Send + 'static {
        self.request(&call.to_message())
    }

    pub fn set_entity_state(
        &self,
        entity_id: &str,
        new_state: &str,
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        tracing::info!("Setting {} to {}", entity_id, new_state);
        self.call(&ServiceCall::for_entity_state(entity_id, new_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_uses_state_as_service() {
        let call = ServiceCall::for_entity_state("switch.garage_door", "toggle");
        assert_eq!(call.domain, "switch");
        assert_eq!(call.service, "toggle");
        assert_eq!(call.service_data, Some(json!({"entity_id": "switch.garage_door"})));
    }

    #[test]
    fn test_other_domains_use_generic_turn_service() {
        let call = ServiceCall::for_entity_state("light.porch", "on");
        assert_eq!(call.domain, "homeassistant");
        assert_eq!(call.service, "turn_on");

        // Only the `switch.` prefix counts, not a substring.
        let call = ServiceCall::for_entity_state("light.switchboard", "off");
        assert_eq!(call.domain, "homeassistant");
        assert_eq!(call.service, "turn_off");
    }

    #[test]
    fn test_to_message_serializes_call_service() {
        let value = serde_json::to_value(ServiceCall::turn_off("fan.attic").to_message()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "call_service",
                "id": 0,
                "domain": "homeassistant",
                "service": "turn_off",
                "service_data": {"entity_id": "fan.attic"}
            })
        );
    }
}
