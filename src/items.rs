//! Messages, capability calls, and provider responses
//!
//! Core data structures exchanged between the conversation store, the
//! agents, and the capability provider.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Result of a capability call, fed back to the provider
    Function,
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Agent that produced this message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// For function-result messages: id of the call being answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// For assistant messages that request a capability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call: Option<CapabilityCall>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            agent: None,
            call_id: None,
            call: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            agent: None,
            call_id: None,
            call: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            agent: None,
            call_id: None,
            call: None,
        }
    }

    /// Assistant message carrying a capability request
    pub fn assistant_call(call: CapabilityCall) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            agent: None,
            call_id: None,
            call: Some(call),
        }
    }

    /// Function-result message answering a capability call
    pub fn function_result(content: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: content.into(),
            agent: None,
            call_id: Some(call_id.into()),
            call: None,
        }
    }

    /// Tag the message with its originating agent
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// A capability call requested by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl CapabilityCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}

/// Response from the capability provider
///
/// Holds exactly one of plain content or a single capability call; the
/// provider boundary never surfaces multiple simultaneous calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: Option<String>,
    pub call: Option<CapabilityCall>,
}

impl ModelResponse {
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            call: None,
        }
    }

    pub fn capability(call: CapabilityCall) -> Self {
        Self {
            content: None,
            call: Some(call),
        }
    }

    pub fn has_content(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_message_creation() {
        let sys_msg = Message::system("Du bist ein Solaranlagen-Experte");
        assert_eq!(sys_msg.role, Role::System);
        assert!(sys_msg.agent.is_none());

        let user_msg = Message::user("Hallo");
        assert_eq!(user_msg.role, Role::User);
        assert_eq!(user_msg.content, "Hallo");

        let result_msg = Message::function_result("{\"success\":true}", "call_123");
        assert_eq!(result_msg.role, Role::Function);
        assert_eq!(result_msg.call_id, Some("call_123".to_string()));
    }

    #[test]
    fn test_agent_tag() {
        let msg = Message::assistant("Gerne!").with_agent("solar_agent");
        assert_eq!(msg.agent, Some("solar_agent".to_string()));
    }

    #[test]
    fn test_assistant_call_message() {
        let call = CapabilityCall::new("check_availability", serde_json::json!({"date": "2026-09-01"}));
        let msg = Message::assistant_call(call.clone());
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.call.unwrap().name, "check_availability");
    }

    #[test]
    fn test_model_response() {
        let response = ModelResponse::message("Wie kann ich helfen?");
        assert!(response.has_content());
        assert!(response.call.is_none());

        let call = CapabilityCall::new("calculate_solar_system", serde_json::json!({"yearly_consumption": 4000}));
        let response = ModelResponse::capability(call);
        assert!(!response.has_content());
        assert_eq!(response.call.unwrap().name, "calculate_solar_system");

        let empty = ModelResponse::message("");
        assert!(!empty.has_content());
    }

    #[test]
    fn test_role_serialization() {
        let serialized = serde_json::to_string(&Role::Function).unwrap();
        assert_eq!(serialized, "\"function\"");

        let deserialized: Role = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(deserialized, Role::Assistant);
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let msg = Message::user("Hallo");
        let serialized = serde_json::to_string(&msg).unwrap();
        assert!(!serialized.contains("call_id"));
        assert!(!serialized.contains("agent"));
    }
}
