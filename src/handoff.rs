//! Handoffs between agents
//!
//! Capability names carrying the reserved `transfer_to_` prefix are never
//! executed locally: the runtime intercepts them and returns a
//! [`HandoffRequest`] for the coordinator to resolve.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::capability::CapabilitySpec;
use crate::items::CapabilityCall;

/// Reserved prefix marking a capability as a transfer
pub const TRANSFER_PREFIX: &str = "transfer_to_";

pub fn is_transfer(name: &str) -> bool {
    name.starts_with(TRANSFER_PREFIX)
}

/// Target agent named by a transfer capability, if it is one
pub fn transfer_target(name: &str) -> Option<&str> {
    name.strip_prefix(TRANSFER_PREFIX)
}

/// A handler-issued request to transfer conversation ownership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub target: String,
    pub reason: String,
    /// Context payload for the receiving agent, merged into extracted facts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl HandoffRequest {
    /// Interpret a capability call as a handoff, if its name carries the
    /// transfer prefix
    pub fn from_call(call: &CapabilityCall) -> Option<Self> {
        let target = transfer_target(&call.name)?;
        let reason = call
            .arguments
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("Nicht spezifiziert")
            .to_string();
        let context = call.arguments.get("context").cloned().filter(|v| !v.is_null());
        Some(Self {
            target: target.to_string(),
            reason,
            context,
        })
    }
}

/// One recorded transfer in a conversation's handoff log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub at: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub reason: String,
}

impl HandoffRecord {
    pub fn new(from: impl Into<String>, to: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }
}

/// Declared transfer capability for a peer agent; advertised to the
/// provider alongside the agent's own capability set
pub fn transfer_spec(peer_name: &str, peer_description: &str) -> CapabilitySpec {
    CapabilitySpec {
        name: format!("{}{}", TRANSFER_PREFIX, peer_name),
        description: peer_description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Grund für die Übergabe"
                },
                "context": {
                    "type": "object",
                    "description": "Relevante Informationen für den Zielagenten"
                }
            },
            "required": ["reason"]
        }),
    }
}
