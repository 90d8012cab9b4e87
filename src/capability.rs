//! Capabilities: named, schema-validated operations
//!
//! A capability is what the provider can ask an agent to execute. Every
//! execution produces a [`CapabilityResult`] in the normalized
//! success/failure shape; failures are data fed back to the provider, never
//! raw errors.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Failure classification within a capability result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    InvalidDate,
    AlreadyBooked,
    BackendError,
    UnknownCapability,
    Timeout,
}

/// Normalized result of a capability invocation
///
/// Always serializes as `{"success": true, ...payload}` or
/// `{"success": false, "error_kind": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub success: bool,
    #[serde(flatten, skip_serializing_if = "Map::is_empty", default)]
    pub payload: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl CapabilityResult {
    /// Successful result; non-object payloads land under a `result` key
    pub fn ok(payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Self {
            success: true,
            payload,
            error_kind: None,
            message: None,
        }
    }

    pub fn fail(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Map::new(),
            error_kind: Some(kind),
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Declared shape of a capability, as advertised to the provider
#[derive(Debug, Clone, Serialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A named operation an agent can execute on the provider's request
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the argument object
    fn parameters_schema(&self) -> Value;

    /// Execute with already-validated arguments; failures are data
    async fn execute(&self, arguments: Value) -> CapabilityResult;

    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

type ErasedHandler =
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = CapabilityResult> + Send>> + Send + Sync;

/// Capability backed by a typed async closure
pub struct FunctionCapability {
    name: &'static str,
    description: &'static str,
    schema: Value,
    handler: Arc<ErasedHandler>,
}

impl Debug for FunctionCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionCapability")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[async_trait]
impl Capability for FunctionCapability {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, arguments: Value) -> CapabilityResult {
        (self.handler)(arguments).await
    }
}

/// Create a capability from a typed handler
///
/// `A` is the argument struct (Deserialize + JsonSchema); its schema is
/// derived and advertised to the provider. Arguments that fail to
/// deserialize produce an `invalid_input` failure rather than an error.
pub fn capability_fn<A, H, Fut>(
    name: &'static str,
    description: &'static str,
    handler: H,
) -> Arc<dyn Capability>
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
    H: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CapabilityResult> + Send + 'static,
{
    let schema = schemars::schema_for!(A);
    let params = serde_json::to_value(schema.schema).expect("schema to value");
    let handler = Arc::new(handler);
    let erased: Arc<ErasedHandler> = Arc::new(move |raw: Value| {
        let handler = handler.clone();
        Box::pin(async move {
            match serde_json::from_value::<A>(raw) {
                Ok(args) => (handler.as_ref())(args).await,
                Err(e) => CapabilityResult::fail(
                    FailureKind::InvalidInput,
                    format!("Ungültige Argumente: {}", e),
                ),
            }
        })
    });
    Arc::new(FunctionCapability {
        name,
        description,
        schema: params,
        handler: erased,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EchoArgs {
        text: String,
        #[allow(dead_code)]
        repeat: Option<u32>,
    }

    #[test]
    fn test_result_shapes() {
        let ok = CapabilityResult::ok(json!({"available": true}));
        let serialized = serde_json::to_value(&ok).unwrap();
        assert_eq!(serialized["success"], json!(true));
        assert_eq!(serialized["available"], json!(true));

        let fail = CapabilityResult::fail(FailureKind::AlreadyBooked, "Dieser Termin ist bereits vergeben.");
        let serialized = serde_json::to_value(&fail).unwrap();
        assert_eq!(serialized["success"], json!(false));
        assert_eq!(serialized["error_kind"], json!("already_booked"));
        assert!(serialized["message"].as_str().unwrap().contains("vergeben"));
    }

    #[test]
    fn test_non_object_payload_wrapped() {
        let result = CapabilityResult::ok(json!("plain"));
        assert_eq!(result.get("result"), Some(&json!("plain")));
    }

    #[tokio::test]
    async fn test_capability_fn_executes_typed() {
        let cap = capability_fn::<EchoArgs, _, _>("echo", "Echoes text", |args| async move {
            CapabilityResult::ok(json!({"echo": args.text}))
        });

        assert_eq!(cap.name(), "echo");
        let schema = cap.parameters_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"text"));
        assert!(!required.contains(&"repeat"));

        let result = cap.execute(json!({"text": "hallo"})).await;
        assert!(result.is_success());
        assert_eq!(result.get("echo"), Some(&json!("hallo")));
    }

    #[tokio::test]
    async fn test_capability_fn_rejects_bad_arguments() {
        let cap = capability_fn::<EchoArgs, _, _>("echo", "Echoes text", |args| async move {
            CapabilityResult::ok(json!({"echo": args.text}))
        });

        let result = cap.execute(json!({"text": 42})).await;
        assert!(!result.is_success());
        assert_eq!(result.error_kind, Some(FailureKind::InvalidInput));
    }

    #[test]
    fn test_result_roundtrip() {
        let ok = CapabilityResult::ok(json!({"system_size": 4.0}));
        let text = serde_json::to_string(&ok).unwrap();
        let back: CapabilityResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ok);
    }
}
