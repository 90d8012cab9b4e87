//! Tower-based capability execution stack
//!
//! Capability invocations run through a small layered service: argument
//! schema validation, a timeout, then dispatch to the named capability.
//! Unknown names and schema violations surface as typed failure results so
//! the provider can correct itself.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;
use tower::{service_fn, util::BoxService, BoxError, Service};

use crate::capability::{Capability, CapabilityResult, FailureKind};

/// Request passed into the capability service stack
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub agent: String,
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// Boxed service type composed by the runtime
pub type CapabilityBoxService = BoxService<CapabilityRequest, CapabilityResult, BoxError>;

/// Terminal service: looks up the named capability and executes it
#[derive(Clone)]
pub struct DispatchService {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl DispatchService {
    pub fn new(capabilities: Vec<Arc<dyn Capability>>) -> Self {
        let capabilities = capabilities
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();
        Self { capabilities }
    }
}

impl Service<CapabilityRequest> for DispatchService {
    type Response = CapabilityResult;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: CapabilityRequest) -> Self::Future {
        let capability = self.capabilities.get(&req.name).cloned();
        Box::pin(async move {
            match capability {
                Some(capability) => Ok(capability.execute(req.arguments).await),
                None => Ok(CapabilityResult::fail(
                    FailureKind::UnknownCapability,
                    format!("Funktion {} nicht verfügbar", req.name),
                )),
            }
        })
    }
}

/// An object-safe layer over the boxed capability service
pub trait ErasedCapabilityLayer: Send + Sync {
    fn layer_boxed(&self, inner: CapabilityBoxService) -> CapabilityBoxService;
}

/// Validates required argument keys against the capability's schema before
/// dispatch; violations short-circuit with an `invalid_input` failure.
#[derive(Clone, Debug)]
pub struct SchemaLayer {
    schemas: HashMap<String, Value>,
}

impl SchemaLayer {
    pub fn for_capabilities(capabilities: &[Arc<dyn Capability>]) -> Self {
        let schemas = capabilities
            .iter()
            .map(|c| (c.name().to_string(), c.parameters_schema()))
            .collect();
        Self { schemas }
    }
}

impl ErasedCapabilityLayer for SchemaLayer {
    fn layer_boxed(&self, inner: CapabilityBoxService) -> CapabilityBoxService {
        let schemas = self.schemas.clone();
        let shared = Arc::new(tokio::sync::Mutex::new(inner));
        let svc = service_fn(move |req: CapabilityRequest| {
            let shared = shared.clone();
            let schemas = schemas.clone();
            async move {
                if let Some(schema) = schemas.get(&req.name) {
                    if let Err(msg) = validate_required(schema, &req.arguments) {
                        return Ok(CapabilityResult::fail(FailureKind::InvalidInput, msg));
                    }
                }
                let mut inner = shared.lock().await;
                inner.call(req).await
            }
        });
        BoxService::new(svc)
    }
}

fn validate_required(schema: &Value, args: &Value) -> Result<(), String> {
    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for field in required {
            if let Some(name) = field.as_str() {
                if args.get(name).map_or(true, Value::is_null) {
                    return Err(format!("Pflichtfeld fehlt: {}", name));
                }
            }
        }
    }
    Ok(())
}

/// Bounds a single capability execution in time
#[derive(Clone, Copy, Debug)]
pub struct TimeoutLayer {
    duration: Duration,
}

impl TimeoutLayer {
    pub fn from_duration(duration: Duration) -> Self {
        Self { duration }
    }
}

impl ErasedCapabilityLayer for TimeoutLayer {
    fn layer_boxed(&self, inner: CapabilityBoxService) -> CapabilityBoxService {
        let d = self.duration;
        let shared = Arc::new(tokio::sync::Mutex::new(inner));
        let svc = service_fn(move |req: CapabilityRequest| {
            let shared = shared.clone();
            async move {
                let mut inner = shared.lock().await;
                match timeout(d, inner.call(req)).await {
                    Ok(res) => res,
                    Err(_elapsed) => Ok(CapabilityResult::fail(
                        FailureKind::Timeout,
                        format!("Zeitüberschreitung nach {:?}", d),
                    )),
                }
            }
        });
        BoxService::new(svc)
    }
}

/// Build the standard stack for an agent's capability set:
/// schema validation → timeout → dispatch.
pub fn build_capability_stack(
    capabilities: Vec<Arc<dyn Capability>>,
    call_timeout: Duration,
) -> CapabilityBoxService {
    let schema = SchemaLayer::for_capabilities(&capabilities);
    let base = BoxService::new(DispatchService::new(capabilities));
    let with_timeout = TimeoutLayer::from_duration(call_timeout).layer_boxed(base);
    schema.layer_boxed(with_timeout)
}
