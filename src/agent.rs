//! Domain agents and the runtime that drives them
//!
//! An [`Agent`] owns a narrow domain: a persona, a capability set, and an
//! optional pre-execution hook. [`AgentRuntime`] drives the
//! provider/capability loop for one turn as an explicit bounded loop, so
//! the depth ceiling is trivially enforced and the stack stays flat.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info};

use crate::capability::{Capability, CapabilitySpec};
use crate::conversation::Conversation;
use crate::handoff::{transfer_spec, HandoffRequest};
use crate::items::{Message, Role};
use crate::provider::ModelProvider;
use crate::service::{build_capability_stack, CapabilityRequest};

/// Result of one agent turn
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Plain reply for the user
    Message(String),
    /// Request to transfer ownership to a peer agent
    Handoff(HandoffRequest),
    /// Recovered failure, reported as data
    Error(String),
}

/// Decision of an agent's pre-execution hook
#[derive(Debug, Clone)]
pub enum CallPlan {
    /// Execute the capability with these (possibly enriched) arguments
    Execute(Value),
    /// Skip execution and answer with a clarifying question instead
    Clarify(String),
}

/// A domain-scoped conversation handler
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier used in transfer targets and logs
    fn name(&self) -> &str;

    /// Shown to peers as the description of this agent's transfer capability
    fn description(&self) -> &str;

    /// System prompt biasing the provider toward this agent's task
    fn persona(&self) -> String;

    fn capabilities(&self) -> Vec<Arc<dyn Capability>>;

    /// Hook before executing a capability; may enrich arguments from
    /// extracted facts or short-circuit with a clarifying question.
    async fn prepare_call(
        &self,
        name: &str,
        arguments: &Value,
        _facts: &HashMap<String, String>,
    ) -> CallPlan {
        let _ = name;
        CallPlan::Execute(arguments.clone())
    }
}

/// Drives the provider/capability loop for one agent turn
pub struct AgentRuntime {
    provider: Arc<dyn ModelProvider>,
    max_depth: usize,
    history_window: usize,
    capability_timeout: Duration,
}

impl AgentRuntime {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            max_depth: 5,
            history_window: 10,
            capability_timeout: Duration::from_secs(10),
        }
    }

    pub fn max_depth(mut self, limit: usize) -> Self {
        self.max_depth = limit;
        self
    }

    pub fn history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn capability_timeout(mut self, timeout: Duration) -> Self {
        self.capability_timeout = timeout;
        self
    }

    /// Persona plus the most recent history window; the store itself is
    /// never trimmed.
    fn compose(&self, agent: &dyn Agent, conversation: &Conversation) -> Vec<Message> {
        let mut messages = vec![Message::system(agent.persona())];
        let history = &conversation.messages;
        let mut start = history.len().saturating_sub(self.history_window);
        // a window must not open on a function result whose call fell outside it
        while start < history.len() && history[start].role == Role::Function {
            start += 1;
        }
        messages.extend_from_slice(&history[start..]);
        messages
    }

    /// One turn of `agent` over the conversation. All failures inside the
    /// loop convert to `Outcome::Error`; nothing propagates raw.
    pub async fn process(
        &self,
        agent: &dyn Agent,
        peers: &[(String, String)],
        conversation: &mut Conversation,
    ) -> Outcome {
        let capabilities = agent.capabilities();
        let mut specs: Vec<CapabilitySpec> = capabilities.iter().map(|c| c.spec()).collect();
        for (peer_name, peer_description) in peers {
            specs.push(transfer_spec(peer_name, peer_description));
        }
        let mut stack = build_capability_stack(capabilities, self.capability_timeout);

        for depth in 0..self.max_depth {
            let messages = self.compose(agent, conversation);
            let (response, usage) = match self.provider.complete(messages, specs.clone()).await {
                Ok(out) => out,
                Err(e) => {
                    error!(agent = agent.name(), error = %e, "provider call failed");
                    return Outcome::Error(format!("Verarbeitungsfehler: {}", e));
                }
            };
            conversation.usage.record(usage);

            let Some(call) = response.call else {
                if response.has_content() {
                    return Outcome::Message(response.content.unwrap_or_default());
                }
                error!(agent = agent.name(), "empty completion from provider");
                return Outcome::Error("Fehler beim Verarbeiten der Antwort".to_string());
            };

            // transfers are never executed locally
            if let Some(request) = HandoffRequest::from_call(&call) {
                info!(
                    agent = agent.name(),
                    target = %request.target,
                    reason = %request.reason,
                    "handoff requested"
                );
                return Outcome::Handoff(request);
            }

            let plan = agent
                .prepare_call(&call.name, &call.arguments, &conversation.facts)
                .await;
            let arguments = match plan {
                CallPlan::Execute(arguments) => arguments,
                CallPlan::Clarify(question) => return Outcome::Message(question),
            };

            debug!(agent = agent.name(), capability = %call.name, depth, "executing capability");
            let mut executed = call.clone();
            executed.arguments = arguments.clone();
            conversation.append(Message::assistant_call(executed).with_agent(agent.name()));

            let request = CapabilityRequest {
                agent: agent.name().to_string(),
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments,
            };
            let result = match stack.ready().await {
                Ok(ready) => match ready.call(request).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(capability = %call.name, error = %e, "capability stack failed");
                        return Outcome::Error(format!(
                            "Fehler bei der Funktionsausführung: {}",
                            e
                        ));
                    }
                },
                Err(e) => {
                    error!(error = %e, "capability stack not ready");
                    return Outcome::Error(format!("Fehler bei der Funktionsausführung: {}", e));
                }
            };

            let serialized = serde_json::to_string(&result)
                .unwrap_or_else(|_| "{\"success\":false}".to_string());
            conversation.append(
                Message::function_result(serialized, call.id.clone()).with_agent(agent.name()),
            );
            // loop continues: the provider narrates or chains another call
        }

        info!(agent = agent.name(), limit = self.max_depth, "depth ceiling reached");
        Outcome::Error("Maximale Verarbeitungstiefe erreicht.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{capability_fn, CapabilityResult};
    use crate::provider::ScriptedProvider;
    use pretty_assertions::assert_eq;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct PingArgs {
        value: u32,
    }

    struct PingAgent;

    #[async_trait]
    impl Agent for PingAgent {
        fn name(&self) -> &str {
            "ping_agent"
        }

        fn description(&self) -> &str {
            "Beantwortet Ping-Anfragen"
        }

        fn persona(&self) -> String {
            "Du bist ein Test-Agent.".to_string()
        }

        fn capabilities(&self) -> Vec<Arc<dyn Capability>> {
            vec![capability_fn::<PingArgs, _, _>(
                "ping",
                "Echoes the value",
                |args| async move { CapabilityResult::ok(json!({"pong": args.value})) },
            )]
        }
    }

    fn runtime(provider: ScriptedProvider) -> AgentRuntime {
        AgentRuntime::new(Arc::new(provider)).history_window(10)
    }

    #[tokio::test]
    async fn test_plain_reply() {
        let provider = ScriptedProvider::new().with_message("Hallo!");
        let mut conversation = Conversation::new();
        conversation.append(Message::user("Hi"));

        let outcome = runtime(provider)
            .process(&PingAgent, &[], &mut conversation)
            .await;
        assert_eq!(outcome, Outcome::Message("Hallo!".to_string()));
    }

    #[tokio::test]
    async fn test_capability_chain_appends_results() {
        let provider = ScriptedProvider::new()
            .with_capability("ping", json!({"value": 7}))
            .with_message("Ergebnis: 7");
        let mut conversation = Conversation::new();
        conversation.append(Message::user("ping bitte"));

        let outcome = runtime(provider)
            .process(&PingAgent, &[], &mut conversation)
            .await;
        assert_eq!(outcome, Outcome::Message("Ergebnis: 7".to_string()));

        // assistant call plus function result were appended
        let roles: Vec<_> = conversation.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                crate::items::Role::User,
                crate::items::Role::Assistant,
                crate::items::Role::Function
            ]
        );
        assert!(conversation.messages[2].content.contains("\"pong\":7"));
    }

    #[tokio::test]
    async fn test_transfer_is_intercepted_not_executed() {
        let provider = ScriptedProvider::new().with_capability(
            "transfer_to_calendar_agent",
            json!({"reason": "Terminwunsch"}),
        );
        let mut conversation = Conversation::new();
        conversation.append(Message::user("Termin bitte"));

        let outcome = runtime(provider)
            .process(
                &PingAgent,
                &[("calendar_agent".to_string(), "Termine".to_string())],
                &mut conversation,
            )
            .await;
        match outcome {
            Outcome::Handoff(request) => {
                assert_eq!(request.target, "calendar_agent");
                assert_eq!(request.reason, "Terminwunsch");
            }
            other => panic!("expected handoff, got {:?}", other),
        }
        // nothing was appended for the intercepted transfer
        assert_eq!(conversation.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_depth_ceiling() {
        let provider = ScriptedProvider::new();
        for _ in 0..6 {
            provider.push(crate::items::ModelResponse::capability(
                crate::items::CapabilityCall::new("ping", json!({"value": 1})),
            ));
        }
        let mut conversation = Conversation::new();
        conversation.append(Message::user("ping"));

        let outcome = runtime(provider)
            .process(&PingAgent, &[], &mut conversation)
            .await;
        assert_eq!(
            outcome,
            Outcome::Error("Maximale Verarbeitungstiefe erreicht.".to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_capability_fed_back_then_narrated() {
        let provider = ScriptedProvider::new()
            .with_capability("does_not_exist", json!({}))
            .with_message("Das kann ich leider nicht.");
        let mut conversation = Conversation::new();
        conversation.append(Message::user("Mach was"));

        let outcome = runtime(provider)
            .process(&PingAgent, &[], &mut conversation)
            .await;
        assert_eq!(outcome, Outcome::Message("Das kann ich leider nicht.".to_string()));
        // the failure result was recorded for the provider to read
        assert!(conversation.messages[2].content.contains("unknown_capability"));
    }

    #[tokio::test]
    async fn test_history_window_bounds_prompt() {
        let provider = ScriptedProvider::new().with_message("ok");
        let runtime = AgentRuntime::new(Arc::new(provider)).history_window(3);
        let mut conversation = Conversation::new();
        for i in 0..10 {
            conversation.append(Message::user(format!("Nachricht {}", i)));
        }

        let composed = runtime.compose(&PingAgent, &conversation);
        // persona plus the three most recent messages
        assert_eq!(composed.len(), 4);
        assert_eq!(composed[1].content, "Nachricht 7");
        assert_eq!(composed[3].content, "Nachricht 9");
    }

    #[tokio::test]
    async fn test_history_window_never_opens_on_function_result() {
        let provider = ScriptedProvider::new().with_message("ok");
        let runtime = AgentRuntime::new(Arc::new(provider)).history_window(3);
        let mut conversation = Conversation::new();
        conversation.append(Message::user("Frage"));
        conversation.append(Message::function_result(r#"{"success":true}"#, "call-1"));
        conversation.append(Message::function_result(r#"{"success":true}"#, "call-2"));
        conversation.append(Message::assistant("Antwort"));
        conversation.append(Message::user("Weiter"));

        // a window of three would start on the second function result
        let composed = runtime.compose(&PingAgent, &conversation);
        assert_eq!(composed.len(), 3);
        assert_eq!(composed[1].content, "Antwort");
        assert_eq!(composed[2].content, "Weiter");
    }
}
