//! Handoff coordinator
//!
//! Routes each user turn to the active agent, interprets transfer requests,
//! enforces the transfer ceiling, and normalizes every outcome into the one
//! caller-visible envelope. A handoff always resolves to a concrete message
//! or error before `handle` returns; it is never the externally visible
//! outcome. No error escapes this boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::agent::{Agent, AgentRuntime, Outcome};
use crate::calendar_agent::CALENDAR_AGENT_NAME;
use crate::conversation::{Conversation, ConversationStore};
use crate::extract::extract_contact_facts;
use crate::handoff::HandoffRecord;
use crate::items::Message;
use crate::solar_agent::SOLAR_AGENT_NAME;

/// First-contact routing: scheduling vocabulary goes to the calendar agent
const SCHEDULING_KEYWORDS: [&str; 8] = [
    "termin",
    "uhr",
    "zeit",
    "kalender",
    "buchen",
    "morgen",
    "nächste",
    "appointment",
];

const CEILING_MESSAGE: &str =
    "Maximale Anzahl an Weiterleitungen erreicht. Bitte starten Sie eine neue Konversation.";
const INTERNAL_FAULT_MESSAGE: &str = "Ein interner Fehler ist aufgetreten.";
const TIMEOUT_MESSAGE: &str =
    "Die Anfrage hat zu lange gedauert. Bitte versuchen Sie es erneut.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Message,
    Error,
}

/// The only shape callers ever see
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub content: String,
    pub agent: String,
    /// Extracted facts snapshot at the end of the turn
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub context: HashMap<String, String>,
}

impl Envelope {
    fn message(content: impl Into<String>, agent: impl Into<String>, conversation: &Conversation) -> Self {
        Self {
            kind: EnvelopeKind::Message,
            content: content.into(),
            agent: agent.into(),
            context: conversation.facts.clone(),
        }
    }

    fn error(content: impl Into<String>, agent: impl Into<String>, conversation: &Conversation) -> Self {
        Self {
            kind: EnvelopeKind::Error,
            content: content.into(),
            agent: agent.into(),
            context: conversation.facts.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == EnvelopeKind::Error
    }
}

pub struct Coordinator {
    store: ConversationStore,
    runtime: AgentRuntime,
    agents: HashMap<String, Arc<dyn Agent>>,
    registration_order: Vec<String>,
    max_handoffs: usize,
    request_budget: Duration,
}

impl Coordinator {
    pub fn new(runtime: AgentRuntime) -> Self {
        Self {
            store: ConversationStore::new(),
            runtime,
            agents: HashMap::new(),
            registration_order: Vec::new(),
            max_handoffs: 5,
            request_budget: Duration::from_secs(25),
        }
    }

    pub fn register(mut self, agent: Arc<dyn Agent>) -> Self {
        let name = agent.name().to_string();
        self.registration_order.push(name.clone());
        self.agents.insert(name, agent);
        self
    }

    pub fn max_handoffs(mut self, limit: usize) -> Self {
        self.max_handoffs = limit;
        self
    }

    pub fn request_budget(mut self, budget: Duration) -> Self {
        self.request_budget = budget;
        self
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// One user turn under the default per-request budget
    pub async fn handle(&self, user_id: &str, message: &str) -> Envelope {
        self.handle_with_deadline(user_id, message, self.request_budget)
            .await
    }

    /// One user turn; on deadline the in-flight invocation is abandoned and
    /// committed external side effects are not rolled back.
    pub async fn handle_with_deadline(
        &self,
        user_id: &str,
        message: &str,
        budget: Duration,
    ) -> Envelope {
        match timeout(budget, self.run_turn(user_id, message)).await {
            Ok(envelope) => envelope,
            Err(_) => {
                warn!(user_id, budget_ms = budget.as_millis() as u64, "turn abandoned on deadline");
                let agent = self
                    .store
                    .active_agent(user_id)
                    .await
                    .unwrap_or_else(|| "system".to_string());
                Envelope {
                    kind: EnvelopeKind::Error,
                    content: TIMEOUT_MESSAGE.to_string(),
                    agent,
                    context: HashMap::new(),
                }
            }
        }
    }

    /// Per-user serialization: the session lock is held for the whole turn,
    /// so at most one turn per user is in flight.
    async fn run_turn(&self, user_id: &str, message: &str) -> Envelope {
        let handle = self.store.session(user_id);
        let mut conversation = handle.lock().await;

        conversation.merge_facts(extract_contact_facts(message));
        conversation.append(Message::user(message));

        let mut active = match conversation.active_agent.clone() {
            Some(name) => name,
            None => {
                let inferred = self.infer_initial_agent(message);
                info!(user_id, agent = %inferred, "initial agent inferred");
                conversation.active_agent = Some(inferred.clone());
                inferred
            }
        };

        loop {
            let Some(agent) = self.agents.get(&active) else {
                error!(user_id, agent = %active, "active agent not registered");
                return Envelope::error(INTERNAL_FAULT_MESSAGE, active, &conversation);
            };
            let peers = self.peers_of(&active);

            match self.runtime.process(agent.as_ref(), &peers, &mut conversation).await {
                Outcome::Message(content) => {
                    conversation.append(Message::assistant(&content).with_agent(&active));
                    return Envelope::message(content, active, &conversation);
                }
                Outcome::Error(content) => {
                    conversation.append(Message::assistant(&content).with_agent(&active));
                    return Envelope::error(content, active, &conversation);
                }
                Outcome::Handoff(request) => {
                    if conversation.handoffs.len() >= self.max_handoffs {
                        warn!(
                            user_id,
                            limit = self.max_handoffs,
                            "transfer ceiling reached, refusing handoff"
                        );
                        conversation
                            .append(Message::assistant(CEILING_MESSAGE).with_agent(&active));
                        return Envelope::error(CEILING_MESSAGE, active, &conversation);
                    }
                    if !self.agents.contains_key(&request.target) {
                        error!(user_id, target = %request.target, "handoff to unknown agent");
                        conversation
                            .append(Message::assistant(INTERNAL_FAULT_MESSAGE).with_agent(&active));
                        return Envelope::error(INTERNAL_FAULT_MESSAGE, active, &conversation);
                    }

                    conversation.record_handoff(HandoffRecord::new(
                        &active,
                        &request.target,
                        &request.reason,
                    ));
                    if let Some(Value::Object(map)) = &request.context {
                        let facts = map
                            .iter()
                            .map(|(k, v)| {
                                let value = match v.as_str() {
                                    Some(s) => s.to_string(),
                                    None => v.to_string(),
                                };
                                (k.clone(), value)
                            })
                            .collect();
                        conversation.merge_facts(facts);
                    }
                    conversation.append(Message::system(format!(
                        "Weiterleitung von {} an {}: {}",
                        active, request.target, request.reason
                    )));

                    info!(user_id, from = %active, to = %request.target, "handoff accepted");
                    active = request.target;
                    conversation.active_agent = Some(active.clone());
                    // re-invoke the new agent with the same user message
                }
            }
        }
    }

    fn infer_initial_agent(&self, message: &str) -> String {
        let lower = message.to_lowercase();
        let inferred = if SCHEDULING_KEYWORDS.iter().any(|k| lower.contains(k)) {
            CALENDAR_AGENT_NAME
        } else {
            SOLAR_AGENT_NAME
        };
        if self.agents.contains_key(inferred) {
            return inferred.to_string();
        }
        // registry without the canonical pair: fall back to first registered
        self.registration_order
            .first()
            .cloned()
            .unwrap_or_else(|| inferred.to_string())
    }

    fn peers_of(&self, active: &str) -> Vec<(String, String)> {
        self.registration_order
            .iter()
            .filter(|name| name.as_str() != active)
            .filter_map(|name| self.agents.get(name))
            .map(|agent| (agent.name().to_string(), agent.description().to_string()))
            .collect()
    }

    /// Forget the user entirely; the next message starts a fresh conversation
    pub fn reset(&self, user_id: &str) {
        self.store.reset(user_id);
    }

    /// Drop conversations idle longer than `max_age`; in-flight ones survive
    pub fn sweep_idle(&self, max_age: Duration) -> usize {
        self.store.sweep_idle(max_age)
    }
}
