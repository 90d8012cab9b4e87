//! Per-user conversation state and its store
//!
//! Conversation state is volatile, in-memory, and created lazily on first
//! contact. The store serializes access per user through an async mutex on
//! each entry: the coordinator holds a user's entry for the whole turn, so
//! at most one turn is in flight per user while distinct users proceed
//! concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::handoff::HandoffRecord;
use crate::items::Message;
use crate::usage::UsageMeter;

/// State of one user's conversation
#[derive(Debug)]
pub struct Conversation {
    /// Ordered message history; append-only until an explicit reset
    pub messages: Vec<Message>,
    /// Facts mined from free text, merged last-write-wins per key
    pub facts: HashMap<String, String>,
    /// Ordered transfer log; its length bounds permitted handoffs
    pub handoffs: Vec<HandoffRecord>,
    /// Agent currently owning the conversation
    pub active_agent: Option<String>,
    /// Aggregated provider token usage
    pub usage: UsageMeter,
    last_activity: Instant,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            facts: HashMap::new(),
            handoffs: Vec::new(),
            active_agent: None,
            usage: UsageMeter::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.last_activity = Instant::now();
    }

    /// Merge facts last-write-wins per key; keys absent from `facts` keep
    /// their stored value
    pub fn merge_facts(&mut self, facts: HashMap<String, String>) {
        for (key, value) in facts {
            self.facts.insert(key, value);
        }
    }

    pub fn record_handoff(&mut self, record: HandoffRecord) {
        self.handoffs.push(record);
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Shared entry handle; the coordinator locks it for a whole turn
pub type ConversationHandle = Arc<tokio::sync::Mutex<Conversation>>;

/// Store of all conversations, keyed by user id
///
/// The outer map lock is a short-critical-section std mutex; per-user
/// serialization happens on the entry's async mutex.
#[derive(Clone, Default)]
pub struct ConversationStore {
    inner: Arc<Mutex<HashMap<String, ConversationHandle>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-user entry, created lazily on first access
    pub fn session(&self, user_id: &str) -> ConversationHandle {
        let mut map = self.inner.lock().expect("conversation map lock");
        map.entry(user_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Conversation::new())))
            .clone()
    }

    pub async fn append(&self, user_id: &str, message: Message) {
        let handle = self.session(user_id);
        handle.lock().await.append(message);
    }

    /// Full ordered history; repeated reads are idempotent
    pub async fn history(&self, user_id: &str) -> Vec<Message> {
        let handle = self.session(user_id);
        let conversation = handle.lock().await;
        conversation.messages.clone()
    }

    pub async fn merge_context(&self, user_id: &str, facts: HashMap<String, String>) {
        let handle = self.session(user_id);
        handle.lock().await.merge_facts(facts);
    }

    pub async fn active_agent(&self, user_id: &str) -> Option<String> {
        let handle = self.session(user_id);
        let conversation = handle.lock().await;
        conversation.active_agent.clone()
    }

    pub async fn handoff_count(&self, user_id: &str) -> usize {
        let handle = self.session(user_id);
        let conversation = handle.lock().await;
        conversation.handoffs.len()
    }

    pub async fn facts(&self, user_id: &str) -> HashMap<String, String> {
        let handle = self.session(user_id);
        let conversation = handle.lock().await;
        conversation.facts.clone()
    }

    /// Drop the user's state entirely; the next message recreates it and
    /// re-infers the initial agent. No error when absent.
    pub fn reset(&self, user_id: &str) {
        let mut map = self.inner.lock().expect("conversation map lock");
        if map.remove(user_id).is_some() {
            debug!(user_id, "conversation reset");
        }
    }

    /// Evict conversations idle longer than `max_age`; entries with an
    /// in-flight turn are skipped. Returns the number evicted.
    pub fn sweep_idle(&self, max_age: Duration) -> usize {
        let mut map = self.inner.lock().expect("conversation map lock");
        let before = map.len();
        map.retain(|user_id, handle| match handle.try_lock() {
            Ok(conversation) => {
                let keep = conversation.idle_for() <= max_age;
                if !keep {
                    debug!(user_id, "evicting idle conversation");
                }
                keep
            }
            // locked means a turn is in flight, so it is not idle
            Err(_) => true,
        });
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("conversation map lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
