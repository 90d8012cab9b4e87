//! # Solarbot
//!
//! A conversational backend for solar consultations in German: a multi-agent
//! handoff orchestrator routing each user between a solar expert and an
//! appointment scheduler, backed by an LLM capability provider, geocoding +
//! PVGIS yield estimation, and a calendar backend.
//!
//! ## Core Concepts
//!
//! - **Agent**: a domain handler exposing typed capabilities to the provider
//!   ([`SolarAgent`], [`CalendarAgent`])
//! - **Coordinator**: per-user state machine that resolves the active agent,
//!   interprets `transfer_to_` handoffs, enforces transfer and depth
//!   ceilings, and always answers with one uniform [`Envelope`]
//! - **Capabilities**: schema-validated functions, executed through a Tower
//!   stack (schema check → timeout → dispatch)
//! - **Provider**: one completion boundary ([`ModelProvider`]), with an
//!   OpenAI implementation and a scripted one for tests
//!
//! ## Getting Started
//!
//! Set `OPENAI_API_KEY` (and optionally `GOOGLE_API_KEY`) in the
//! environment.
//!
//! ```rust,no_run
//! use solarbot::{
//!     AgentRuntime, CalendarAgent, CalendarService, Coordinator, InMemoryCalendar,
//!     OpenAIProvider, Settings, SolarAgent, SolarCalculator,
//! };
//! use solarbot::solar::{GoogleGeocoder, PvgisClient};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let settings = Settings::from_env();
//! let provider = Arc::new(OpenAIProvider::new(&settings.model));
//!
//! let http = reqwest::Client::new();
//! let calculator = Arc::new(SolarCalculator::new(
//!     Arc::new(GoogleGeocoder::new(http.clone(), &settings.geocoding_api_key)),
//!     Arc::new(PvgisClient::new(http)),
//! ));
//! let calendar = Arc::new(CalendarService::new(Arc::new(InMemoryCalendar::new())));
//!
//! let coordinator = Coordinator::new(AgentRuntime::new(provider.clone()))
//!     .register(Arc::new(SolarAgent::new(calculator)))
//!     .register(Arc::new(CalendarAgent::new(provider, calendar)));
//!
//! let envelope = coordinator.handle("user-1", "Was kostet eine Solaranlage?").await;
//! println!("{}: {}", envelope.agent, envelope.content);
//! # }
//! ```

pub mod agent;
pub mod calendar;
pub mod calendar_agent;
pub mod capability;
pub mod config;
pub mod conversation;
pub mod coordinator;
pub mod error;
pub mod extract;
pub mod handoff;
pub mod items;
pub mod provider;
pub mod retry;
pub mod service;
pub mod solar;
pub mod solar_agent;
pub mod usage;

pub use agent::{Agent, AgentRuntime, CallPlan, Outcome};
pub use calendar::{
    Availability, BookingConfirmation, BookingRequest, CalendarBackend, CalendarService,
    GoogleCalendarBackend, InMemoryCalendar,
};
pub use calendar_agent::{CalendarAgent, CALENDAR_AGENT_NAME};
pub use capability::{capability_fn, Capability, CapabilityResult, CapabilitySpec, FailureKind};
pub use config::{RetryConfig, Settings, SettingsBuilder};
pub use conversation::{Conversation, ConversationHandle, ConversationStore};
pub use coordinator::{Coordinator, Envelope, EnvelopeKind};
pub use error::{BotError, Result};
pub use extract::extract_contact_facts;
pub use handoff::{HandoffRecord, HandoffRequest};
pub use items::{CapabilityCall, Message, ModelResponse, Role};
pub use provider::{ModelProvider, OpenAIProvider, ScriptedProvider};
pub use solar::{SavingsEstimate, SolarCalculator};
pub use solar_agent::{SolarAgent, SOLAR_AGENT_NAME};
pub use usage::{Usage, UsageMeter};
