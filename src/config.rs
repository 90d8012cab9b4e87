//! Configuration for the bot
//!
//! `Settings` carries everything the coordinator and the external
//! collaborators need: model name, timeouts, ceilings, retry policy, and
//! collaborator credentials. Loadable from environment variables or a TOML
//! file, overridable through the builder.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{BotError, Result};

/// Crate-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Model used for intent understanding and response generation
    pub model: String,

    /// Timeout for a single external collaborator call
    pub api_timeout: Duration,

    /// Overall budget for one inbound message (all handoffs included)
    pub request_budget: Duration,

    /// Maximum number of handoffs per conversation
    pub max_handoffs: usize,

    /// Maximum capability-call chain length within one turn
    pub max_depth: usize,

    /// How many recent messages are sent to the provider per completion
    pub history_window: usize,

    /// Conversations idle longer than this are eligible for sweeping
    pub idle_max_age: Duration,

    /// Retry policy for idempotent collaborator reads
    pub retry: RetryConfig,

    /// Google Calendar identifier for appointment bookings
    pub calendar_id: String,

    /// API key for the geocoding service
    pub geocoding_api_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_timeout: Duration::from_secs(10),
            request_budget: Duration::from_secs(25),
            max_handoffs: 5,
            max_depth: 5,
            history_window: 10,
            idle_max_age: Duration::from_secs(600),
            retry: RetryConfig::default(),
            calendar_id: "primary".to_string(),
            geocoding_api_key: String::new(),
        }
    }
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    /// Load settings from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut settings = Settings::default();

        if let Ok(model) = std::env::var("SOLARBOT_MODEL") {
            settings.model = model;
        }
        if let Ok(timeout) = std::env::var("SOLARBOT_API_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse::<u64>() {
                settings.api_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(budget) = std::env::var("SOLARBOT_REQUEST_BUDGET_SECS") {
            if let Ok(secs) = budget.parse::<u64>() {
                settings.request_budget = Duration::from_secs(secs);
            }
        }
        if let Ok(limit) = std::env::var("SOLARBOT_MAX_HANDOFFS") {
            if let Ok(n) = limit.parse::<usize>() {
                settings.max_handoffs = n;
            }
        }
        if let Ok(calendar_id) = std::env::var("SOLARBOT_CALENDAR_ID") {
            settings.calendar_id = calendar_id;
        }
        if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
            settings.geocoding_api_key = key;
        }

        settings
    }

    /// Load settings from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| BotError::ConfigError(e.to_string()))
    }
}

/// Retry configuration for idempotent collaborator calls
///
/// Booking creation is never retried through this policy; only read-only
/// lookups (geocoding, yield estimation, availability) use it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f32,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Builder for `Settings`
pub struct SettingsBuilder {
    settings: Settings,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.settings.model = model.into();
        self
    }

    pub fn api_timeout(mut self, timeout: Duration) -> Self {
        self.settings.api_timeout = timeout;
        self
    }

    pub fn request_budget(mut self, budget: Duration) -> Self {
        self.settings.request_budget = budget;
        self
    }

    pub fn max_handoffs(mut self, limit: usize) -> Self {
        self.settings.max_handoffs = limit;
        self
    }

    pub fn max_depth(mut self, limit: usize) -> Self {
        self.settings.max_depth = limit;
        self
    }

    pub fn history_window(mut self, window: usize) -> Self {
        self.settings.history_window = window;
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.settings.retry.max_retries = retries;
        self
    }

    pub fn calendar_id(mut self, id: impl Into<String>) -> Self {
        self.settings.calendar_id = id.into();
        self
    }

    pub fn build(self) -> Settings {
        self.settings
    }
}
