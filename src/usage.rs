//! Token usage accounting
//!
//! Tracks token consumption per provider call and aggregated per
//! conversation, for observability of model spend.

use serde::{Deserialize, Serialize};

/// Token usage for a single provider call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;

    fn add(self, other: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Usage) {
        *self = *self + other;
    }
}

/// Aggregated usage across all provider calls of one conversation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageMeter {
    pub calls: usize,
    pub total: Usage,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, usage: Usage) {
        self.calls += 1;
        self.total += usage;
    }
}
