//! Error types for solarbot

use thiserror::Error;

/// Result type alias for solarbot
pub type Result<T> = std::result::Result<T, BotError>;

/// Main error type for solarbot
#[derive(Debug, Error)]
pub enum BotError {
    /// Error from the OpenAI API
    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    /// HTTP request to an external collaborator failed
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The provider returned neither content nor a capability call
    #[error("Empty completion from provider")]
    EmptyCompletion,

    /// Capability execution error
    #[error("Capability `{name}` failed: {message}")]
    CapabilityError { name: String, message: String },

    /// Handoff named an agent that is not registered
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// The conversation used up its transfer budget
    #[error("Handoff limit reached: {limit}")]
    HandoffLimitReached { limit: usize },

    /// A single turn chained too many capability calls
    #[error("Capability depth limit reached: {limit}")]
    DepthLimitReached { limit: usize },

    /// Address could not be resolved to coordinates
    #[error("Geocoding error: {0}")]
    GeocodingError(String),

    /// Yield estimation service failed
    #[error("Yield estimation error: {0}")]
    YieldError(String),

    /// Calendar backend failure
    #[error("Calendar error: {0}")]
    CalendarError(String),

    /// The requested slot is already taken
    #[error("Slot is already booked")]
    SlotTaken,

    /// An external call exceeded its time budget
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BotError::HandoffLimitReached { limit: 5 };
        assert_eq!(err.to_string(), "Handoff limit reached: 5");

        let err = BotError::CapabilityError {
            name: "book_appointment".to_string(),
            message: "backend unreachable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Capability `book_appointment` failed: backend unreachable"
        );
    }

    #[test]
    fn test_error_from_openai() {
        let openai_err = async_openai::error::OpenAIError::InvalidArgument("test".to_string());
        let bot_err: BotError = openai_err.into();
        assert!(matches!(bot_err, BotError::OpenAIError(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let bot_err: BotError = parse_err.into();
        assert!(matches!(bot_err, BotError::SerializationError(_)));
    }

    #[test]
    fn test_result_type() {
        fn example_function() -> Result<String> {
            Ok("success".to_string())
        }

        let result = example_function();
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "success");
    }
}
