//! Error types for DateMate core collaborators

use thiserror::Error;

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by persona storage, identity and configuration
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid persona: {0}")]
    InvalidPersona(String),

    #[error("Persona not found: {0}")]
    PersonaNotFound(String),

    #[error("No authenticated user")]
    Unauthenticated,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid answer: {0}")]
    InvalidAnswer(String),

    #[error("Flag game is over")]
    GameOver,
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}
