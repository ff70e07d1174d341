//! Error types for chatty-ai

use thiserror::Error;

/// Result type alias using chatty-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Message used when an error response carries no readable explanation
pub const GENERIC_API_ERROR: &str = "request failed";

/// Errors that can occur when talking to the completion endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed (connect, send, or body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Endpoint answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// No API credential was configured
    #[error("Missing OpenAI API key")]
    MissingApiKey,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A streamed line could not be decoded
    #[error("Stream parse error: {0}")]
    StreamParse(String),
}

impl Error {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether this error comes from local configuration rather than the network
    pub fn is_config(&self) -> bool {
        matches!(self, Error::MissingApiKey | Error::InvalidConfig(_))
    }

    /// Short human-readable text suitable for an alert line
    pub fn user_message(&self) -> String {
        match self {
            Error::Api { message, .. } => message.clone(),
            Error::MissingApiKey => "Missing OpenAI API key.".to_string(),
            other => other.to_string(),
        }
    }
}
