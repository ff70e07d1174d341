//! Error types for chatty-core

use thiserror::Error;

/// Result type alias using chatty-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a chat session
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the completion client
    #[error(transparent)]
    Ai(#[from] chatty_ai::Error),

    /// Stored state could not be read or written
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl Error {
    /// Whether this error comes from local configuration (e.g. missing API key)
    pub fn is_config(&self) -> bool {
        match self {
            Error::Ai(e) => e.is_config(),
            Error::Persistence(_) => false,
        }
    }

    /// Short human-readable text suitable for an alert line
    pub fn user_message(&self) -> String {
        match self {
            Error::Ai(e) => e.user_message(),
            Error::Persistence(e) => e.to_string(),
        }
    }
}

/// Failures reading or writing a persisted slot
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON, wrong shape
    #[error("stored value has the wrong shape: {0}")]
    Shape(String),
}
