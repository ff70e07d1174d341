//! Core types for chat interactions

use serde::{Deserialize, Serialize};

/// Id of the placeholder message shown while a reply is pending
pub const TYPING_INDICATOR_ID: &str = "typing-indicator";

/// Content of the placeholder message
pub const TYPING_INDICATOR_TEXT: &str = "Typing...";

/// Default chat-completions base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model identifier
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the conversation
///
/// `id` never changes once the message exists. Assistant content only ever
/// grows while a reply streams in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a message with a fresh random id
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid_v4(),
            role,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create the typing indicator placeholder
    pub fn typing_indicator() -> Self {
        Self {
            id: TYPING_INDICATOR_ID.to_string(),
            role: Role::Assistant,
            content: TYPING_INDICATOR_TEXT.to_string(),
        }
    }

    /// Whether this is the typing indicator placeholder
    pub fn is_typing_indicator(&self) -> bool {
        self.id == TYPING_INDICATOR_ID
    }

    /// Strip the id for sending over the wire
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

fn uuid_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A message as the completion endpoint sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

/// Request settings for the completion endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOptions {
    /// Model identifier sent in the request body
    pub model: String,
    /// Base URL; `/chat/completions` is appended
    pub base_url: String,
    /// Request a token stream instead of a single body
    pub stream: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            stream: true,
        }
    }
}

impl CompletionOptions {
    /// Full endpoint URL
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}
