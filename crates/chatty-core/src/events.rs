//! Chat session event types

use chatty_ai::ChatMessage;
use serde::{Deserialize, Serialize};

/// Events emitted while a chat session runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A user message was accepted and a turn started
    TurnStart { user_message: ChatMessage },

    /// The typing indicator is shown
    Typing,

    /// The assistant message for this turn was inserted
    MessageStart { id: String },

    /// Streamed text was appended to the assistant message
    Token { id: String, delta: String },

    /// The turn finished; `message` is the last message it produced
    TurnEnd { message: Option<ChatMessage> },

    /// The turn failed and a fallback message was shown
    Error { message: String },

    /// The conversation was cleared
    Cleared,
}
