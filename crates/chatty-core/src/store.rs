//! Ordered conversation state mirrored to persistent storage
//!
//! Every mutation writes the whole sequence back to the `chat-messages`
//! slot. Writes are best effort: a failure is logged and the in-memory
//! state stays authoritative.

use chatty_ai::{ChatMessage, TYPING_INDICATOR_ID};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use crate::error::PersistenceError;
use crate::storage::{MESSAGES_KEY, Storage};

/// Store shared between the chat controller and the rendering layer
pub type SharedStore = Arc<Mutex<MessageStore>>;

/// The conversation, in display order
pub struct MessageStore {
    messages: Vec<ChatMessage>,
    storage: Arc<dyn Storage>,
}

impl MessageStore {
    /// Create an empty store without reading storage
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            messages: Vec::new(),
            storage,
        }
    }

    /// Load the persisted conversation, falling back to empty on any problem
    pub fn load(storage: Arc<dyn Storage>) -> Self {
        let messages = match Self::try_load(storage.as_ref()) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("Invalid chat history, starting empty: {}", e);
                Vec::new()
            }
        };
        Self { messages, storage }
    }

    /// Read and validate the persisted conversation
    pub fn try_load(storage: &dyn Storage) -> Result<Vec<ChatMessage>, PersistenceError> {
        let Some(raw) = storage.get(MESSAGES_KEY)? else {
            return Ok(Vec::new());
        };

        let value: Value = serde_json::from_str(&raw)?;
        let Value::Array(items) = value else {
            return Err(PersistenceError::Shape("expected an array".to_string()));
        };

        let mut messages = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value::<ChatMessage>(item)
                    .map_err(|e| PersistenceError::Shape(format!("message {}: {}", i, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Left behind by a turn that never finished
        messages.retain(|m| m.id != TYPING_INDICATOR_ID);
        Ok(messages)
    }

    /// Wrap in the shared handle used across tasks
    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the typing indicator is currently shown
    pub fn has_typing_indicator(&self) -> bool {
        self.messages.iter().any(ChatMessage::is_typing_indicator)
    }

    /// Append a message at the end
    pub fn append(&mut self, message: ChatMessage) {
        if message.is_typing_indicator() {
            // At most one indicator at a time
            self.messages.retain(|m| !m.is_typing_indicator());
        }
        self.messages.push(message);
        self.persist();
    }

    /// Apply `update` to the message with `id`; returns false if absent
    pub fn replace_by_id<F>(&mut self, id: &str, update: F) -> bool
    where
        F: FnOnce(&mut ChatMessage),
    {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        update(message);
        self.persist();
        true
    }

    /// Append streamed text to the message with `id`
    pub fn append_content(&mut self, id: &str, delta: &str) -> bool {
        self.replace_by_id(id, |m| m.content.push_str(delta))
    }

    /// Remove the message with `id`; returns false if absent
    pub fn remove_by_id(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        if self.messages.len() == before {
            return false;
        }
        self.persist();
        true
    }

    /// Drop the typing indicator and append `message` in a single mutation
    pub fn replace_typing_indicator(&mut self, message: ChatMessage) {
        self.messages.retain(|m| m.id != TYPING_INDICATOR_ID);
        self.messages.push(message);
        self.persist();
    }

    /// Empty the conversation
    pub fn clear(&mut self) {
        self.messages.clear();
        self.persist();
    }

    /// Write the whole sequence to storage
    pub fn save(&self) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(&self.messages)?;
        self.storage.set(MESSAGES_KEY, &json)?;
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            tracing::warn!("Failed to persist chat history: {}", e);
        }
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}
