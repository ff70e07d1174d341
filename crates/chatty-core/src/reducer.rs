//! Folds a streamed completion into the in-progress assistant message

use chatty_ai::{ByteStream, EventDecoder};
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::events::ChatEvent;
use crate::store::SharedStore;

/// Summary of one consumed stream
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// Tokens appended to the message
    pub tokens: usize,
    /// Raw chunks read from the body
    pub chunks: usize,
    /// Lines skipped because they were not valid JSON
    pub skipped_lines: usize,
}

/// Drives an event stream into the message with a given id
pub struct StreamReducer {
    store: SharedStore,
    message_id: String,
    events: Option<broadcast::Sender<ChatEvent>>,
    decoder: EventDecoder,
    summary: StreamSummary,
}

impl StreamReducer {
    pub fn new(store: SharedStore, message_id: impl Into<String>) -> Self {
        Self {
            store,
            message_id: message_id.into(),
            events: None,
            decoder: EventDecoder::new(),
            summary: StreamSummary::default(),
        }
    }

    /// Emit a `ChatEvent::Token` for every appended token
    pub fn with_events(mut self, events: broadcast::Sender<ChatEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Consume the stream until it ends
    ///
    /// Returns early only when reading the body fails. Tokens appended before
    /// the failure stay in the message.
    pub async fn run(mut self, mut body: ByteStream) -> Result<StreamSummary> {
        while let Some(chunk) = body.next().await {
            let bytes = chunk?;
            self.summary.chunks += 1;
            let decoded = self.decoder.push(&bytes);
            if decoded.done {
                tracing::debug!(message_id = %self.message_id, "Stream sent [DONE]");
            }
            self.summary.skipped_lines += decoded.skipped;
            self.apply(decoded.tokens);
        }

        let tail = self.decoder.finish();
        self.summary.skipped_lines += tail.skipped;
        self.apply(tail.tokens);

        tracing::debug!(
            message_id = %self.message_id,
            tokens = self.summary.tokens,
            chunks = self.summary.chunks,
            skipped = self.summary.skipped_lines,
            "Stream finished"
        );
        Ok(self.summary)
    }

    fn apply(&mut self, tokens: Vec<String>) {
        for token in tokens {
            let found = self.store.lock().append_content(&self.message_id, &token);
            if !found {
                // Conversation was cleared under us; keep draining the body
                tracing::debug!(message_id = %self.message_id, "Dropping token for missing message");
                continue;
            }
            self.summary.tokens += 1;
            if let Some(tx) = &self.events {
                let _ = tx.send(ChatEvent::Token {
                    id: self.message_id.clone(),
                    delta: token,
                });
            }
        }
    }
}
