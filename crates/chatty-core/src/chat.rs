//! Chat controller: one user turn at a time against a completion backend

use chatty_ai::{ChatMessage, Completion, CompletionBackend, TYPING_INDICATOR_ID, WireMessage};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::events::ChatEvent;
use crate::reducer::StreamReducer;
use crate::store::SharedStore;

/// Assistant text shown in place of a reply when a turn fails
pub const FALLBACK_MESSAGE: &str = "⚠️ Failed to fetch response from OpenAI.";

/// How a call to [`ChatSession::send`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The assistant reply is in the store
    Completed,
    /// Nothing happened: blank input, or a turn was already running
    Ignored,
    /// The request failed and the fallback message was appended
    Failed { message: String },
}

/// Clears the loading flag when the turn ends, however it ends
struct LoadingGuard {
    flag: Arc<AtomicBool>,
}

impl LoadingGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: Arc::clone(flag) })
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A conversation bound to a completion backend
pub struct ChatSession {
    store: SharedStore,
    backend: Arc<dyn CompletionBackend>,
    loading: Arc<AtomicBool>,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl ChatSession {
    pub fn new(store: SharedStore, backend: Arc<dyn CompletionBackend>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            backend,
            loading: Arc::new(AtomicBool::new(false)),
            event_tx,
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    /// Shared handle to the message store
    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// Snapshot of the conversation
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.store.lock().messages().to_vec()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Empty the conversation
    pub fn clear(&self) {
        self.store.lock().clear();
        self.emit(ChatEvent::Cleared);
        tracing::info!("Conversation cleared");
    }

    /// Run one turn for `input`
    ///
    /// Configuration problems (such as a missing API key) are returned as
    /// `Err` before anything is added to the conversation. Request and stream
    /// failures are reported as [`SendOutcome::Failed`] after the fallback
    /// message is shown.
    pub async fn send(&self, input: &str) -> Result<SendOutcome> {
        if input.trim().is_empty() || self.is_loading() {
            return Ok(SendOutcome::Ignored);
        }

        self.backend.ensure_ready()?;

        let Some(guard) = LoadingGuard::acquire(&self.loading) else {
            return Ok(SendOutcome::Ignored);
        };

        let user_message = ChatMessage::user(input);
        let history = {
            let mut store = self.store.lock();
            store.append(user_message.clone());
            let history: Vec<WireMessage> = store
                .messages()
                .iter()
                .filter(|m| !m.is_typing_indicator())
                .map(ChatMessage::to_wire)
                .collect();
            store.append(ChatMessage::typing_indicator());
            history
        };
        self.emit(ChatEvent::TurnStart { user_message });
        self.emit(ChatEvent::Typing);
        tracing::debug!(messages = history.len(), "Sending chat history");

        let outcome = match self.run_turn(&history).await {
            Ok(()) => SendOutcome::Completed,
            Err(e) => self.fail(e),
        };

        drop(guard);
        let last = self.store.lock().messages().last().cloned();
        self.emit(ChatEvent::TurnEnd { message: last });
        Ok(outcome)
    }

    async fn run_turn(&self, history: &[WireMessage]) -> Result<()> {
        match self.backend.send(history).await? {
            Completion::Full(text) => {
                let reply = ChatMessage::assistant(text.clone());
                let id = reply.id.clone();
                self.store.lock().replace_typing_indicator(reply);
                self.emit(ChatEvent::MessageStart { id: id.clone() });
                self.emit(ChatEvent::Token { id, delta: text });
            }
            Completion::Stream(body) => {
                let reply = ChatMessage::assistant("");
                let id = reply.id.clone();
                self.store.lock().replace_typing_indicator(reply);
                self.emit(ChatEvent::MessageStart { id: id.clone() });

                StreamReducer::new(Arc::clone(&self.store), id)
                    .with_events(self.event_tx.clone())
                    .run(body)
                    .await?;
            }
        }
        Ok(())
    }

    fn fail(&self, error: Error) -> SendOutcome {
        tracing::error!("Error fetching response: {}", error);
        {
            let mut store = self.store.lock();
            store.remove_by_id(TYPING_INDICATOR_ID);
            store.append(ChatMessage::assistant(FALLBACK_MESSAGE));
        }
        let message = error.user_message();
        self.emit(ChatEvent::Error {
            message: message.clone(),
        });
        SendOutcome::Failed { message }
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("loading", &self.is_loading())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::store::MessageStore;
    use async_trait::async_trait;
    use chatty_ai::{ByteStream, Role};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    enum Reply {
        Full(String),
        Chunks(Vec<String>),
        Api(u16, String),
        BrokenStream(Vec<String>),
    }

    /// Backend returning canned replies and recording what it was sent
    struct MockBackend {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<Vec<WireMessage>>>,
        store: SharedStore,
        saw_indicator: Mutex<Vec<bool>>,
        release: Option<Arc<Notify>>,
        has_key: bool,
    }

    impl MockBackend {
        fn new(store: &SharedStore, replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
                store: Arc::clone(store),
                saw_indicator: Mutex::new(Vec::new()),
                release: None,
                has_key: true,
            }
        }
    }

    fn sse(tokens: &[String]) -> Vec<chatty_ai::Result<Vec<u8>>> {
        tokens
            .iter()
            .map(|t| {
                Ok(format!(
                    "data: {}\n\n",
                    serde_json::json!({"choices": [{"delta": {"content": t}}]})
                )
                .into_bytes())
            })
            .collect()
    }

    #[async_trait]
    impl CompletionBackend for MockBackend {
        fn ensure_ready(&self) -> chatty_ai::Result<()> {
            if self.has_key {
                Ok(())
            } else {
                Err(chatty_ai::Error::MissingApiKey)
            }
        }

        async fn send(&self, history: &[WireMessage]) -> chatty_ai::Result<Completion> {
            self.requests.lock().push(history.to_vec());
            let shown = self.store.lock().has_typing_indicator();
            self.saw_indicator.lock().push(shown);

            if let Some(release) = &self.release {
                release.notified().await;
            }

            let reply = self
                .replies
                .lock()
                .pop_front()
                .unwrap_or(Reply::Full("default".into()));
            match reply {
                Reply::Full(text) => Ok(Completion::Full(text)),
                Reply::Chunks(tokens) => {
                    let body: ByteStream = Box::pin(futures::stream::iter(sse(&tokens)));
                    Ok(Completion::Stream(body))
                }
                Reply::Api(status, message) => Err(chatty_ai::Error::api(status, message)),
                Reply::BrokenStream(tokens) => {
                    let mut items = sse(&tokens);
                    items.push(Err(chatty_ai::Error::StreamParse("connection reset".into())));
                    let body: ByteStream = Box::pin(futures::stream::iter(items));
                    Ok(Completion::Stream(body))
                }
            }
        }
    }

    fn setup(replies: Vec<Reply>) -> (ChatSession, Arc<MockBackend>, SharedStore) {
        let store = MessageStore::new(Arc::new(MemoryStorage::new())).into_shared();
        let backend = Arc::new(MockBackend::new(&store, replies));
        let session = ChatSession::new(Arc::clone(&store), backend.clone());
        (session, backend, store)
    }

    fn contents(store: &SharedStore) -> Vec<(Role, String)> {
        store
            .lock()
            .messages()
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_streamed_turn() {
        let (session, backend, store) = setup(vec![Reply::Chunks(vec![
            "Hel".into(),
            "lo, ".into(),
            "world".into(),
        ])]);

        let outcome = session.send("hi").await.unwrap();
        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(
            contents(&store),
            vec![
                (Role::User, "hi".to_string()),
                (Role::Assistant, "Hello, world".to_string()),
            ]
        );
        assert!(!session.is_loading());

        // Indicator was visible while the request was in flight, and not sent
        assert_eq!(*backend.saw_indicator.lock(), vec![true]);
        let sent = &backend.requests.lock()[0];
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "hi");
    }

    #[tokio::test]
    async fn test_full_turn() {
        let (session, _, store) = setup(vec![Reply::Full("Sure thing.".into())]);
        assert_eq!(session.send("help").await.unwrap(), SendOutcome::Completed);
        assert_eq!(store.lock().messages()[1].content, "Sure thing.");
        assert!(!store.lock().has_typing_indicator());
    }

    #[tokio::test]
    async fn test_history_grows_across_turns() {
        let (session, backend, _) = setup(vec![
            Reply::Full("one".into()),
            Reply::Full("two".into()),
        ]);
        session.send("a").await.unwrap();
        session.send("b").await.unwrap();

        let requests = backend.requests.lock();
        let roles: Vec<Role> = requests[1].iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[tokio::test]
    async fn test_blank_input_ignored() {
        let (session, backend, store) = setup(vec![]);
        assert_eq!(session.send("   \n").await.unwrap(), SendOutcome::Ignored);
        assert!(store.lock().is_empty());
        assert!(backend.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_input_kept_untrimmed() {
        let (session, _, store) = setup(vec![Reply::Full("ok".into())]);
        session.send("  spaced  ").await.unwrap();
        assert_eq!(store.lock().messages()[0].content, "  spaced  ");
    }

    #[tokio::test]
    async fn test_missing_key_leaves_state_untouched() {
        let store = MessageStore::new(Arc::new(MemoryStorage::new())).into_shared();
        let mut backend = MockBackend::new(&store, vec![]);
        backend.has_key = false;
        let session = ChatSession::new(Arc::clone(&store), Arc::new(backend));

        let err = session.send("hi").await.unwrap_err();
        assert!(err.is_config());
        assert_eq!(err.user_message(), "Missing OpenAI API key.");
        assert!(store.lock().is_empty());
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn test_api_error_shows_fallback() {
        let (session, _, store) = setup(vec![Reply::Api(429, "Rate limit reached".into())]);
        let mut rx = session.subscribe();

        let outcome = session.send("hi").await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Failed {
                message: "Rate limit reached".into()
            }
        );
        assert_eq!(
            contents(&store),
            vec![
                (Role::User, "hi".to_string()),
                (Role::Assistant, FALLBACK_MESSAGE.to_string()),
            ]
        );

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if let ChatEvent::Error { message } = event {
                assert_eq!(message, "Rate limit reached");
                saw_error = true;
            }
        }
        assert!(saw_error);
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn test_stream_failure_keeps_partial_reply() {
        let (session, _, store) = setup(vec![Reply::BrokenStream(vec!["Par".into(), "tial".into()])]);

        let outcome = session.send("hi").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Failed { .. }));
        assert_eq!(
            contents(&store),
            vec![
                (Role::User, "hi".to_string()),
                (Role::Assistant, "Partial".to_string()),
                (Role::Assistant, FALLBACK_MESSAGE.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_single_turn_in_flight() {
        let store = MessageStore::new(Arc::new(MemoryStorage::new())).into_shared();
        let release = Arc::new(Notify::new());
        let mut backend = MockBackend::new(&store, vec![Reply::Full("done".into())]);
        backend.release = Some(Arc::clone(&release));
        let backend = Arc::new(backend);
        let session = ChatSession::new(Arc::clone(&store), backend.clone());

        let (first, second) = tokio::join!(session.send("first"), async {
            let outcome = session.send("second").await;
            release.notify_one();
            outcome
        });

        assert_eq!(first.unwrap(), SendOutcome::Completed);
        assert_eq!(second.unwrap(), SendOutcome::Ignored);
        assert_eq!(backend.requests.lock().len(), 1);
        assert_eq!(store.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_event_sequence() {
        let (session, _, _) = setup(vec![Reply::Chunks(vec!["a".into(), "b".into()])]);
        let mut rx = session.subscribe();
        session.send("hi").await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                ChatEvent::TurnStart { .. } => "start",
                ChatEvent::Typing => "typing",
                ChatEvent::MessageStart { .. } => "message",
                ChatEvent::Token { .. } => "token",
                ChatEvent::TurnEnd { .. } => "end",
                ChatEvent::Error { .. } => "error",
                ChatEvent::Cleared => "cleared",
            });
        }
        assert_eq!(kinds, vec!["start", "typing", "message", "token", "token", "end"]);
    }

    #[tokio::test]
    async fn test_clear() {
        let (session, _, store) = setup(vec![Reply::Full("x".into())]);
        session.send("hi").await.unwrap();
        let mut rx = session.subscribe();

        session.clear();
        assert!(store.lock().is_empty());
        assert_eq!(rx.try_recv().unwrap(), ChatEvent::Cleared);
    }
}
