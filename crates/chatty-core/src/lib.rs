//! chatty-core: conversation state, persistence and the password gate
//!
//! This crate owns everything between the completion client and the screen:
//! the persisted message store, the reducer that folds streamed tokens into
//! it, the single-flight chat controller and the session gate.

pub mod chat;
pub mod error;
pub mod events;
pub mod gate;
pub mod reducer;
pub mod storage;
pub mod store;

pub use chat::{ChatSession, FALLBACK_MESSAGE, SendOutcome};
pub use error::{Error, PersistenceError, Result};
pub use events::ChatEvent;
pub use gate::{GateOutcome, SessionGate};
pub use reducer::{StreamReducer, StreamSummary};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::{MessageStore, SharedStore};
