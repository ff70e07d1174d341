//! chatty-ai: chat-completions client and token stream decoding
//!
//! Talks to an OpenAI-compatible `/chat/completions` endpoint, either
//! returning the whole reply or handing back the raw event stream together
//! with the decoders that turn it into content tokens.

pub mod client;
pub mod error;
pub mod stream;
pub mod types;

pub use client::{Completion, CompletionBackend, OpenAiClient};
pub use error::{Error, Result};
pub use stream::{ByteStream, DecodedChunk, EventDecoder, Utf8Decoder};
pub use types::*;
