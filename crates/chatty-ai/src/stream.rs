//! Incremental decoding of a server-sent-event token stream
//!
//! Bytes arrive in arbitrary chunks. [`Utf8Decoder`] turns them into text
//! without ever splitting a multi-byte character, and [`EventDecoder`] picks
//! the `data: ` lines out of that text and extracts the content tokens.

use serde_json::Value;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::error::{Error, Result};

/// Prefix marking a candidate event line
pub const DATA_PREFIX: &str = "data: ";

/// Payload marking the end of the event stream
pub const DONE_MARKER: &str = "[DONE]";

/// A stream of raw body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Streaming UTF-8 decoder
///
/// A sequence cut off at the end of a chunk is held back until the next
/// chunk completes it. Bytes that can never form a valid sequence become
/// U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        out.push_str(text);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Truncated at the chunk edge
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush at end of input; a dangling partial sequence becomes U+FFFD
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

/// Classification of a single line of the event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventLine {
    /// Not a `data: ` line
    Ignored,
    /// The `[DONE]` marker
    Done,
    /// A well-formed payload carrying a content token
    Token(String),
    /// A well-formed payload without a content token
    Empty,
    /// A `data: ` line whose payload is not JSON
    Malformed(String),
}

/// Classify one line of the event stream
pub fn parse_event_line(line: &str) -> EventLine {
    let Some(payload) = line.trim().strip_prefix(DATA_PREFIX) else {
        return EventLine::Ignored;
    };
    let payload = payload.trim();

    if payload == DONE_MARKER {
        return EventLine::Done;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(json) => match json
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
        {
            Some(token) if !token.is_empty() => EventLine::Token(token.to_string()),
            _ => EventLine::Empty,
        },
        Err(e) => EventLine::Malformed(e.to_string()),
    }
}

/// Tokens recovered from one chunk of the stream
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodedChunk {
    /// Content tokens in arrival order
    pub tokens: Vec<String>,
    /// `[DONE]` cut this chunk short
    pub done: bool,
    /// Lines skipped because their payload was not JSON
    pub skipped: usize,
}

/// Turns raw body chunks into content tokens
///
/// `[DONE]` only abandons the rest of the chunk it arrives in; anything in
/// later chunks is still decoded. A line that is not yet terminated by `\n`
/// is held until its chunk arrives, or until [`EventDecoder::finish`].
#[derive(Debug, Default)]
pub struct EventDecoder {
    utf8: Utf8Decoder,
    partial_line: String,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk of raw bytes
    pub fn push(&mut self, bytes: &[u8]) -> DecodedChunk {
        let text = self.utf8.decode(bytes);
        let mut out = DecodedChunk::default();
        let mut fresh = text.as_str();

        // A held line is completed by this chunk but belongs to the chunk it
        // started in, so a `[DONE]` there must not cut this chunk short
        if !self.partial_line.is_empty() {
            let Some(end) = fresh.find('\n') else {
                self.partial_line.push_str(fresh);
                return out;
            };
            let mut carried = std::mem::take(&mut self.partial_line);
            carried.push_str(&fresh[..end]);
            Self::decode_lines(&carried, &mut out);
            fresh = &fresh[end + 1..];
        }

        match fresh.rfind('\n') {
            Some(last) => {
                let (complete, tail) = fresh.split_at(last + 1);
                // The unterminated tail belongs to this chunk too
                if !Self::decode_lines(complete, &mut out) {
                    self.partial_line.push_str(tail);
                }
            }
            None => self.partial_line.push_str(fresh),
        }

        out
    }

    /// Flush whatever is still held at end of stream
    pub fn finish(&mut self) -> DecodedChunk {
        let tail = self.utf8.finish();
        self.partial_line.push_str(&tail);
        let rest = std::mem::take(&mut self.partial_line);
        let mut out = DecodedChunk::default();
        if !rest.is_empty() {
            Self::decode_lines(&rest, &mut out);
        }
        out
    }

    /// Returns true if `[DONE]` stopped the loop
    fn decode_lines(text: &str, out: &mut DecodedChunk) -> bool {
        for line in text.split('\n') {
            match parse_event_line(line) {
                EventLine::Ignored | EventLine::Empty => {}
                EventLine::Token(token) => out.tokens.push(token),
                EventLine::Malformed(reason) => {
                    let err = Error::StreamParse(reason);
                    tracing::warn!(line = line.trim(), "Skipping stream line: {}", err);
                    out.skipped += 1;
                }
                EventLine::Done => {
                    out.done = true;
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(token: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": token}}]})
        )
    }

    #[test]
    fn test_utf8_split_multibyte() {
        // "é" is 0xC3 0xA9
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(&[b'a', 0xC3]), "a");
        assert_eq!(dec.decode(&[0xA9, b'b']), "éb");
        assert_eq!(dec.finish(), "");
    }

    #[test]
    fn test_utf8_split_four_byte_across_three_chunks() {
        let bytes = "🦀".as_bytes();
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(&bytes[..1]), "");
        assert_eq!(dec.decode(&bytes[1..3]), "");
        assert_eq!(dec.decode(&bytes[3..]), "🦀");
    }

    #[test]
    fn test_utf8_invalid_byte_replaced() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(&[b'x', 0xFF, b'y']), "x\u{FFFD}y");
    }

    #[test]
    fn test_utf8_finish_flushes_dangling_sequence() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(&[0xE2, 0x82]), "");
        assert_eq!(dec.finish(), "\u{FFFD}");
        assert_eq!(dec.finish(), "");
    }

    #[test]
    fn test_parse_event_line_kinds() {
        assert_eq!(parse_event_line(": keep-alive"), EventLine::Ignored);
        assert_eq!(parse_event_line("event: ping"), EventLine::Ignored);
        assert_eq!(parse_event_line(""), EventLine::Ignored);
        assert_eq!(parse_event_line("  data: [DONE]  "), EventLine::Done);
        assert_eq!(
            parse_event_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
            EventLine::Token("Hi".into())
        );
        assert_eq!(
            parse_event_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            EventLine::Empty
        );
        assert_eq!(
            parse_event_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            EventLine::Empty
        );
        assert!(matches!(
            parse_event_line("data: not-json"),
            EventLine::Malformed(_)
        ));
    }

    #[test]
    fn test_tokens_in_order() {
        let mut dec = EventDecoder::new();
        let body = format!("{}{}{}", delta("Hel"), delta("lo, "), delta("world"));
        let out = dec.push(body.as_bytes());
        assert_eq!(out.tokens, vec!["Hel", "lo, ", "world"]);
        assert!(!out.done);
    }

    #[test]
    fn test_malformed_line_skipped() {
        let mut dec = EventDecoder::new();
        let body = format!("{}data: not-json\n{}", delta("a"), delta("b"));
        let out = dec.push(body.as_bytes());
        assert_eq!(out.tokens, vec!["a", "b"]);
        assert_eq!(out.skipped, 1);
    }

    #[test]
    fn test_done_stops_only_current_chunk() {
        let mut dec = EventDecoder::new();
        let first = format!("{}data: [DONE]\n{}", delta("a"), delta("dropped"));
        let out = dec.push(first.as_bytes());
        assert_eq!(out.tokens, vec!["a"]);
        assert!(out.done);

        // A later chunk is still decoded
        let out = dec.push(delta("later").as_bytes());
        assert_eq!(out.tokens, vec!["later"]);
    }

    #[test]
    fn test_done_completed_by_next_chunk_keeps_its_lines() {
        let mut dec = EventDecoder::new();
        let first = format!("{}data: [DONE]", delta("a"));
        let out = dec.push(first.as_bytes());
        assert_eq!(out.tokens, vec!["a"]);
        assert!(!out.done);

        let second = format!("\n{}", delta("b"));
        let out = dec.push(second.as_bytes());
        assert!(out.done);
        assert_eq!(out.tokens, vec!["b"]);
        assert_eq!(dec.finish(), DecodedChunk::default());
    }

    #[test]
    fn test_line_split_across_chunks() {
        let body = delta("joined");
        let (head, tail) = body.as_bytes().split_at(20);
        let mut dec = EventDecoder::new();
        assert!(dec.push(head).tokens.is_empty());
        assert_eq!(dec.push(tail).tokens, vec!["joined"]);
    }

    #[test]
    fn test_multibyte_token_split_at_chunk_boundary() {
        let body = delta("né");
        let bytes = body.as_bytes();
        let split = body.find('é').map(|i| i + 1).unwrap();
        let mut dec = EventDecoder::new();
        let mut tokens = dec.push(&bytes[..split]).tokens;
        tokens.extend(dec.push(&bytes[split..]).tokens);
        assert_eq!(tokens, vec!["né"]);
    }

    #[test]
    fn test_unterminated_final_line_flushed() {
        let mut dec = EventDecoder::new();
        let body = r#"data: {"choices":[{"delta":{"content":"tail"}}]}"#;
        assert!(dec.push(body.as_bytes()).tokens.is_empty());
        assert_eq!(dec.finish().tokens, vec!["tail"]);
        assert_eq!(dec.finish(), DecodedChunk::default());
    }

    #[test]
    fn test_crlf_lines() {
        let mut dec = EventDecoder::new();
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r\n\r\n";
        assert_eq!(dec.push(body.as_bytes()).tokens, vec!["x"]);
    }
}
