//! Chat-completions client

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;

use crate::{
    error::{Error, GENERIC_API_ERROR, Result},
    stream::ByteStream,
    types::{CompletionOptions, WireMessage},
};

/// Environment variable holding the API credential
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Reply text used when a whole-body response carries no content
pub const NO_RESPONSE: &str = "No response";

/// What a successful request produced
pub enum Completion {
    /// The complete reply (non-streaming mode)
    Full(String),
    /// The raw event-stream body (streaming mode)
    Stream(ByteStream),
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Full(text) => f.debug_tuple("Full").field(text).finish(),
            Completion::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Something that can answer a conversation
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Check that a request could be attempted at all (credentials present)
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    /// Send the full ordered history and return the reply
    async fn send(&self, history: &[WireMessage]) -> Result<Completion>;
}

/// Client for an OpenAI-compatible chat-completions endpoint
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: Option<String>,
    options: CompletionOptions,
}

impl OpenAiClient {
    /// Create a client; a `None` key makes every send fail with `MissingApiKey`
    pub fn new(api_key: Option<String>, options: CompletionOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            options,
        }
    }

    fn build_request<'a>(&'a self, history: &'a [WireMessage]) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.options.model,
            stream: self.options.stream,
            messages: history,
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    fn ensure_ready(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(Error::MissingApiKey);
        }
        if reqwest::Url::parse(&self.options.endpoint()).is_err() {
            return Err(Error::InvalidConfig(format!(
                "invalid base URL: {}",
                self.options.base_url
            )));
        }
        Ok(())
    }

    async fn send(&self, history: &[WireMessage]) -> Result<Completion> {
        self.ensure_ready()?;
        let api_key = self.api_key.as_deref().ok_or(Error::MissingApiKey)?;

        let url = self.options.endpoint();
        let request = self.build_request(history);

        tracing::debug!(
            url = %url,
            model = %self.options.model,
            stream = self.options.stream,
            messages = history.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = parse_error_body(&body);
            tracing::debug!(status = status.as_u16(), "Completion request rejected: {}", message);
            return Err(Error::api(status.as_u16(), message));
        }

        if !self.options.stream {
            let body: Value = response.json().await?;
            return Ok(Completion::Full(extract_full_text(&body)));
        }

        let mut body = Box::pin(response.bytes_stream());
        let chunks: ByteStream = Box::pin(stream! {
            while let Some(chunk) = body.next().await {
                yield chunk.map(|bytes| bytes.to_vec()).map_err(Error::from);
            }
        });
        Ok(Completion::Stream(chunks))
    }
}

/// Pull a human-readable message out of an error response body
///
/// Falls back to `"request failed"` when the body is not JSON or has no
/// `error.message`.
pub fn parse_error_body(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.pointer("/error/message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| GENERIC_API_ERROR.to_string())
}

/// Take `choices[0].message.content` from a whole-body response
pub fn extract_full_text(body: &Value) -> String {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_RESPONSE)
        .to_string()
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: &'a [WireMessage],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_parse_error_body_with_message() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(parse_error_body(body), "Incorrect API key provided");
    }

    #[test]
    fn test_parse_error_body_unparseable() {
        assert_eq!(parse_error_body("<html>Bad Gateway</html>"), "request failed");
        assert_eq!(parse_error_body(""), "request failed");
    }

    #[test]
    fn test_parse_error_body_without_message() {
        assert_eq!(parse_error_body(r#"{"error":{}}"#), "request failed");
        assert_eq!(parse_error_body(r#"[1,2,3]"#), "request failed");
    }

    #[test]
    fn test_extract_full_text() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello there"}}]
        });
        assert_eq!(extract_full_text(&body), "Hello there");
    }

    #[test]
    fn test_extract_full_text_fallback() {
        assert_eq!(extract_full_text(&serde_json::json!({"choices": []})), "No response");
        assert_eq!(
            extract_full_text(&serde_json::json!({"choices": [{"message": {"content": null}}]})),
            "No response"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let client = OpenAiClient::new(Some("sk-test".into()), CompletionOptions::default());
        let history = vec![
            WireMessage {
                role: Role::User,
                content: "hi".into(),
            },
            WireMessage {
                role: Role::Assistant,
                content: "hello".into(),
            },
        ];
        let json = serde_json::to_value(client.build_request(&history)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "gpt-4o",
                "stream": true,
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"}
                ]
            })
        );
    }

    #[test]
    fn test_missing_key_not_ready() {
        let client = OpenAiClient::new(None, CompletionOptions::default());
        assert!(matches!(client.ensure_ready(), Err(Error::MissingApiKey)));

        let blank = OpenAiClient::new(Some("  ".into()), CompletionOptions::default());
        assert!(matches!(blank.ensure_ready(), Err(Error::MissingApiKey)));
    }

    #[test]
    fn test_bad_base_url_not_ready() {
        let options = CompletionOptions {
            base_url: "not a url".into(),
            ..Default::default()
        };
        let client = OpenAiClient::new(Some("sk-test".into()), options);
        assert!(matches!(client.ensure_ready(), Err(Error::InvalidConfig(_))));
    }

    /// Serve one canned HTTP response on a local port and return its base URL
    async fn serve_once(response: String) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // Read headers and the full body before answering
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{}/v1", addr)
    }

    fn http_response(status: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            content_type,
            body.len(),
            body
        )
    }

    fn client_for(base_url: String, stream: bool) -> OpenAiClient {
        OpenAiClient::new(
            Some("sk-test".into()),
            CompletionOptions {
                base_url,
                stream,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_non_success_with_unparseable_body() {
        let base = serve_once(http_response("502 Bad Gateway", "text/html", "<h1>oops</h1>")).await;
        let result = client_for(base, true).send(&[]).await;
        match result {
            Err(Error::Api { status, message }) => {
                assert_eq!(status, 502);
                assert_eq!(message, "request failed");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_success_with_error_message() {
        let body = r#"{"error":{"message":"Rate limit reached"}}"#;
        let base = serve_once(http_response("429 Too Many Requests", "application/json", body)).await;
        let result = client_for(base, false).send(&[]).await;
        match result {
            Err(Error::Api { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Whole reply"}}]}"#;
        let base = serve_once(http_response("200 OK", "application/json", body)).await;
        let result = client_for(base, false).send(&[]).await.unwrap();
        match result {
            Completion::Full(text) => assert_eq!(text, "Whole reply"),
            other => panic!("expected Full, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_streaming_response_body() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n";
        let base = serve_once(http_response("200 OK", "text/event-stream", body)).await;
        let result = client_for(base, true).send(&[]).await.unwrap();
        let Completion::Stream(mut chunks) = result else {
            panic!("expected Stream");
        };
        let mut raw = Vec::new();
        while let Some(chunk) = chunks.next().await {
            raw.extend(chunk.unwrap());
        }
        assert_eq!(String::from_utf8(raw).unwrap(), body);
    }

    #[tokio::test]
    async fn test_send_without_key_fails_fast() {
        let client = OpenAiClient::new(None, CompletionOptions::default());
        let result = client.send(&[]).await;
        assert!(matches!(result, Err(Error::MissingApiKey)));
    }
}
