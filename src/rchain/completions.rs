use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::rchain::chat_runtime::{RequestFailure, RetryConfig, send_chat_request_with_retry};
use crate::rchain::provider::{ChatBackend, ChatMessage, Provider, ProviderError, api_key_env};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// HTTP transport settings shared by every call a backend makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retries: 3,
            retry_delay_ms: 2_000,
        }
    }
}

/// Chat-completions client for any OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    provider: Provider,
    endpoint: String,
    api_key: String,
    options: TransportOptions,
    client: reqwest::Client,
}

impl HttpChatBackend {
    /// Creates a backend reading the key from the provider's environment variable.
    pub fn from_env(
        provider: Provider,
        endpoint: impl Into<String>,
        options: TransportOptions,
    ) -> Result<Self, ProviderError> {
        let key_env = api_key_env(provider);
        let api_key = std::env::var(key_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(ProviderError::MissingApiKey { provider, key_env })?;

        Ok(Self::new(provider, endpoint, api_key, options))
    }

    pub fn new(
        provider: Provider,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        options: TransportOptions,
    ) -> Self {
        Self {
            provider,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            options,
            client: reqwest::Client::new(),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, ProviderError> {
        let provider = self.provider;
        let payload = ChatCompletionRequest {
            model,
            messages: vec![ChatMessage::user(prompt)],
        };

        tracing::debug!(
            provider = provider.as_str(),
            model,
            prompt_chars = prompt.chars().count(),
            "sending chat completion"
        );

        let body: ChatCompletionResponse = send_chat_request_with_retry(
            &self.client,
            &self.endpoint,
            &self.api_key,
            &payload,
            RetryConfig {
                timeout_secs: self.options.timeout_secs,
                retries: self.options.retries,
                retry_delay_ms: self.options.retry_delay_ms,
            },
        )
        .await
        .map_err(|failure| match failure {
            RequestFailure::Request(source) => ProviderError::Request { provider, source },
            RequestFailure::Api { status, body } => ProviderError::Api {
                provider,
                status,
                body,
            },
            RequestFailure::RetriesExhausted { attempts } => {
                ProviderError::RetriesExhausted { provider, attempts }
            }
        })?;

        first_choice_content(body).ok_or(ProviderError::EmptyResponse { provider })
    }
}

fn first_choice_content(body: ChatCompletionResponse) -> Option<String> {
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
}

#[cfg(test)]
mod tests {
    use super::{
        ChatCompletionRequest, ChatCompletionResponse, HttpChatBackend, TransportOptions,
        first_choice_content,
    };
    use crate::rchain::provider::{ChatBackend, ChatMessage, Provider, ProviderError};
    use reqwest::StatusCode;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Debug, Clone, Copy)]
    enum Reply {
        /// Accept the request and never answer.
        Stall,
        /// Send the status line and headers, then stop halfway through the body.
        StallBody,
        Json(u16, &'static str),
    }

    /// Local HTTP endpoint answering requests with a fixed script of replies.
    /// The last reply repeats once the script runs out.
    struct FakeEndpoint {
        url: String,
        hits: Arc<AtomicUsize>,
        authorization: Arc<Mutex<Vec<String>>>,
    }

    impl FakeEndpoint {
        async fn start(script: Vec<Reply>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .expect("listener should bind");
            let url = format!(
                "http://{}/api/v1/chat/completions",
                listener.local_addr().expect("listener should have an address")
            );
            let hits = Arc::new(AtomicUsize::new(0));
            let authorization = Arc::new(Mutex::new(Vec::new()));

            let server_hits = Arc::clone(&hits);
            let server_auth = Arc::clone(&authorization);
            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    let head = read_request(&mut stream).await;
                    if let Some(value) = header(&head, "authorization") {
                        server_auth.lock().unwrap().push(value);
                    }
                    let index = server_hits.fetch_add(1, Ordering::SeqCst);
                    let reply = script[index.min(script.len() - 1)];
                    tokio::spawn(respond(stream, reply));
                }
            });

            Self {
                url,
                hits,
                authorization,
            }
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        fn backend(&self) -> HttpChatBackend {
            HttpChatBackend::new(
                Provider::Openrouter,
                self.url.clone(),
                "test-key",
                TransportOptions {
                    timeout_secs: 1,
                    retries: 3,
                    retry_delay_ms: 10,
                },
            )
        }
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let read = stream.read(&mut chunk).await.unwrap_or(0);
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&raw);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = header(&text[..end], "content-length")
                    .and_then(|value| value.parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    fn header(head: &str, name: &str) -> Option<String> {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    async fn respond(mut stream: TcpStream, reply: Reply) {
        match reply {
            Reply::Stall => {}
            Reply::StallBody => {
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 64\r\n\r\n{\"choices\":",
                    )
                    .await;
            }
            Reply::Json(code, body) => {
                let status = StatusCode::from_u16(code).expect("valid status");
                let response = format!(
                    "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or(""),
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
                return;
            }
        }
        // Hold the connection open until the client gives up on it.
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(stream);
    }

    const OK_BODY: &str = r#"{"choices":[{"message":{"role":"assistant","content":" ok "}}]}"#;

    #[test]
    fn request_body_is_a_single_user_turn() {
        let payload = ChatCompletionRequest {
            model: "liquid/lfm-40b",
            messages: vec![ChatMessage::user("What is 2+2?")],
        };

        let body = serde_json::to_value(&payload).expect("payload should serialize");
        assert_eq!(
            body,
            json!({
                "model": "liquid/lfm-40b",
                "messages": [{"role": "user", "content": "What is 2+2?"}]
            })
        );
    }

    #[test]
    fn first_choice_wins() {
        let body: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [
                {"message": {"role": "assistant", "content": "  4\n"}},
                {"message": {"role": "assistant", "content": "five"}}
            ]
        }))
        .expect("response should parse");

        assert_eq!(first_choice_content(body), Some("  4\n".to_string()));
    }

    #[test]
    fn missing_choice_or_null_content_is_empty() {
        for raw in [
            json!({"choices": []}),
            json!({}),
            json!({"choices": [{"message": {"content": Value::Null}}]}),
        ] {
            let body: ChatCompletionResponse =
                serde_json::from_value(raw).expect("response should parse");
            assert_eq!(first_choice_content(body), None);
        }
    }

    #[test]
    fn blank_content_is_passed_through() {
        for content in ["", "   "] {
            let body: ChatCompletionResponse = serde_json::from_value(json!({
                "choices": [{"message": {"content": content}}]
            }))
            .expect("response should parse");
            assert_eq!(first_choice_content(body), Some(content.to_string()));
        }
    }

    #[tokio::test]
    async fn complete_sends_bearer_key_and_returns_raw_content() {
        let endpoint = FakeEndpoint::start(vec![Reply::Json(200, OK_BODY)]).await;

        let content = endpoint
            .backend()
            .complete("liquid/lfm-40b", "What is 2+2?")
            .await
            .expect("completion should succeed");

        assert_eq!(content, " ok ");
        assert_eq!(endpoint.hits(), 1);
        assert_eq!(
            endpoint.authorization.lock().unwrap().as_slice(),
            ["Bearer test-key".to_string()]
        );
    }

    #[tokio::test]
    async fn whitespace_and_empty_content_are_not_errors() {
        let endpoint = FakeEndpoint::start(vec![
            Reply::Json(200, r#"{"choices":[{"message":{"content":""}}]}"#),
            Reply::Json(200, r#"{"choices":[{"message":{"content":"   "}}]}"#),
            Reply::Json(200, r#"{"choices":[]}"#),
        ])
        .await;
        let backend = endpoint.backend();

        assert_eq!(backend.complete("m", "q").await.ok(), Some(String::new()));
        assert_eq!(backend.complete("m", "q").await.ok(), Some("   ".to_string()));
        assert!(matches!(
            backend.complete("m", "q").await,
            Err(ProviderError::EmptyResponse {
                provider: Provider::Openrouter
            })
        ));
    }

    #[tokio::test]
    async fn stalled_requests_are_retried_until_one_answers() {
        let endpoint =
            FakeEndpoint::start(vec![Reply::Stall, Reply::Stall, Reply::Json(200, OK_BODY)]).await;

        let content = endpoint.backend().complete("m", "q").await;

        assert_eq!(content.ok(), Some(" ok ".to_string()));
        assert_eq!(endpoint.hits(), 3);
    }

    #[tokio::test]
    async fn body_read_timeout_is_retried() {
        let endpoint = FakeEndpoint::start(vec![Reply::StallBody, Reply::Json(200, OK_BODY)]).await;

        let content = endpoint.backend().complete("m", "q").await;

        assert_eq!(content.ok(), Some(" ok ".to_string()));
        assert_eq!(endpoint.hits(), 2);
    }

    #[tokio::test]
    async fn server_error_fails_once_with_status_and_body() {
        let endpoint = FakeEndpoint::start(vec![Reply::Json(500, "boom")]).await;

        let err = endpoint
            .backend()
            .complete("m", "q")
            .await
            .expect_err("500 should fail");

        match err {
            ProviderError::Api {
                provider,
                status,
                body,
            } => {
                assert_eq!(provider, Provider::Openrouter);
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(endpoint.hits(), 1);
    }

    #[tokio::test]
    async fn endless_stalls_exhaust_every_attempt() {
        let endpoint = FakeEndpoint::start(vec![Reply::Stall]).await;

        let err = endpoint
            .backend()
            .complete("m", "q")
            .await
            .expect_err("stalls should exhaust retries");

        assert!(
            matches!(
                err,
                ProviderError::RetriesExhausted {
                    provider: Provider::Openrouter,
                    attempts: 3
                }
            ),
            "unexpected error: {err:?}"
        );
        assert_eq!(endpoint.hits(), 3);
    }
}
