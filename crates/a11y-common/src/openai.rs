use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone, Debug)]
pub struct OpenAiClientConfig {
    pub base_url: String,
    pub default_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_error_body_bytes: usize,
}

impl OpenAiClientConfig {
    /// Chat calls are bounded by `OPENAI_TIMEOUT_SECS` and retried at most
    /// `OPENAI_MAX_RETRIES` times (one retry unless overridden).
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "http://localhost:11434/v1".to_string());

        let default_timeout = std::env::var("OPENAI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(60));

        let max_retries = std::env::var("OPENAI_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(1);

        let initial_backoff = std::env::var("OPENAI_RETRY_INITIAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(500));

        let max_backoff = std::env::var("OPENAI_RETRY_MAX_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(5_000));

        let max_error_body_bytes = std::env::var("OPENAI_MAX_ERROR_BODY_BYTES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(8 * 1024);

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            default_timeout,
            max_retries,
            initial_backoff,
            max_backoff,
            max_error_body_bytes,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenAiClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned error: status={status} message={message}")]
    Upstream { status: StatusCode, message: String },

    #[error("upstream returned non-JSON error: status={status} body={body}")]
    UpstreamBody { status: StatusCode, body: String },

    #[error("completion had no choices[0].message.content")]
    EmptyReply,
}

/// HTTP client for an OpenAI-compatible chat endpoint (Ollama, vLLM, OpenAI itself).
#[derive(Clone)]
pub struct OpenAiClient {
    config: OpenAiClientConfig,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiClientConfig) -> Result<Self, OpenAiClientError> {
        let http = reqwest::Client::builder()
            .user_agent("wcag-remediator")
            .timeout(config.default_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    /// POST `/chat/completions`, retrying transient failures up to `max_retries` times.
    pub async fn chat_completions(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, OpenAiClientError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match self.post_once(&url, request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            if attempt > self.config.max_retries || !should_retry(&err) {
                return Err(err);
            }
            let delay = backoff_delay(self.config.initial_backoff, self.config.max_backoff, attempt - 1);
            warn!(
                attempt,
                delay_ms = delay.as_millis(),
                error = %err,
                "chat request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn post_once(
        &self,
        url: &str,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, OpenAiClientError> {
        let resp = self.http.post(url).json(request).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<ChatCompletionResponse>().await?);
        }

        let body = read_limited_text(resp, self.config.max_error_body_bytes).await;
        Err(match serde_json::from_str::<OpenAiErrorEnvelope>(&body) {
            Ok(parsed) => OpenAiClientError::Upstream {
                status,
                message: parsed
                    .error
                    .message
                    .unwrap_or_else(|| "unknown upstream error".to_string()),
            },
            Err(_) => OpenAiClientError::UpstreamBody { status, body },
        })
    }
}

/// A two-turn chat backend: one fixed system message, one user message, one reply.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, system: &str, user: &str) -> Result<String, OpenAiClientError>;
}

/// `ChatModel` backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatModel {
    client: Arc<OpenAiClient>,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(client: Arc<OpenAiClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn chat(&self, system: &str, user: &str) -> Result<String, OpenAiClientError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![Message::system(system), Message::user(user)],
        };
        let response = self.client.chat_completions(&request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(OpenAiClientError::EmptyReply)
    }
}

fn should_retry(err: &OpenAiClientError) -> bool {
    match err {
        OpenAiClientError::Request(e) => {
            e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode()
        }
        OpenAiClientError::Upstream { status, .. }
        | OpenAiClientError::UpstreamBody { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
        }
        OpenAiClientError::EmptyReply => false,
    }
}

fn backoff_delay(initial: Duration, max: Duration, exponent: u32) -> Duration {
    let mult = 1u128.checked_shl(exponent).unwrap_or(u128::MAX);
    let base_ms = initial.as_millis().saturating_mul(mult);
    let capped_ms = std::cmp::min(base_ms, max.as_millis()) as u64;
    let jitter_cap = std::cmp::max(1, capped_ms / 4);
    let jitter_ms = pseudo_jitter_ms(jitter_cap);
    Duration::from_millis(capped_ms.saturating_add(jitter_ms))
}

fn pseudo_jitter_ms(max_inclusive: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let nanos = now.subsec_nanos() as u64;
    nanos % (max_inclusive + 1)
}

async fn read_limited_text(resp: reqwest::Response, max_bytes: usize) -> String {
    match resp.bytes().await {
        Ok(mut b) => {
            if b.len() > max_bytes {
                b.truncate(max_bytes);
            }
            String::from_utf8_lossy(&b).to_string()
        }
        Err(e) => {
            warn!(error = %e, "failed to read upstream error body");
            "<failed to read error body>".to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorEnvelope {
    error: OpenAiErrorObject,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorObject {
    message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChoice {
    pub message: ChatCompletionMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionMessage {
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    #[test]
    fn backoff_is_capped() {
        let delay = backoff_delay(Duration::from_millis(500), Duration::from_millis(1_000), 10);
        // cap plus at most 25% jitter
        assert!(delay >= Duration::from_millis(1_000));
        assert!(delay <= Duration::from_millis(1_250));
    }

    #[test]
    fn only_transient_upstream_errors_are_retried() {
        let overloaded = OpenAiClientError::Upstream {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "busy".to_string(),
        };
        let rejected = OpenAiClientError::Upstream {
            status: StatusCode::BAD_REQUEST,
            message: "bad model".to_string(),
        };
        assert!(should_retry(&overloaded));
        assert!(!should_retry(&rejected));
        assert!(!should_retry(&OpenAiClientError::EmptyReply));
    }

    #[test]
    fn reply_content_is_optional() {
        let json = r#"{"id": "x", "choices": [{"index": 0, "message": {"role": "assistant"}, "finish_reason": "stop"}]}"#;
        let response: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert!(response.choices[0].message.content.is_none());
    }

    #[test]
    fn request_serializes_two_turn_chat() {
        let request = ChatCompletionRequest {
            model: "codegemma".to_string(),
            messages: vec![Message::system("role"), Message::user("fix this")],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "fix this");
    }

    /// Answers every request with the same status and body, counting requests.
    async fn canned_upstream(status_line: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/v1", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                read_request(&mut stream).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (base_url, hits)
    }

    async fn read_request(stream: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let body_len = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    return;
                }
            }
        }
    }

    fn client_for(base_url: String) -> OpenAiClient {
        OpenAiClient::new(OpenAiClientConfig {
            base_url,
            default_timeout: Duration::from_secs(5),
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            max_error_body_bytes: 1024,
        })
        .unwrap()
    }

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "codegemma".to_string(),
            messages: vec![Message::user("fix this")],
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let (base_url, hits) =
            canned_upstream("503 Service Unavailable", r#"{"error": {"message": "busy"}}"#).await;

        let err = client_for(base_url).chat_completions(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            OpenAiClientError::Upstream { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_request_is_not_retried() {
        let (base_url, hits) =
            canned_upstream("400 Bad Request", r#"{"error": {"message": "bad model"}}"#).await;

        let err = client_for(base_url).chat_completions(&request()).await.unwrap_err();
        match err {
            OpenAiClientError::Upstream { status, message } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(message, "bad model");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn successful_reply_is_returned() {
        let (base_url, hits) = canned_upstream(
            "200 OK",
            r#"{"choices": [{"message": {"role": "assistant", "content": "Correct: [[<img alt=A>]]"}}]}"#,
        )
        .await;

        let model = OpenAiChatModel::new(Arc::new(client_for(base_url)), "codegemma");
        let reply = model.chat("system", "user").await.unwrap();
        assert_eq!(reply, "Correct: [[<img alt=A>]]");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
