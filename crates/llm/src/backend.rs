//! The upstream LLM is consumed through a minimal trait so the engine has
//! no vendor coupling (§4.5) — the same shape as the STT/TTS "duck-typed
//! upstream SDK" pattern. `HttpLlmBackend` is the one concrete adapter,
//! talking SSE to any OpenAI-compatible chat completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use gateway_core::Turn;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{LlmError, Result};

/// One token (or the final sentinel) surfaced while streaming a generation.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Token(String),
    Done,
}

/// A vendor-agnostic upstream chat backend.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Stream a completion for `history`, sending tokens to `tx` as they
    /// arrive. Returns the full accumulated text on success.
    async fn generate_stream(&self, history: &[Turn], tx: mpsc::Sender<StreamEvent>) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct HttpLlmConfig {
    pub upstream_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

impl From<&gateway_config::LlmConfig> for HttpLlmConfig {
    fn from(config: &gateway_config::LlmConfig) -> Self {
        Self {
            upstream_url: config.upstream_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            max_retries: config.max_retries,
        }
    }
}

/// SSE-streaming chat completions backend for any OpenAI-compatible server.
pub struct HttpLlmBackend {
    config: HttpLlmConfig,
    client: Client,
}

impl HttpLlmBackend {
    pub fn new(config: HttpLlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| LlmError::Configuration(format!("failed to build http client: {err}")))?;
        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.upstream_url.trim_end_matches('/'))
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if !self.config.api_key.is_empty() {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", self.config.api_key)) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        headers
    }

    async fn attempt(&self, history: &[Turn], tx: &mpsc::Sender<StreamEvent>) -> Result<String> {
        let messages: Vec<ChatMessage> = history
            .iter()
            .map(|turn| ChatMessage {
                role: turn.role.as_str().to_string(),
                content: turn.content.clone(),
            })
            .collect();

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            top_p: Some(self.config.top_p),
            frequency_penalty: Some(self.config.frequency_penalty),
            presence_penalty: Some(self.config.presence_penalty),
            stream: true,
        };

        let response = self
            .client
            .post(self.chat_url())
            .headers(self.headers())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return if status.is_server_error() {
                Err(LlmError::Network(format!("upstream {status}: {body}")))
            } else {
                Err(LlmError::Api(format!("upstream {status}: {body}")))
            };
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() {
                    continue;
                }
                if line == "data: [DONE]" {
                    let _ = tx.send(StreamEvent::Done).await;
                    return Ok(full_text);
                }
                let Some(json_str) = line.strip_prefix("data: ") else {
                    continue;
                };
                let parsed: StreamChunk = serde_json::from_str(json_str)
                    .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
                if let Some(choice) = parsed.choices.first() {
                    if let Some(content) = choice.delta.content.as_ref() {
                        full_text.push_str(content);
                        let _ = tx.send(StreamEvent::Token(content.clone())).await;
                    }
                }
            }
        }

        let _ = tx.send(StreamEvent::Done).await;
        Ok(full_text)
    }

    fn is_retryable(err: &LlmError) -> bool {
        matches!(err, LlmError::Network(_) | LlmError::Timeout)
    }
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    async fn generate_stream(&self, history: &[Turn], tx: mpsc::Sender<StreamEvent>) -> Result<String> {
        let mut backoff = Duration::from_millis(150);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(attempt, max = self.config.max_retries, "retrying upstream llm request");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(5));
            }

            match self.attempt(history, &tx).await {
                Ok(text) => return Ok(text),
                Err(err) if Self::is_retryable(&err) => last_error = Some(err),
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or(LlmError::Network("max retries exceeded".to_string())))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_url_strips_trailing_slash() {
        let config = HttpLlmConfig {
            upstream_url: "https://upstream.example/v1/".to_string(),
            api_key: String::new(),
            model: "test".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 256,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            request_timeout: Duration::from_secs(30),
            max_retries: 2,
        };
        let backend = HttpLlmBackend::new(config).unwrap();
        assert_eq!(backend.chat_url(), "https://upstream.example/v1/chat/completions");
    }

    #[test]
    fn retryable_errors_are_network_and_timeout() {
        assert!(HttpLlmBackend::is_retryable(&LlmError::Network("x".into())));
        assert!(HttpLlmBackend::is_retryable(&LlmError::Timeout));
        assert!(!HttpLlmBackend::is_retryable(&LlmError::Api("x".into())));
    }

    #[test]
    fn stream_chunk_parses_delta_content() {
        let json = r#"{"choices":[{"delta":{"content":"hi"}}]}"#;
        let parsed: StreamChunk = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("hi"));
    }
}
