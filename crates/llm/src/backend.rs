//! HTTP generation backend: an OpenAI-compatible chat-completions client.
//!
//! Retains the teacher's retry-with-backoff and SSE-streaming idiom, trimmed
//! of Ollama-specific KV-cache/session-context bookkeeping (no analogue in
//! this orchestrator's single-shot-per-turn generation model) and wired to
//! `eloquence_core::CancellationHandle` so a barge-in can abort generation
//! mid-stream (spec §4.8).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use eloquence_core::CancellationHandle;

use crate::prompt::Message;
use crate::LlmError;

#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1".to_string(),
            api_key: None,
            model: "llama-3".to_string(),
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub tokens: usize,
    pub time_to_first_token_ms: u64,
    pub total_time_ms: u64,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Cancelled,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        cancellation: CancellationHandle,
    ) -> Result<GenerationResult, LlmError>;

    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
        cancellation: CancellationHandle,
    ) -> Result<GenerationResult, LlmError>;

    async fn is_available(&self) -> bool;

    fn model_name(&self) -> &str;
}

pub struct OpenAIBackend {
    config: LlmClientConfig,
    client: Client,
}

impl OpenAIBackend {
    pub fn new(config: LlmClientConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn build_headers(&self) -> reqwest::header::HeaderMap {
        use reqwest::header::HeaderValue;
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(ref key) = self.config.api_key {
            if let Ok(val) = HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert(reqwest::header::AUTHORIZATION, val);
            }
        }
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers
    }

    fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage { role: m.role.to_string(), content: m.content.clone() })
            .collect()
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_) | LlmError::Timeout)
    }

    async fn execute_request(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let response = self
            .client
            .post(self.chat_url())
            .headers(self.build_headers())
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {status}: {body}")));
            }
            return Err(LlmError::Api(format!("http {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LlmBackend for OpenAIBackend {
    async fn generate(
        &self,
        messages: &[Message],
        mut cancellation: CancellationHandle,
    ) -> Result<GenerationResult, LlmError> {
        let start = std::time::Instant::now();
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: Self::to_wire_messages(messages),
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            top_p: Some(self.config.top_p),
            stream: Some(false),
        };

        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if cancellation.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            if attempt > 0 {
                tracing::warn!(attempt, ?backoff, "llm request failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancellation.cancelled() => return Err(LlmError::Cancelled),
                }
                backoff *= 2;
            }

            match self.execute_request(&request).await {
                Ok(response) => {
                    let choice = response
                        .choices
                        .first()
                        .ok_or_else(|| LlmError::InvalidResponse("no choices in response".into()))?;
                    let total_time_ms = start.elapsed().as_millis() as u64;
                    let tokens = response.usage.map(|u| u.completion_tokens).unwrap_or(0);
                    return Ok(GenerationResult {
                        text: choice.message.content.clone(),
                        tokens,
                        time_to_first_token_ms: total_time_ms,
                        total_time_ms,
                        finish_reason: match choice.finish_reason.as_deref() {
                            Some("length") => FinishReason::Length,
                            _ => FinishReason::Stop,
                        },
                    });
                }
                Err(e) if Self::is_retryable(&e) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(LlmError::Network("max retries exceeded".into())))
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
        mut cancellation: CancellationHandle,
    ) -> Result<GenerationResult, LlmError> {
        use futures::StreamExt;

        let start = std::time::Instant::now();
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: Self::to_wire_messages(messages),
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            top_p: Some(self.config.top_p),
            stream: Some(true),
        };

        let response = self
            .client
            .post(self.chat_url())
            .headers(self.build_headers())
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(body));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();
        let mut first_token_time = None;
        let mut tokens = 0usize;

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancellation.cancelled() => {
                    return Ok(GenerationResult {
                        text: full_text,
                        tokens,
                        time_to_first_token_ms: first_token_time.unwrap_or(0),
                        total_time_ms: start.elapsed().as_millis() as u64,
                        finish_reason: FinishReason::Cancelled,
                    });
                }
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();
                if line.is_empty() || line == "data: [DONE]" {
                    continue;
                }
                let Some(json_str) = line.strip_prefix("data: ") else { continue };
                if let Ok(parsed) = serde_json::from_str::<StreamChunk>(json_str) {
                    if let Some(choice) = parsed.choices.first() {
                        if let Some(content) = choice.delta.as_ref().and_then(|d| d.content.clone()) {
                            if first_token_time.is_none() {
                                first_token_time = Some(start.elapsed().as_millis() as u64);
                            }
                            full_text.push_str(&content);
                            tokens += 1;
                            if tx.send(content).await.is_err() {
                                return Ok(GenerationResult {
                                    text: full_text,
                                    tokens,
                                    time_to_first_token_ms: first_token_time.unwrap_or(0),
                                    total_time_ms: start.elapsed().as_millis() as u64,
                                    finish_reason: FinishReason::Cancelled,
                                });
                            }
                        }
                    }
                }
            }
        }

        Ok(GenerationResult {
            text: full_text,
            tokens,
            time_to_first_token_ms: first_token_time.unwrap_or(0),
            total_time_ms: start.elapsed().as_millis() as u64,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        self.client
            .get(url)
            .headers(self.build_headers())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}
