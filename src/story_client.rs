use async_trait::async_trait;
use serde::Serialize;

/// One chat-completion call for the story outline.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoryClientError {
    #[error("story endpoint returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("story request failed: {0}")]
    Transport(String),
    #[error("story response has no message content")]
    EmptyContent,
    #[error("story response is malformed: {0}")]
    Malformed(String),
}

impl StoryClientError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status: 429, .. })
    }
}

/// Sends exactly one request per call; retry and model fallback belong to
/// the caller.
#[async_trait]
pub trait StoryTextClient: Send + Sync {
    async fn complete(&self, request: &StoryRequest) -> Result<String, StoryClientError>;
}

pub fn chat_completions_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/chat/completions")
}

#[derive(Debug, Clone)]
pub struct HttpStoryTextClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpStoryTextClient {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: chat_completions_endpoint(base_url),
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[async_trait]
impl StoryTextClient for HttpStoryTextClient {
    async fn complete(&self, request: &StoryRequest) -> Result<String, StoryClientError> {
        let body = ChatBody {
            model: &request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| StoryClientError::Transport(format!("POST {}: {err}", self.endpoint)))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| StoryClientError::Transport(format!("read response body: {err}")))?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            return Err(StoryClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|err| StoryClientError::Malformed(err.to_string()))?;
        extract_message_content(&value)
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let error = value.get("error")?;
    if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
        return Some(message.to_owned());
    }
    error.as_str().map(str::to_owned)
}

fn extract_message_content(value: &serde_json::Value) -> Result<String, StoryClientError> {
    let content = value
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .ok_or(StoryClientError::EmptyContent)?;
    if content.trim().is_empty() {
        return Err(StoryClientError::EmptyContent);
    }
    Ok(content.to_owned())
}
