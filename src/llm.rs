//! OpenAI-compatible chat completion client.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Replies this short that contain one of these markers are treated as refusals and retried.
const REFUSAL_MARKERS: &[&str] = &["sorry", "apologize", "cannot", "can't", "error"];
const REFUSAL_MAX_CHARS: usize = 80;

#[derive(Clone)]
pub struct Client {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub image: Option<Image>,
}

/// Inline image attached to a user message (vision).
#[derive(Debug, Clone)]
pub struct Image {
    pub data: Vec<u8>,
    pub media_type: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), image: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), image: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), image: None }
    }

    pub fn with_image(mut self, data: Vec<u8>, media_type: impl Into<String>) -> Self {
        self.image = Some(Image { data, media_type: media_type.into() });
        self
    }

    fn to_api(&self) -> Value {
        match self.image {
            Some(ref image) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&image.data);
                json!({
                    "role": self.role.as_str(),
                    "content": [
                        { "type": "text", "text": self.content },
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:{};base64,{}", image.media_type, encoded) }
                        }
                    ]
                })
            }
            None => json!({ "role": self.role.as_str(), "content": self.content }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// Small, fast model for routing, extraction and translation.
    Mini,
    /// Larger model for conversation, vision and commentary.
    Full,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Mini => "gpt-4o-mini",
            Model::Full => "gpt-4o",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: Model,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: Model, messages: Vec<Message>) -> Self {
        Self { model, messages, temperature: None }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Anything that can answer a chat completion request.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, Error>;
}

#[derive(Serialize)]
struct ApiRequest {
    model: &'static str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl Client {
    pub fn new(api_key: String, http: reqwest::Client) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Authorized POST to `{base_url}{path}`.
    pub(crate) fn post(&self, path: &str) -> Result<reqwest::RequestBuilder, Error> {
        if self.api_key.is_empty() {
            return Err(Error::MissingKey);
        }
        Ok(self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key))
    }
}

#[async_trait]
impl ChatModel for Client {
    async fn complete(&self, request: &ChatRequest) -> Result<String, Error> {
        let body = ApiRequest {
            model: request.model.as_str(),
            messages: request.messages.iter().map(Message::to_api).collect(),
            temperature: request.temperature,
        };

        debug!("Chat request: model={} messages={}", body.model, body.messages.len());

        let response = self
            .post("/chat/completions")?
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(Error::Empty)
    }
}

/// Fixed-attempt linear backoff for chat completions.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

fn looks_like_refusal(reply: &str) -> bool {
    if reply.chars().count() >= REFUSAL_MAX_CHARS {
        return false;
    }
    let lower = reply.to_lowercase();
    REFUSAL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Call the model, retrying errors and short refusals with `attempt × base_delay` sleeps.
///
/// Never fails: after the last attempt the last error is returned as text.
pub async fn complete_with_retries(model: &dyn ChatModel, request: &ChatRequest, policy: RetryPolicy) -> String {
    let mut last_error: Option<String> = None;

    for attempt in 1..=policy.attempts {
        match model.complete(request).await {
            Ok(reply) => {
                if looks_like_refusal(&reply) && attempt < policy.attempts {
                    warn!("Refusal-looking reply on attempt {attempt}, retrying");
                    tokio::time::sleep(policy.base_delay * attempt).await;
                    continue;
                }
                return reply;
            }
            Err(e) => {
                warn!("Chat attempt {attempt}/{} failed: {e}", policy.attempts);
                last_error = Some(e.to_string());
                if attempt < policy.attempts {
                    tokio::time::sleep(policy.base_delay * attempt).await;
                }
            }
        }
    }

    last_error.unwrap_or_else(|| "The request could not be completed.".to_string())
}

#[derive(Debug)]
pub enum Error {
    MissingKey,
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MissingKey => write!(f, "LLM API key is not configured"),
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}
