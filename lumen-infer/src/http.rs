use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ChatModel, ModelError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Wire shape of the chat API.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Message API: `x-api-key` auth, reply in `content[0].text`.
    #[default]
    Messages,
    /// Chat-completion API: bearer auth, reply in `choices[0].message.content`.
    ChatCompletions,
}

impl Backend {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Backend::Messages => "https://api.anthropic.com/v1/messages",
            Backend::ChatCompletions => "https://api.openai.com/v1/chat/completions",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Backend::Messages => "claude-3-opus-20240229",
            Backend::ChatCompletions => "gpt-4o",
        }
    }

    /// Extract the reply text from a response body of this shape.
    pub fn normalize(self, body: &[u8]) -> Result<String, ModelError> {
        let text = match self {
            Backend::Messages => messages_text(body)?,
            Backend::ChatCompletions => chat_completion_text(body)?,
        };
        if text.trim().is_empty() {
            return Err(ModelError::MalformedReply("empty reply text".into()));
        }
        Ok(text)
    }
}

/// Model endpoint settings. The credential is supplied separately.
#[derive(Clone, Debug, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            endpoint: None,
            model: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ModelConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.backend.default_endpoint())
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.backend.default_model())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesReply {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionReply {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn messages_text(body: &[u8]) -> Result<String, ModelError> {
    let reply: MessagesReply =
        serde_json::from_slice(body).map_err(|e| ModelError::MalformedReply(e.to_string()))?;
    reply
        .content
        .into_iter()
        .next()
        .and_then(|block| block.text)
        .ok_or_else(|| ModelError::MalformedReply("no text in first content block".into()))
}

fn chat_completion_text(body: &[u8]) -> Result<String, ModelError> {
    let reply: ChatCompletionReply =
        serde_json::from_slice(body).map_err(|e| ModelError::MalformedReply(e.to_string()))?;
    reply
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ModelError::MalformedReply("no content in first choice".into()))
}

/// HTTP chat model speaking either backend shape.
pub struct HttpChatModel {
    client: reqwest::Client,
    config: ModelConfig,
    api_key: String,
}

impl HttpChatModel {
    pub fn new(config: ModelConfig, api_key: impl Into<String>) -> Result<Self, ModelError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ModelError::MissingCredential);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelError::Client(e.to_string()))?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let body = ChatRequest {
            model: self.config.model(),
            max_tokens: self.config.max_tokens,
            messages: vec![WireMessage {
                role: "user",
                content: prompt,
            }],
        };

        let request = self.client.post(self.config.endpoint()).json(&body);
        let request = match self.config.backend {
            Backend::Messages => request
                .header("x-api-key", self.api_key.as_str())
                .header("anthropic-version", ANTHROPIC_VERSION),
            Backend::ChatCompletions => request.bearer_auth(&self.api_key),
        };

        let resp = request
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;
        self.config.backend.normalize(&bytes)
    }
}
