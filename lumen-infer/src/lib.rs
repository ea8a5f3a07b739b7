use std::sync::Arc;

use async_trait::async_trait;
use lumen_types::DataContext;
use thiserror::Error;

pub mod http;
pub use http::{Backend, HttpChatModel, ModelConfig};

/// Reply shown when the model could not be reached or answered nonsense.
pub const FALLBACK_REPLY: &str = "I encountered an error analyzing the data. Please try again.";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no API credential configured")]
    MissingCredential,
    #[error("HTTP client setup failed: {0}")]
    Client(String),
    #[error("HTTP error: {0}")]
    Network(String),
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed model reply: {0}")]
    MalformedReply(String),
    #[error("no model available")]
    Unavailable,
}

/// A chat-completion backend answering one single-turn prompt.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Backend that never answers.
pub struct NullChatModel;

#[async_trait]
impl ChatModel for NullChatModel {
    async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
        Err(ModelError::Unavailable)
    }
}

/// Turns a question plus data context into one model call.
///
/// `ask` is total: every failure comes back as [`FALLBACK_REPLY`].
pub struct ModelClient {
    model: Arc<dyn ChatModel>,
    pre_prompt: Option<String>,
}

impl ModelClient {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            pre_prompt: None,
        }
    }

    /// Fixed preamble placed before every prompt. Blank preambles are ignored.
    pub fn with_pre_prompt(mut self, pre_prompt: impl Into<String>) -> Self {
        let pre_prompt = pre_prompt.into();
        self.pre_prompt = (!pre_prompt.trim().is_empty()).then_some(pre_prompt);
        self
    }

    pub fn render_prompt(&self, question: &str, context: &DataContext) -> String {
        let mut prompt = String::new();
        if let Some(pre) = &self.pre_prompt {
            prompt.push_str(pre.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str("Given this data context: ");
        prompt.push_str(&compact_json(&context.fields));
        if !context.objects.is_empty() {
            prompt.push_str("\n\nDashboard objects: ");
            prompt.push_str(&compact_json(&context.objects));
        }
        prompt.push_str("\n\nQuestion: ");
        prompt.push_str(question);
        prompt.push_str("\n\nProvide a detailed analysis and answer.");
        prompt
    }

    pub async fn ask(&self, question: &str, context: &DataContext) -> String {
        let prompt = self.render_prompt(question, context);
        tracing::debug!(prompt_len = prompt.len(), "sending prompt to model");
        match self.model.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "model call failed; using fallback reply");
                FALLBACK_REPLY.to_string()
            }
        }
    }
}

fn compact_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".into())
}
