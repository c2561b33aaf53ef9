//! Upstream language-model providers behind one call contract.

use async_trait::async_trait;
use thiserror::Error;

pub mod anthropic;
pub mod generator;
pub mod openai;

pub use generator::{GenerationResult, ResponseGenerator, NEUTRAL_FALLBACK_PREFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of generation context. System turns are synthesized at call
/// time and never persisted.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub messages: Vec<PromptMessage>,
    pub temperature: f64,
    /// Provider-specific model override; the provider default applies when
    /// unset.
    pub model: Option<String>,
    pub max_tokens: u32,
}

#[derive(Debug, Error)]
pub enum LlmError {
    /// 400/401-class rejection: bad key, malformed request. Not retryable
    /// against the same provider.
    #[error("provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Network failure, timeout, 5xx. The provider may recover later.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// 2xx with a body we cannot make sense of.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl LlmError {
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 400 || status == 401 {
            Self::Rejected {
                status,
                message: body,
            }
        } else {
            Self::Unavailable(format!("HTTP {status}: {body}"))
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &LlmRequest) -> Result<String, LlmError>;
}
