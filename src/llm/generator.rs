//! Provider selection and degradation.
//!
//! The generator walks its provider chain in order and falls back to a
//! deterministic neutral reply when every provider fails or none is
//! configured. It never returns an error and never returns an empty string:
//! a broken reply is always preferable to a broken channel integration,
//! since webhook platforms retry-storm or disable endpoints on 5xx.

use log::{debug, warn};
use std::sync::Arc;

use crate::config::LlmConfig;

use super::anthropic::AnthropicClient;
use super::openai::OpenAiClient;
use super::{LlmError, LlmProvider, LlmRequest, PromptMessage, PromptRole};

/// Fixed prefix of the neutral fallback reply. Kept stable so operators can
/// spot degraded conversations in transcripts; adapters branch on the
/// [`GenerationResult::degraded`] flag, never on this text.
pub const NEUTRAL_FALLBACK_PREFIX: &str = "You said: ";

/// Warmer generic line for channels where an echo reads as broken.
pub const FRIENDLY_DEGRADED_REPLY: &str =
    "Thanks for your message! I'm having a little trouble thinking right now - please try again in a moment.";

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub degraded: bool,
    pub reason: Option<String>,
}

impl GenerationResult {
    fn normal(text: String) -> Self {
        Self {
            text,
            degraded: false,
            reason: None,
        }
    }

    fn fallback(last_user_text: &str, reason: String) -> Self {
        Self {
            text: format!("{NEUTRAL_FALLBACK_PREFIX}{last_user_text}"),
            degraded: true,
            reason: Some(reason),
        }
    }

    /// Text to deliver on channels that rewrite the neutral fallback.
    pub fn friendly_text(&self) -> &str {
        if self.degraded {
            FRIENDLY_DEGRADED_REPLY
        } else {
            &self.text
        }
    }
}

pub struct ResponseGenerator {
    providers: Vec<Arc<dyn LlmProvider>>,
    max_tokens: u32,
}

impl ResponseGenerator {
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();

        if let Some(key) = &config.openai_api_key {
            providers.push(Arc::new(OpenAiClient::new(
                key.clone(),
                config.openai_base_url.clone(),
                config.openai_model.clone(),
                config.request_timeout,
            )));
        }
        if let Some(key) = &config.anthropic_api_key {
            providers.push(Arc::new(AnthropicClient::new(
                key.clone(),
                config.anthropic_model.clone(),
                config.request_timeout,
            )));
        }

        Self {
            providers,
            max_tokens: config.max_tokens,
        }
    }

    pub fn with_providers(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        Self {
            providers,
            max_tokens: 1000,
        }
    }

    pub fn disabled() -> Self {
        Self {
            providers: Vec::new(),
            max_tokens: 1000,
        }
    }

    /// Produce a reply for the given context. `messages` must end with a
    /// user turn; a misordered context is a caller bug, handled defensively
    /// in release builds by falling back to the last user turn found.
    pub async fn generate(
        &self,
        messages: Vec<PromptMessage>,
        temperature: f64,
        model: Option<String>,
    ) -> GenerationResult {
        debug_assert!(
            matches!(messages.last(), Some(m) if m.role == PromptRole::User),
            "generation context must end with a user turn"
        );

        let last_user_text = messages
            .iter()
            .rev()
            .find(|m| m.role == PromptRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if self.providers.is_empty() {
            return GenerationResult::fallback(&last_user_text, "no provider configured".into());
        }

        let request = LlmRequest {
            messages,
            temperature,
            model,
            max_tokens: self.max_tokens,
        };

        let mut last_error = String::new();
        for provider in &self.providers {
            match provider.generate(&request).await {
                Ok(text) => {
                    debug!("reply generated by {}", provider.name());
                    return GenerationResult::normal(text);
                }
                Err(e @ LlmError::Rejected { .. }) => {
                    // Misconfigured key or malformed request: trying the
                    // same provider again cannot help.
                    warn!("{} rejected the request, falling back: {e}", provider.name());
                    last_error = e.to_string();
                }
                Err(e) => {
                    warn!("{} failed, falling back: {e}", provider.name());
                    last_error = e.to_string();
                }
            }
        }

        GenerationResult::fallback(&last_user_text, last_error)
    }
}
