use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{LlmError, LlmProvider, LlmRequest, PromptRole};

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, default_model: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key,
            base_url: "https://api.anthropic.com/v1".to_string(),
            default_model,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn generate(&self, request: &LlmRequest) -> Result<String, LlmError> {
        // The messages API takes system text as a top-level field, not as a
        // message turn.
        let system: String = request
            .messages
            .iter()
            .filter(|m| m.role == PromptRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != PromptRole::System)
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), body));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        result["content"][0]["text"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::Malformed("no text block in response".to_string()))
    }
}
