//! Telegram channel adapter.
//!
//! Inbound: Bot API update payloads delivered to the per-agent webhook.
//! Outbound: `sendMessage` with the bot token stored in the channel config.
//! Webhook activation (`setWebhook`) and token validation (`getMe`) are
//! separate idempotent operations with precise error text, since a bad bot
//! token is the most common misconfiguration.

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::channels::{run_turn, AgentQuery, HistorySource, InboundTurn};
use crate::error::RelayError;
use crate::shared::models::{ChannelConfig, Platform};
use crate::shared::state::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub edited_message: Option<TelegramMessage>,
    #[serde(default)]
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub data: Option<String>,
}

/// Outbound Bot API surface, kept behind a trait so tests inject a
/// recording double.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    async fn send_message(&self, token: &str, chat_id: i64, text: &str) -> Result<(), RelayError>;

    async fn set_webhook(&self, token: &str, url: &str) -> Result<(), RelayError>;

    /// Returns the bot username on success.
    async fn get_me(&self, token: &str) -> Result<String, RelayError>;
}

const INVALID_TOKEN_HINT: &str =
    "Telegram rejected the request: invalid bot token - regenerate it with @BotFather";

pub struct BotApi {
    client: reqwest::Client,
    base_url: String,
}

impl BotApi {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: "https://api.telegram.org".to_string(),
        }
    }

    fn classify(status: reqwest::StatusCode, body: &str) -> RelayError {
        // Telegram answers 401 (and 404 for a token of the wrong shape) on
        // bad credentials.
        if status.as_u16() == 401 || status.as_u16() == 404 {
            RelayError::Unauthorized(INVALID_TOKEN_HINT.to_string())
        } else {
            RelayError::Upstream(format!("Telegram API returned {status}: {body}"))
        }
    }
}

#[async_trait]
impl TelegramApi for BotApi {
    async fn send_message(&self, token: &str, chat_id: i64, text: &str) -> Result<(), RelayError> {
        let response = self
            .client
            .post(format!("{}/bot{token}/sendMessage", self.base_url))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body));
        }
        Ok(())
    }

    async fn set_webhook(&self, token: &str, url: &str) -> Result<(), RelayError> {
        let response = self
            .client
            .post(format!("{}/bot{token}/setWebhook", self.base_url))
            .json(&json!({ "url": url }))
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body));
        }
        Ok(())
    }

    async fn get_me(&self, token: &str) -> Result<String, RelayError> {
        let response = self
            .client
            .get(format!("{}/bot{token}/getMe", self.base_url))
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Ok(body["result"]["username"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBody {
    pub agent_id: Uuid,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/telegram/webhook", post(handle_webhook))
        .route("/telegram/activate", post(activate_webhook))
        .route("/telegram/validate", post(validate_token))
}

async fn require_config(
    state: &AppState,
    agent_id: Uuid,
) -> Result<ChannelConfig, RelayError> {
    state
        .channel_configs
        .config_for(agent_id, Platform::Telegram)
        .await?
        .ok_or(RelayError::ConfigNotFound {
            agent_id,
            platform: Platform::Telegram.to_string(),
        })
}

/// Webhook entrypoint. Config and agent lookups fail loudly (an operator is
/// wiring things up); per-update processing failures are logged and the
/// delivery is still acknowledged, because Telegram's retry semantics for
/// non-200 responses are coarser than anything this system wants.
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AgentQuery>,
    Json(update): Json<TelegramUpdate>,
) -> Result<Json<Value>, RelayError> {
    debug!("telegram update {} for agent {}", update.update_id, query.agent_id);
    let config = require_config(&state, query.agent_id).await?;

    if let Some(message) = update.message.or(update.edited_message) {
        if let Err(e) = process_message(&state, &config, &message).await {
            error!("failed to process telegram message: {e}");
        }
    }

    if let Some(callback) = update.callback_query {
        if let Err(e) = process_callback(&state, &config, &callback).await {
            error!("failed to process telegram callback: {e}");
        }
    }

    Ok(Json(json!({ "ok": true })))
}

async fn process_message(
    state: &AppState,
    config: &ChannelConfig,
    message: &TelegramMessage,
) -> Result<(), RelayError> {
    let Some(from) = &message.from else {
        return Ok(());
    };
    if from.is_bot {
        debug!("ignoring update from bot account {}", from.id);
        return Ok(());
    }

    let text = message
        .text
        .as_deref()
        .or(message.caption.as_deref())
        .unwrap_or("");
    if text.is_empty() {
        return Ok(());
    }

    let mut turn = InboundTurn::new(
        config.agent_id,
        &format!("telegram_{}", from.id),
        Platform::Telegram,
        text,
    );
    turn.metadata = Some(json!({
        "platform": "telegram",
        "chat_id": message.chat.id,
        "username": from.username.clone(),
    }));
    turn.friendly_degrade = true;

    let outcome = run_turn(state, turn).await?;
    deliver(state, config, message.chat.id, &outcome.reply).await;
    Ok(())
}

/// Callback-query payloads are treated as the message text; history is not
/// replayed for them.
async fn process_callback(
    state: &AppState,
    config: &ChannelConfig,
    callback: &TelegramCallbackQuery,
) -> Result<(), RelayError> {
    if callback.from.is_bot {
        return Ok(());
    }
    let Some(chat_id) = callback.message.as_ref().map(|m| m.chat.id) else {
        return Ok(());
    };
    let Some(data) = callback.data.as_deref().filter(|d| !d.is_empty()) else {
        return Ok(());
    };

    let mut turn = InboundTurn::new(
        config.agent_id,
        &format!("telegram_{}", callback.from.id),
        Platform::Telegram,
        data,
    );
    turn.history = HistorySource::None;
    turn.friendly_degrade = true;

    let outcome = run_turn(state, turn).await?;
    deliver(state, config, chat_id, &outcome.reply).await;
    Ok(())
}

/// Outbound delivery failures do not fail the webhook: the conversation is
/// already durably persisted either way.
async fn deliver(state: &AppState, config: &ChannelConfig, chat_id: i64, reply: &str) {
    if let Err(e) = state
        .telegram
        .send_message(&config.credential, chat_id, reply)
        .await
    {
        error!("telegram send to chat {chat_id} failed: {e}");
    }
}

/// Register the webhook callback URL with Telegram. Idempotent: setWebhook
/// overwrites any previous registration.
pub async fn activate_webhook(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AgentBody>,
) -> Result<Json<Value>, RelayError> {
    let config = require_config(&state, body.agent_id).await?;

    let url = match &config.webhook_url {
        Some(url) if !url.is_empty() => url.clone(),
        _ => format!(
            "{}/telegram/webhook?agentId={}",
            state.config.server.public_base_url, body.agent_id
        ),
    };

    state.telegram.set_webhook(&config.credential, &url).await?;
    info!("telegram webhook registered for agent {}: {url}", body.agent_id);
    Ok(Json(json!({ "ok": true, "webhookUrl": url })))
}

/// Lightweight token sanity check against getMe.
pub async fn validate_token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AgentBody>,
) -> Result<Json<Value>, RelayError> {
    let config = require_config(&state, body.agent_id).await?;
    let username = state.telegram.get_me(&config.credential).await?;
    Ok(Json(json!({ "ok": true, "botUsername": username })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::PromptRole;
    use crate::shared::state::test_support::{
        state_with_agent, state_with_agent_and_provider, telegram_config,
    };
    use std::sync::atomic::Ordering;

    fn text_update(from_id: i64, chat_id: i64, text: &str, is_bot: bool) -> TelegramUpdate {
        TelegramUpdate {
            update_id: 1,
            message: Some(TelegramMessage {
                message_id: 10,
                from: Some(TelegramUser {
                    id: from_id,
                    is_bot,
                    first_name: "Ada".into(),
                    last_name: None,
                    username: Some("ada".into()),
                }),
                chat: TelegramChat {
                    id: chat_id,
                    chat_type: "private".into(),
                },
                date: 0,
                text: Some(text.into()),
                caption: None,
            }),
            edited_message: None,
            callback_query: None,
        }
    }

    #[tokio::test]
    async fn new_user_creates_session_and_sends_once() {
        let (ctx, agent) = state_with_agent().await;
        ctx.store.insert_config(telegram_config(agent.id)).await;

        let response = handle_webhook(
            State(ctx.app.clone()),
            Query(AgentQuery { agent_id: agent.id }),
            Json(text_update(555, 900, "hi", false)),
        )
        .await
        .unwrap();
        assert_eq!(response.0["ok"], true);

        let sessions = ctx.store.all_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].external_user_id, "telegram_555");
        assert_eq!(ctx.store.message_count(sessions[0].id).await, 2);

        let sent = ctx.telegram.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, 900);
        assert_eq!(sent[0].0, "tg-bot-token");
    }

    #[tokio::test]
    async fn bot_accounts_are_ignored() {
        let (ctx, agent) = state_with_agent().await;
        ctx.store.insert_config(telegram_config(agent.id)).await;

        let _ = handle_webhook(
            State(ctx.app.clone()),
            Query(AgentQuery { agent_id: agent.id }),
            Json(text_update(555, 900, "hi", true)),
        )
        .await
        .unwrap();

        assert_eq!(ctx.store.session_count().await, 0);
        assert!(ctx.telegram.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn missing_config_is_404() {
        let (ctx, agent) = state_with_agent().await;
        let err = handle_webhook(
            State(ctx.app.clone()),
            Query(AgentQuery { agent_id: agent.id }),
            Json(text_update(555, 900, "hi", false)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RelayError::ConfigNotFound { .. }));
    }

    #[tokio::test]
    async fn callback_query_skips_history_replay() {
        let (ctx, agent, provider) = state_with_agent_and_provider().await;
        ctx.store.insert_config(telegram_config(agent.id)).await;

        // Seed prior turns through a normal message.
        let _ = handle_webhook(
            State(ctx.app.clone()),
            Query(AgentQuery { agent_id: agent.id }),
            Json(text_update(555, 900, "first", false)),
        )
        .await
        .unwrap();

        let callback = TelegramUpdate {
            update_id: 2,
            message: None,
            edited_message: None,
            callback_query: Some(TelegramCallbackQuery {
                id: "cb1".into(),
                from: TelegramUser {
                    id: 555,
                    is_bot: false,
                    first_name: "Ada".into(),
                    last_name: None,
                    username: None,
                },
                message: Some(TelegramMessage {
                    message_id: 11,
                    from: None,
                    chat: TelegramChat {
                        id: 900,
                        chat_type: "private".into(),
                    },
                    date: 0,
                    text: None,
                    caption: None,
                }),
                data: Some("option_a".into()),
            }),
        };
        let _ = handle_webhook(
            State(ctx.app.clone()),
            Query(AgentQuery { agent_id: agent.id }),
            Json(callback),
        )
        .await
        .unwrap();

        let requests = provider.requests();
        let last = requests.last().unwrap();
        let user_turns: Vec<&str> = last
            .messages
            .iter()
            .filter(|m| m.role == PromptRole::User)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(user_turns, vec!["option_a"]);
    }

    #[tokio::test]
    async fn send_failure_still_acknowledges_webhook() {
        let (ctx, agent) = state_with_agent().await;
        ctx.store.insert_config(telegram_config(agent.id)).await;
        ctx.telegram.fail_sends.store(true, Ordering::SeqCst);

        let response = handle_webhook(
            State(ctx.app.clone()),
            Query(AgentQuery { agent_id: agent.id }),
            Json(text_update(555, 900, "hi", false)),
        )
        .await
        .unwrap();
        assert_eq!(response.0["ok"], true);

        // Conversation state is durable regardless of delivery.
        let sessions = ctx.store.all_sessions().await;
        assert_eq!(ctx.store.message_count(sessions[0].id).await, 2);
    }

    #[tokio::test]
    async fn activation_surfaces_invalid_token_precisely() {
        let (ctx, agent) = state_with_agent().await;
        ctx.store.insert_config(telegram_config(agent.id)).await;
        ctx.telegram.reject_token.store(true, Ordering::SeqCst);

        let err = activate_webhook(
            State(ctx.app.clone()),
            Json(AgentBody { agent_id: agent.id }),
        )
        .await
        .unwrap_err();
        match err {
            RelayError::Unauthorized(message) => {
                assert!(message.contains("bot token"));
                assert!(message.contains("@BotFather"));
            }
            other => panic!("expected Unauthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn activation_registers_derived_url() {
        let (ctx, agent) = state_with_agent().await;
        ctx.store.insert_config(telegram_config(agent.id)).await;

        let response = activate_webhook(
            State(ctx.app.clone()),
            Json(AgentBody { agent_id: agent.id }),
        )
        .await
        .unwrap();
        assert_eq!(response.0["ok"], true);

        let webhooks = ctx.telegram.webhooks.lock().unwrap().clone();
        assert_eq!(webhooks.len(), 1);
        assert!(webhooks[0].1.contains("/telegram/webhook?agentId="));
    }
}
