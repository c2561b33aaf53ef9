//! Messenger/WhatsApp (Meta) channel adapter.
//!
//! One webhook URL serves both platforms. GET handles the subscription
//! verification handshake; POST carries event envelopes whose entries are
//! classified per entry (payloads can mix Messenger and WhatsApp shapes in
//! one delivery), and a failing entry never aborts the others.

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::channels::{run_turn, AgentQuery, InboundTurn};
use crate::error::RelayError;
use crate::shared::models::{ChannelConfig, Platform};
use crate::shared::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "agentId")]
    pub agent_id: Uuid,
    #[serde(rename = "hub.mode")]
    pub hub_mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub hub_verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub hub_challenge: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MetaEnvelope {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<MetaEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MetaEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub messaging: Option<Vec<MessengerEvent>>,
    #[serde(default)]
    pub changes: Option<Vec<WhatsAppChange>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MessengerEvent {
    #[serde(default)]
    pub sender: Option<MessengerParty>,
    #[serde(default)]
    pub message: Option<MessengerMessage>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MessengerParty {
    pub id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MessengerMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub is_echo: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppChange {
    pub value: WhatsAppValue,
    #[serde(default)]
    pub field: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppValue {
    #[serde(default)]
    pub metadata: Option<WhatsAppMetadata>,
    #[serde(default)]
    pub messages: Option<Vec<WhatsAppInbound>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppMetadata {
    #[serde(default)]
    pub display_phone_number: Option<String>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppInbound {
    pub from: String,
    #[serde(rename = "type", default)]
    pub msg_type: String,
    #[serde(default)]
    pub text: Option<WhatsAppText>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppText {
    pub body: String,
}

/// Per-entry shape discriminator. Entries are classified once and
/// dispatched; an envelope can mix both platforms.
pub enum MetaEntryKind<'a> {
    Messenger(&'a [MessengerEvent]),
    WhatsApp(&'a [WhatsAppChange]),
    Unknown,
}

pub fn classify_entry(entry: &MetaEntry) -> MetaEntryKind<'_> {
    if let Some(messaging) = &entry.messaging {
        return MetaEntryKind::Messenger(messaging);
    }
    if let Some(changes) = &entry.changes {
        return MetaEntryKind::WhatsApp(changes);
    }
    MetaEntryKind::Unknown
}

/// Outbound Graph API surface, behind a trait for test doubles.
#[async_trait]
pub trait MetaApi: Send + Sync {
    async fn send_messenger(
        &self,
        access_token: &str,
        recipient_psid: &str,
        text: &str,
    ) -> Result<(), RelayError>;

    async fn send_whatsapp(
        &self,
        access_token: &str,
        phone_number_id: &str,
        to: &str,
        text: &str,
    ) -> Result<(), RelayError>;
}

pub struct GraphApi {
    client: reqwest::Client,
    base_url: String,
}

impl GraphApi {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: "https://graph.facebook.com/v19.0".to_string(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<(), RelayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(RelayError::Unauthorized(format!(
                    "Meta rejected the access token: {body}"
                )));
            }
            return Err(RelayError::Upstream(format!(
                "Graph API returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MetaApi for GraphApi {
    async fn send_messenger(
        &self,
        access_token: &str,
        recipient_psid: &str,
        text: &str,
    ) -> Result<(), RelayError> {
        let response = self
            .client
            .post(format!("{}/me/messages", self.base_url))
            .bearer_auth(access_token)
            .json(&json!({
                "recipient": { "id": recipient_psid },
                "message": { "text": text },
            }))
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Self::check(response).await
    }

    async fn send_whatsapp(
        &self,
        access_token: &str,
        phone_number_id: &str,
        to: &str,
        text: &str,
    ) -> Result<(), RelayError> {
        let response = self
            .client
            .post(format!("{}/{phone_number_id}/messages", self.base_url))
            .bearer_auth(access_token)
            .json(&json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "text",
                "text": { "body": text },
            }))
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Self::check(response).await
    }
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/meta/webhook", get(verify_webhook).post(handle_webhook))
}

async fn require_config(state: &AppState, agent_id: Uuid) -> Result<ChannelConfig, RelayError> {
    state
        .channel_configs
        .config_for(agent_id, Platform::Meta)
        .await?
        .ok_or(RelayError::ConfigNotFound {
            agent_id,
            platform: Platform::Meta.to_string(),
        })
}

/// Subscription verification handshake. The challenge is echoed only when
/// the presented verify token matches the stored per-agent token.
pub async fn verify_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> Result<String, RelayError> {
    let config = require_config(&state, query.agent_id).await?;

    let mode_ok = query.hub_mode.as_deref() == Some("subscribe");
    let token_ok = match (&query.hub_verify_token, &config.verify_token) {
        (Some(presented), Some(stored)) => presented == stored,
        _ => false,
    };

    if mode_ok && token_ok {
        if let Some(challenge) = query.hub_challenge {
            debug!("meta webhook verified for agent {}", query.agent_id);
            return Ok(challenge);
        }
    }

    warn!("meta webhook verification failed for agent {}", query.agent_id);
    Err(RelayError::Forbidden("webhook verification failed".into()))
}

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AgentQuery>,
    Json(envelope): Json<MetaEnvelope>,
) -> Result<Json<Value>, RelayError> {
    let config = require_config(&state, query.agent_id).await?;

    for entry in &envelope.entry {
        match classify_entry(entry) {
            MetaEntryKind::Messenger(events) => {
                for event in events {
                    if let Err(e) = process_messenger(&state, &config, event).await {
                        error!("messenger event failed: {e}");
                    }
                }
            }
            MetaEntryKind::WhatsApp(changes) => {
                for change in changes {
                    if let Err(e) = process_whatsapp(&state, &config, change).await {
                        error!("whatsapp change failed: {e}");
                    }
                }
            }
            MetaEntryKind::Unknown => {
                debug!("skipping meta entry with no recognizable shape");
            }
        }
    }

    Ok(Json(json!({ "ok": true })))
}

async fn process_messenger(
    state: &AppState,
    config: &ChannelConfig,
    event: &MessengerEvent,
) -> Result<(), RelayError> {
    let Some(sender) = &event.sender else {
        return Ok(());
    };
    let Some(message) = &event.message else {
        return Ok(());
    };
    if message.is_echo {
        return Ok(());
    }
    let Some(text) = message.text.as_deref().filter(|t| !t.is_empty()) else {
        return Ok(());
    };

    let turn = InboundTurn::new(
        config.agent_id,
        &format!("messenger_{}", sender.id),
        Platform::Messenger,
        text,
    );
    let outcome = run_turn(state, turn).await?;

    if let Err(e) = state
        .meta
        .send_messenger(&config.credential, &sender.id, &outcome.reply)
        .await
    {
        error!("messenger send to {} failed: {e}", sender.id);
    }
    Ok(())
}

async fn process_whatsapp(
    state: &AppState,
    config: &ChannelConfig,
    change: &WhatsAppChange,
) -> Result<(), RelayError> {
    let Some(messages) = &change.value.messages else {
        return Ok(());
    };

    // Reply routing needs a phone number id, from config or from the
    // inbound payload's metadata.
    let phone_number_id = config.phone_number_id.clone().or_else(|| {
        change
            .value
            .metadata
            .as_ref()
            .and_then(|m| m.phone_number_id.clone())
    });

    for message in messages {
        let Some(text) = message.text.as_ref().map(|t| t.body.as_str()) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }

        let turn = InboundTurn::new(
            config.agent_id,
            &format!("whatsapp_{}", message.from),
            Platform::WhatsApp,
            text,
        );
        let outcome = run_turn(state, turn).await?;

        match &phone_number_id {
            Some(phone_id) => {
                if let Err(e) = state
                    .meta
                    .send_whatsapp(&config.credential, phone_id, &message.from, &outcome.reply)
                    .await
                {
                    error!("whatsapp send to {} failed: {e}", message.from);
                }
            }
            None => {
                // Hard failure for this entry only; the webhook delivery as
                // a whole still succeeds.
                error!(
                    "cannot reply to whatsapp user {}: no phone number id in config or payload",
                    message.from
                );
            }
        }
    }
    Ok(())
}
