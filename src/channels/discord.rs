//! Discord channel adapter.
//!
//! Two delivery paths:
//! - signed HTTPS interactions (slash commands): Ed25519 over
//!   `timestamp + raw body`, verified against the application's stored
//!   public key before any JSON parsing. PING is answered inline without
//!   touching the session pipeline.
//! - an internal relay for a long-lived gateway-connected bot process,
//!   authenticated by the shared backend secret instead of per-request
//!   signatures.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use log::{debug, warn};
use ring::signature::{UnparsedPublicKey, ED25519};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::channels::{run_turn, AgentQuery, InboundTurn};
use crate::error::RelayError;
use crate::shared::models::Platform;
use crate::shared::state::AppState;

// Interaction wire constants, per the Discord interactions contract.
const INTERACTION_PING: u8 = 1;
const INTERACTION_APPLICATION_COMMAND: u8 = 2;
const RESPONSE_PONG: u8 = 1;
const RESPONSE_CHANNEL_MESSAGE: u8 = 4;

#[derive(Debug, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub data: Option<InteractionData>,
    #[serde(default)]
    pub member: Option<GuildMember>,
    #[serde(default)]
    pub user: Option<DiscordUser>,
}

#[derive(Debug, Deserialize)]
pub struct InteractionData {
    pub name: String,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct GuildMember {
    #[serde(default)]
    pub user: Option<DiscordUser>,
}

#[derive(Debug, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub agent_id: Uuid,
    pub user_id: String,
    pub text: String,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/discord/interactions", post(handle_interaction))
        .route("/discord/respond", post(handle_relay))
}

/// Verify the interaction signature over `timestamp + body`. Rejects before
/// the payload is parsed; the checked key material is never echoed back.
pub fn verify_signature(
    public_key_hex: &str,
    signature_hex: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<(), RelayError> {
    let public_key = hex::decode(public_key_hex)
        .map_err(|_| RelayError::Unauthorized("invalid interaction signature".into()))?;
    let signature = hex::decode(signature_hex)
        .map_err(|_| RelayError::Unauthorized("invalid interaction signature".into()))?;

    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);

    UnparsedPublicKey::new(&ED25519, public_key)
        .verify(&message, &signature)
        .map_err(|_| RelayError::Unauthorized("invalid interaction signature".into()))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, RelayError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RelayError::Unauthorized(format!("missing {name} header")))
}

pub async fn handle_interaction(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AgentQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, RelayError> {
    let config = state
        .channel_configs
        .config_for(query.agent_id, Platform::Discord)
        .await?
        .ok_or(RelayError::ConfigNotFound {
            agent_id: query.agent_id,
            platform: Platform::Discord.to_string(),
        })?;

    let public_key = config.public_id.as_deref().unwrap_or("");
    let signature = header(&headers, "x-signature-ed25519")?;
    let timestamp = header(&headers, "x-signature-timestamp")?;

    if let Err(e) = verify_signature(public_key, signature, timestamp, &body) {
        warn!(
            "rejected discord interaction for agent {}: bad signature",
            query.agent_id
        );
        return Err(e);
    }

    let interaction: Interaction = serde_json::from_slice(&body)
        .map_err(|e| RelayError::BadRequest(format!("malformed interaction payload: {e}")))?;

    match interaction.kind {
        INTERACTION_PING => {
            debug!("discord ping for agent {}", query.agent_id);
            Ok(Json(json!({ "type": RESPONSE_PONG })))
        }
        INTERACTION_APPLICATION_COMMAND => {
            let user = interaction
                .member
                .as_ref()
                .and_then(|m| m.user.as_ref())
                .or(interaction.user.as_ref())
                .ok_or_else(|| {
                    RelayError::BadRequest("interaction carries no invoking user".into())
                })?;
            if user.bot {
                return Ok(Json(json!({
                    "type": RESPONSE_CHANNEL_MESSAGE,
                    "data": { "content": "" }
                })));
            }

            let data = interaction
                .data
                .as_ref()
                .ok_or_else(|| RelayError::BadRequest("command without data".into()))?;
            let text = command_text(data);

            let mut turn = InboundTurn::new(
                query.agent_id,
                &format!("discord_{}", user.id),
                Platform::Discord,
                &text,
            );
            turn.friendly_degrade = true;
            let outcome = run_turn(&state, turn).await?;

            Ok(Json(json!({
                "type": RESPONSE_CHANNEL_MESSAGE,
                "data": { "content": outcome.reply }
            })))
        }
        other => Err(RelayError::BadRequest(format!(
            "unsupported interaction type {other}"
        ))),
    }
}

/// The free-text argument of the slash command, falling back to the command
/// name for argument-less commands.
fn command_text(data: &InteractionData) -> String {
    data.options
        .iter()
        .find_map(|o| o.value.as_ref().and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .unwrap_or_else(|| data.name.clone())
}

/// Internal relay for the gateway bot process. Trusts the shared backend
/// secret; the caller delivers the reply itself over its gateway session.
pub async fn handle_relay(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RelayRequest>,
) -> Result<Json<Value>, RelayError> {
    let Some(expected) = state.config.backend_secret.as_deref() else {
        return Err(RelayError::Unauthorized(
            "backend relay is not configured".into(),
        ));
    };
    let presented = header(&headers, "x-backend-key")?;
    if ring::constant_time::verify_slices_are_equal(presented.as_bytes(), expected.as_bytes())
        .is_err()
    {
        warn!("discord relay call with bad backend key for agent {}", body.agent_id);
        return Err(RelayError::Unauthorized("invalid backend key".into()));
    }

    if body.text.trim().is_empty() {
        return Err(RelayError::BadRequest("text is required".into()));
    }

    let mut turn = InboundTurn::new(
        body.agent_id,
        &format!("discord_{}", body.user_id),
        Platform::Discord,
        &body.text,
    );
    turn.friendly_degrade = true;
    let outcome = run_turn(&state, turn).await?;

    Ok(Json(json!({ "ok": true, "reply": outcome.reply })))
}
