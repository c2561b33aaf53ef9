//! Web widget channel adapter.
//!
//! JSON-over-HTTPS surface for the embeddable chat widget. CORS-open (the
//! permissive layer is applied at router assembly). The widget keeps its own
//! session handle client-side, so `create_session` is the explicit
//! force-new path: dropping the local handle is how the widget forces fresh
//! instructions after an agent's prompt changes.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use log::warn;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::channels::{run_turn, HistorySource, InboundTurn};
use crate::error::RelayError;
use crate::llm::PromptMessage;
use crate::session;
use crate::shared::models::Platform;
use crate::shared::state::AppState;

/// External identity for anonymous widget visitors. Each `create_session`
/// call still gets its own session row; this tag only namespaces them.
pub const WIDGET_USER: &str = "widget-user";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub agent_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct HistoryItem {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub session_id: Uuid,
    pub agent_id: Uuid,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryItem>,
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(default)]
    pub user_fields: Option<Value>,
    #[serde(default)]
    pub system_prompt_override: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveUserRequest {
    pub session_id: Uuid,
    #[serde(default)]
    pub user_info: Value,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session", post(create_session))
        .route("/chat", post(chat))
        .route("/user", post(save_user_info))
}

/// Start a fresh widget session and return the public agent projection
/// (including the pre-chat form schema). Never returns owner-only fields.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<Value>, RelayError> {
    let agent = session::require_agent(&state, body.agent_id).await?;
    let chat_session = session::create(
        &state,
        agent.id,
        WIDGET_USER,
        Platform::Widget,
        None,
    )
    .await?;

    Ok(Json(json!({
        "sessionId": chat_session.id,
        "agent": agent.public_projection(),
    })))
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<Value>, RelayError> {
    if body.message.trim().is_empty() {
        return Err(RelayError::BadRequest("message is required".into()));
    }

    let chat_session = state
        .sessions
        .get_session(body.session_id)
        .await?
        .ok_or(RelayError::SessionNotFound(body.session_id))?;

    // Ownership check: a session id replayed against another agent must be
    // rejected before anything is written.
    if chat_session.agent_id != body.agent_id {
        warn!(
            "session {} presented with mismatched agent {} (owner {})",
            chat_session.id, body.agent_id, chat_session.agent_id
        );
        return Err(RelayError::Forbidden(
            "session does not belong to this agent".into(),
        ));
    }

    let mut metadata = serde_json::Map::new();
    if let Some(Value::Object(user)) = &body.user {
        metadata.extend(user.clone());
    }
    if let Some(Value::Object(fields)) = &body.user_fields {
        metadata.extend(fields.clone());
    }

    let history: Vec<PromptMessage> = body
        .history
        .iter()
        .filter_map(|item| match item.role.as_str() {
            "user" => Some(PromptMessage::user(item.content.clone())),
            "assistant" => Some(PromptMessage::assistant(item.content.clone())),
            // Client transcripts cannot smuggle system turns.
            _ => None,
        })
        .collect();

    let mut turn = InboundTurn::new(
        body.agent_id,
        WIDGET_USER,
        Platform::Widget,
        &body.message,
    );
    turn.session = Some(chat_session.clone());
    turn.history = HistorySource::Client(history);
    turn.extra_system = body.system_prompt_override.clone();
    if !metadata.is_empty() {
        turn.metadata = Some(Value::Object(metadata));
    }

    let outcome = run_turn(&state, turn).await?;

    Ok(Json(json!({
        "reply": outcome.reply,
        "sessionId": outcome.session.id,
    })))
}

/// Persist pre-chat user info. The widget calls this fire-and-forget; the
/// response only confirms receipt.
pub async fn save_user_info(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SaveUserRequest>,
) -> Result<Json<Value>, RelayError> {
    let chat_session = state
        .sessions
        .get_session(body.session_id)
        .await?
        .ok_or(RelayError::SessionNotFound(body.session_id))?;

    state
        .sessions
        .touch_session(chat_session.id, chrono::Utc::now(), Some(&body.user_info))
        .await?;
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::NEUTRAL_FALLBACK_PREFIX;
    use crate::shared::state::test_support::{sample_agent, state_with_agent};
    use crate::store::SessionStore;

    #[tokio::test]
    async fn create_session_returns_public_projection() {
        let (ctx, agent) = state_with_agent().await;
        let response = create_session(
            State(ctx.app.clone()),
            Json(CreateSessionRequest { agent_id: agent.id }),
        )
        .await
        .unwrap();

        assert!(response.0["sessionId"].is_string());
        assert_eq!(response.0["agent"]["name"], agent.name);
        assert!(response.0["agent"].get("isActive").is_none());
    }

    #[tokio::test]
    async fn create_session_always_forces_a_new_session() {
        let (ctx, agent) = state_with_agent().await;
        let first = create_session(
            State(ctx.app.clone()),
            Json(CreateSessionRequest { agent_id: agent.id }),
        )
        .await
        .unwrap();
        let second = create_session(
            State(ctx.app.clone()),
            Json(CreateSessionRequest { agent_id: agent.id }),
        )
        .await
        .unwrap();
        assert_ne!(first.0["sessionId"], second.0["sessionId"]);
    }

    #[tokio::test]
    async fn chat_without_provider_returns_neutral_fallback() {
        let (ctx, agent) = state_with_agent().await;
        let created = create_session(
            State(ctx.app.clone()),
            Json(CreateSessionRequest { agent_id: agent.id }),
        )
        .await
        .unwrap();
        let session_id: Uuid =
            serde_json::from_value(created.0["sessionId"].clone()).unwrap();

        let response = chat(
            State(ctx.app.clone()),
            Json(ChatRequest {
                session_id,
                agent_id: agent.id,
                message: "hello".into(),
                history: vec![],
                user: None,
                user_fields: None,
                system_prompt_override: None,
            }),
        )
        .await
        .unwrap();

        let reply = response.0["reply"].as_str().unwrap();
        assert!(reply.starts_with(NEUTRAL_FALLBACK_PREFIX));
        assert_eq!(ctx.store.message_count(session_id).await, 2);
    }

    #[tokio::test]
    async fn cross_agent_session_is_rejected_without_writes() {
        let (ctx, agent_a) = state_with_agent().await;
        let agent_b = sample_agent();
        ctx.store.insert_agent(agent_b.clone()).await;

        let created = create_session(
            State(ctx.app.clone()),
            Json(CreateSessionRequest {
                agent_id: agent_a.id,
            }),
        )
        .await
        .unwrap();
        let session_id: Uuid =
            serde_json::from_value(created.0["sessionId"].clone()).unwrap();

        let err = chat(
            State(ctx.app.clone()),
            Json(ChatRequest {
                session_id,
                agent_id: agent_b.id,
                message: "hijack".into(),
                history: vec![],
                user: None,
                user_fields: None,
                system_prompt_override: None,
            }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RelayError::Forbidden(_)));
        assert_eq!(ctx.store.message_count(session_id).await, 0);
    }

    #[tokio::test]
    async fn pre_chat_fields_merge_into_session_metadata() {
        let (ctx, agent) = state_with_agent().await;
        let created = create_session(
            State(ctx.app.clone()),
            Json(CreateSessionRequest { agent_id: agent.id }),
        )
        .await
        .unwrap();
        let session_id: Uuid =
            serde_json::from_value(created.0["sessionId"].clone()).unwrap();

        let _ = chat(
            State(ctx.app.clone()),
            Json(ChatRequest {
                session_id,
                agent_id: agent.id,
                message: "hi".into(),
                history: vec![],
                user: None,
                user_fields: Some(json!({ "email": "ada@example.com" })),
                system_prompt_override: None,
            }),
        )
        .await
        .unwrap();

        let session = ctx.store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.metadata["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn save_user_info_acknowledges_and_merges() {
        let (ctx, agent) = state_with_agent().await;
        let created = create_session(
            State(ctx.app.clone()),
            Json(CreateSessionRequest { agent_id: agent.id }),
        )
        .await
        .unwrap();
        let session_id: Uuid =
            serde_json::from_value(created.0["sessionId"].clone()).unwrap();

        let response = save_user_info(
            State(ctx.app.clone()),
            Json(SaveUserRequest {
                session_id,
                user_info: json!({ "name": "Ada" }),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.0["ok"], true);

        let session = ctx.store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.metadata["name"], "Ada");
    }

    #[tokio::test]
    async fn empty_message_is_bad_request() {
        let (ctx, agent) = state_with_agent().await;
        let err = chat(
            State(ctx.app.clone()),
            Json(ChatRequest {
                session_id: Uuid::new_v4(),
                agent_id: agent.id,
                message: "   ".into(),
                history: vec![],
                user: None,
                user_fields: None,
                system_prompt_override: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RelayError::BadRequest(_)));
    }
}
