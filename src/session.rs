//! Session resolution.
//!
//! Resolution always looks up "latest by agent + external user + platform"
//! before creating; creation is the fallback path. There is deliberately no
//! implicit expiry or rotation here: channel adapters decide when a fresh
//! session is forced (the widget does so by dropping its local handle).

use chrono::Utc;
use log::info;
use serde_json::Value;
use uuid::Uuid;

use crate::error::RelayError;
use crate::shared::models::{merge_metadata, Agent, ChatSession, Platform};
use crate::shared::state::AppState;

/// Validate the agent exists and is active. Channel adapters call this
/// before any session or message write.
pub async fn require_agent(state: &AppState, agent_id: Uuid) -> Result<Agent, RelayError> {
    match state.agents.get_agent(agent_id).await? {
        Some(agent) if agent.is_active => Ok(agent),
        _ => Err(RelayError::AgentNotFound(agent_id)),
    }
}

/// Latest session for the key, or a new one. Touches `last_active_at` and
/// merges `metadata` on the existing-session path so pre-chat fields and
/// platform tags accumulate over turns.
pub async fn resolve_or_create(
    state: &AppState,
    agent_id: Uuid,
    external_user_id: &str,
    platform: Platform,
    metadata: Option<&Value>,
) -> Result<ChatSession, RelayError> {
    if let Some(existing) = state
        .sessions
        .latest_session(agent_id, external_user_id, platform)
        .await?
    {
        state
            .sessions
            .touch_session(existing.id, Utc::now(), metadata)
            .await?;
        return state
            .sessions
            .get_session(existing.id)
            .await?
            .ok_or(RelayError::SessionNotFound(existing.id));
    }

    create(state, agent_id, external_user_id, platform, metadata).await
}

/// Unconditionally start a new session. The widget's createSession endpoint
/// uses this as its force-new path; webhook channels go through
/// [`resolve_or_create`].
pub async fn create(
    state: &AppState,
    agent_id: Uuid,
    external_user_id: &str,
    platform: Platform,
    metadata: Option<&Value>,
) -> Result<ChatSession, RelayError> {
    let mut session = ChatSession::new(agent_id, external_user_id, platform);
    if let Some(patch) = metadata {
        merge_metadata(&mut session.metadata, patch);
    }
    state.sessions.insert_session(&session).await?;
    info!(
        "created session {} for agent {} ({} via {})",
        session.id, agent_id, external_user_id, platform
    );
    Ok(session)
}
