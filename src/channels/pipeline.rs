//! The normalized inbound turn, shared by every channel adapter.
//!
//! Ordering invariant: the user message is persisted before the generation
//! call begins and the assistant message after it completes, so a crash
//! mid-generation can leave an orphaned user message but never an assistant
//! message without its prompt.

use chrono::Utc;
use log::debug;
use serde_json::Value;
use uuid::Uuid;

use crate::error::RelayError;
use crate::kb;
use crate::llm::{GenerationResult, PromptMessage};
use crate::session;
use crate::shared::models::{Agent, ChatMessage, ChatSession, Platform, Role};
use crate::shared::state::AppState;

/// Where the conversation context for this turn comes from.
pub enum HistorySource {
    /// Replay the newest `limit` stored turns (webhook channels).
    Stored { limit: usize },
    /// Use the caller-supplied transcript (widget chat).
    Client(Vec<PromptMessage>),
    /// No prior context (Telegram callback queries).
    None,
}

pub struct InboundTurn {
    pub agent_id: Uuid,
    pub external_user_id: String,
    pub platform: Platform,
    pub text: String,
    /// Merged into session metadata before the user message is persisted.
    pub metadata: Option<Value>,
    pub history: HistorySource,
    /// Untrusted prompt supplement appended after the stored system prompt.
    pub extra_system: Option<String>,
    /// Pre-resolved session (widget, after its ownership check). When unset
    /// the pipeline resolves or creates one.
    pub session: Option<ChatSession>,
    /// Rewrite degraded replies into the friendly generic line before
    /// persisting and delivering (Telegram/Discord, where an echo looks
    /// broken).
    pub friendly_degrade: bool,
}

impl InboundTurn {
    pub fn new(agent_id: Uuid, external_user_id: &str, platform: Platform, text: &str) -> Self {
        Self {
            agent_id,
            external_user_id: external_user_id.to_string(),
            platform,
            text: text.to_string(),
            metadata: None,
            history: HistorySource::Stored { limit: 20 },
            extra_system: None,
            session: None,
            friendly_degrade: false,
        }
    }
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub agent: Agent,
    pub session: ChatSession,
    /// The text actually persisted and delivered.
    pub reply: String,
    pub result: GenerationResult,
}

/// Run one normalized turn: validate agent, resolve session, persist the
/// user message, assemble context, generate, persist the assistant message.
pub async fn run_turn(state: &AppState, turn: InboundTurn) -> Result<TurnOutcome, RelayError> {
    let agent = session::require_agent(state, turn.agent_id).await?;

    let chat_session = match turn.session {
        Some(existing) => {
            if let Some(patch) = &turn.metadata {
                state
                    .sessions
                    .touch_session(existing.id, Utc::now(), Some(patch))
                    .await?;
            }
            existing
        }
        None => {
            session::resolve_or_create(
                state,
                agent.id,
                &turn.external_user_id,
                turn.platform,
                turn.metadata.as_ref(),
            )
            .await?
        }
    };

    // Context is captured before the current turn is persisted so the user
    // message appears exactly once in the prompt.
    let mut context: Vec<PromptMessage> = match &turn.history {
        HistorySource::Stored { limit } => state
            .sessions
            .messages(chat_session.id, *limit)
            .await?
            .into_iter()
            .map(|m| match m.role {
                Role::User => PromptMessage::user(m.content),
                Role::Assistant => PromptMessage::assistant(m.content),
            })
            .collect(),
        HistorySource::Client(history) => history.clone(),
        HistorySource::None => Vec::new(),
    };

    let user_message = ChatMessage::new(chat_session.id, Role::User, &turn.text, turn.platform);
    state.sessions.append_message(&user_message).await?;

    let knowledge_block =
        kb::build_context_block(state.knowledge.as_ref(), agent.id, kb::KNOWLEDGE_LIMIT).await?;
    let mut system_prompt = kb::compose_system_prompt(&agent.system_prompt, &knowledge_block);
    if let Some(extra) = &turn.extra_system {
        if !extra.trim().is_empty() {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(extra);
        }
    }

    let mut messages = vec![PromptMessage::system(system_prompt)];
    messages.append(&mut context);
    messages.push(PromptMessage::user(turn.text.clone()));

    let result = state
        .generator
        .generate(messages, agent.temperature, None)
        .await;
    if let Some(reason) = &result.reason {
        debug!(
            "degraded reply for session {} ({reason})",
            chat_session.id
        );
    }

    let reply = if turn.friendly_degrade {
        result.friendly_text().to_string()
    } else {
        result.text.clone()
    };

    let assistant_message =
        ChatMessage::new(chat_session.id, Role::Assistant, &reply, turn.platform);
    state.sessions.append_message(&assistant_message).await?;
    state
        .sessions
        .touch_session(chat_session.id, Utc::now(), None)
        .await?;

    Ok(TurnOutcome {
        agent,
        session: chat_session,
        reply,
        result,
    })
}
