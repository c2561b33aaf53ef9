//! Storage service interfaces.
//!
//! The relay consumes storage through narrow traits so channel adapters and
//! the generation pipeline never see a concrete backend. Two adapters ship:
//! [`memory::MemoryStore`] (tests, ephemeral deployments) and
//! [`sqlite::SqliteStore`] (diesel + r2d2).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::RelayError;
use crate::shared::models::{
    Agent, ChannelConfig, ChatMessage, ChatSession, KnowledgeEntry, Platform,
};

pub mod memory;
pub mod schema;
pub mod sqlite;

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, RelayError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Most recent session for the (agent, external user, platform) key,
    /// or `None` when this identity has never been seen.
    async fn latest_session(
        &self,
        agent_id: Uuid,
        external_user_id: &str,
        platform: Platform,
    ) -> Result<Option<ChatSession>, RelayError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>, RelayError>;

    async fn insert_session(&self, session: &ChatSession) -> Result<(), RelayError>;

    /// Bump `last_active_at` and merge `metadata_patch` into the stored
    /// metadata object when given.
    async fn touch_session(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        metadata_patch: Option<&Value>,
    ) -> Result<(), RelayError>;

    async fn append_message(&self, message: &ChatMessage) -> Result<(), RelayError>;

    /// Messages for a session in creation order, capped to the newest
    /// `limit` turns.
    async fn messages(&self, session_id: Uuid, limit: usize)
        -> Result<Vec<ChatMessage>, RelayError>;
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Up to `limit` entries for the agent, newest first.
    async fn recent_entries(
        &self,
        agent_id: Uuid,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>, RelayError>;
}

#[async_trait]
pub trait ChannelConfigStore: Send + Sync {
    /// Active configuration for (agent, platform), if any.
    async fn config_for(
        &self,
        agent_id: Uuid,
        platform: Platform,
    ) -> Result<Option<ChannelConfig>, RelayError>;
}
