//! In-memory storage adapter. Used by the test suite and by deployments
//! started without `DATABASE_PATH`, where losing state on restart is
//! acceptable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::RelayError;
use crate::shared::models::{
    merge_metadata, Agent, ChannelConfig, ChatMessage, ChatSession, KnowledgeEntry, Platform,
};

use super::{AgentStore, ChannelConfigStore, KnowledgeStore, SessionStore};

#[derive(Default)]
pub struct MemoryStore {
    agents: RwLock<HashMap<Uuid, Agent>>,
    sessions: RwLock<Vec<ChatSession>>,
    messages: RwLock<Vec<ChatMessage>>,
    knowledge: RwLock<Vec<KnowledgeEntry>>,
    configs: RwLock<Vec<ChannelConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_agent(&self, agent: Agent) {
        self.agents.write().await.insert(agent.id, agent);
    }

    pub async fn insert_knowledge(&self, entry: KnowledgeEntry) {
        self.knowledge.write().await.push(entry);
    }

    pub async fn insert_config(&self, config: ChannelConfig) {
        self.configs.write().await.push(config);
    }

    pub async fn message_count(&self, session_id: Uuid) -> usize {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| m.session_id == session_id)
            .count()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn all_sessions(&self) -> Vec<ChatSession> {
        self.sessions.read().await.clone()
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, RelayError> {
        Ok(self.agents.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn latest_session(
        &self,
        agent_id: Uuid,
        external_user_id: &str,
        platform: Platform,
    ) -> Result<Option<ChatSession>, RelayError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .iter()
            .filter(|s| {
                s.agent_id == agent_id
                    && s.external_user_id == external_user_id
                    && s.platform == platform
            })
            .max_by_key(|s| s.last_active_at)
            .cloned())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>, RelayError> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn insert_session(&self, session: &ChatSession) -> Result<(), RelayError> {
        self.sessions.write().await.push(session.clone());
        Ok(())
    }

    async fn touch_session(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        metadata_patch: Option<&Value>,
    ) -> Result<(), RelayError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(RelayError::SessionNotFound(id))?;
        session.last_active_at = at;
        if let Some(patch) = metadata_patch {
            merge_metadata(&mut session.metadata, patch);
        }
        Ok(())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), RelayError> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn messages(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RelayError> {
        let messages = self.messages.read().await;
        let mut for_session: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        for_session.sort_by_key(|m| m.created_at);
        if for_session.len() > limit {
            for_session.drain(..for_session.len() - limit);
        }
        Ok(for_session)
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn recent_entries(
        &self,
        agent_id: Uuid,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>, RelayError> {
        let knowledge = self.knowledge.read().await;
        let mut entries: Vec<KnowledgeEntry> = knowledge
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[async_trait]
impl ChannelConfigStore for MemoryStore {
    async fn config_for(
        &self,
        agent_id: Uuid,
        platform: Platform,
    ) -> Result<Option<ChannelConfig>, RelayError> {
        Ok(self
            .configs
            .read()
            .await
            .iter()
            .find(|c| c.agent_id == agent_id && c.platform == platform && c.is_active)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::Role;

    fn agent() -> Agent {
        Agent {
            id: Uuid::new_v4(),
            name: "a".into(),
            system_prompt: String::new(),
            temperature: 0.7,
            welcome_message: String::new(),
            header_color: String::new(),
            accent_color: String::new(),
            background_color: String::new(),
            profile_image: None,
            collect_user_info: false,
            form_fields: vec![],
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn latest_session_prefers_most_recent() {
        let store = MemoryStore::new();
        let a = agent();
        let mut first = ChatSession::new(a.id, "telegram_1", Platform::Telegram);
        first.last_active_at = Utc::now() - chrono::Duration::hours(1);
        let second = ChatSession::new(a.id, "telegram_1", Platform::Telegram);
        store.insert_session(&first).await.unwrap();
        store.insert_session(&second).await.unwrap();

        let latest = store
            .latest_session(a.id, "telegram_1", Platform::Telegram)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn messages_are_capped_to_newest() {
        let store = MemoryStore::new();
        let session = ChatSession::new(Uuid::new_v4(), "u", Platform::Widget);
        store.insert_session(&session).await.unwrap();
        for i in 0..5 {
            let mut m = ChatMessage::new(session.id, Role::User, &format!("m{i}"), Platform::Widget);
            m.created_at = Utc::now() + chrono::Duration::milliseconds(i);
            store.append_message(&m).await.unwrap();
        }
        let recent = store.messages(session.id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "m3");
        assert_eq!(recent[1].content, "m4");
    }

    #[tokio::test]
    async fn inactive_configs_are_invisible() {
        let store = MemoryStore::new();
        let a = agent();
        store
            .insert_config(ChannelConfig {
                id: Uuid::new_v4(),
                agent_id: a.id,
                platform: Platform::Telegram,
                credential: "token".into(),
                public_id: None,
                verify_token: None,
                phone_number_id: None,
                webhook_url: None,
                is_active: false,
                created_at: Utc::now(),
            })
            .await;
        assert!(store
            .config_for(a.id, Platform::Telegram)
            .await
            .unwrap()
            .is_none());
    }
}
