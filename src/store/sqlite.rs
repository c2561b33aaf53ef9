//! Diesel/SQLite storage adapter.
//!
//! All relay mutations are single-row inserts or patches, so plain
//! autocommit connections from an r2d2 pool are enough; no multi-statement
//! transactions are required.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::RelayError;
use crate::shared::models::{
    merge_metadata, Agent, ChannelConfig, ChatMessage, ChatSession, FormField, KnowledgeEntry,
    Platform, Role,
};

use super::schema::{agents, channel_configs, chat_messages, chat_sessions, knowledge_entries};
use super::{AgentStore, ChannelConfigStore, KnowledgeStore, SessionStore};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run pending migrations.
    pub fn open(path: &str) -> Result<Self, RelayError> {
        let manager = ConnectionManager::<SqliteConnection>::new(path);
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| RelayError::Storage(e.to_string()))?;

        let mut conn = pool.get()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| RelayError::Storage(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, RelayError> {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| RelayError::Storage(e.to_string()))?;

        let mut conn = pool.get()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| RelayError::Storage(e.to_string()))?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, RelayError> {
        Ok(self.pool.get()?)
    }

    pub fn insert_agent(&self, agent: &Agent) -> Result<(), RelayError> {
        let mut conn = self.conn()?;
        diesel::insert_into(agents::table)
            .values(AgentRow::from_model(agent)?)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_knowledge(&self, entry: &KnowledgeEntry) -> Result<(), RelayError> {
        let mut conn = self.conn()?;
        diesel::insert_into(knowledge_entries::table)
            .values(KnowledgeRow::from_model(entry))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_config(&self, config: &ChannelConfig) -> Result<(), RelayError> {
        let mut conn = self.conn()?;
        diesel::insert_into(channel_configs::table)
            .values(ConfigRow::from_model(config))
            .execute(&mut conn)?;
        Ok(())
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, RelayError> {
    Uuid::parse_str(raw).map_err(|e| RelayError::Storage(format!("bad uuid in row: {e}")))
}

fn to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(naive, Utc)
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = agents)]
struct AgentRow {
    id: String,
    name: String,
    system_prompt: String,
    temperature: f64,
    welcome_message: String,
    header_color: String,
    accent_color: String,
    background_color: String,
    profile_image: Option<String>,
    collect_user_info: bool,
    form_fields: String,
    is_active: bool,
    created_at: NaiveDateTime,
}

impl AgentRow {
    fn from_model(agent: &Agent) -> Result<Self, RelayError> {
        Ok(Self {
            id: agent.id.to_string(),
            name: agent.name.clone(),
            system_prompt: agent.system_prompt.clone(),
            temperature: agent.temperature,
            welcome_message: agent.welcome_message.clone(),
            header_color: agent.header_color.clone(),
            accent_color: agent.accent_color.clone(),
            background_color: agent.background_color.clone(),
            profile_image: agent.profile_image.clone(),
            collect_user_info: agent.collect_user_info,
            form_fields: serde_json::to_string(&agent.form_fields)?,
            is_active: agent.is_active,
            created_at: agent.created_at.naive_utc(),
        })
    }

    fn into_model(self) -> Result<Agent, RelayError> {
        let form_fields: Vec<FormField> =
            serde_json::from_str(&self.form_fields).unwrap_or_default();
        Ok(Agent {
            id: parse_uuid(&self.id)?,
            name: self.name,
            system_prompt: self.system_prompt,
            temperature: self.temperature,
            welcome_message: self.welcome_message,
            header_color: self.header_color,
            accent_color: self.accent_color,
            background_color: self.background_color,
            profile_image: self.profile_image,
            collect_user_info: self.collect_user_info,
            form_fields,
            is_active: self.is_active,
            created_at: to_utc(self.created_at),
        })
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = chat_sessions)]
struct SessionRow {
    id: String,
    agent_id: String,
    external_user_id: String,
    platform: String,
    metadata: String,
    created_at: NaiveDateTime,
    last_active_at: NaiveDateTime,
}

impl SessionRow {
    fn from_model(session: &ChatSession) -> Result<Self, RelayError> {
        Ok(Self {
            id: session.id.to_string(),
            agent_id: session.agent_id.to_string(),
            external_user_id: session.external_user_id.clone(),
            platform: session.platform.to_string(),
            metadata: serde_json::to_string(&session.metadata)?,
            created_at: session.created_at.naive_utc(),
            last_active_at: session.last_active_at.naive_utc(),
        })
    }

    fn into_model(self) -> Result<ChatSession, RelayError> {
        Ok(ChatSession {
            id: parse_uuid(&self.id)?,
            agent_id: parse_uuid(&self.agent_id)?,
            external_user_id: self.external_user_id,
            platform: Platform::from_str(&self.platform)
                .map_err(|_| RelayError::Storage(format!("bad platform: {}", self.platform)))?,
            metadata: serde_json::from_str(&self.metadata).unwrap_or(Value::Null),
            created_at: to_utc(self.created_at),
            last_active_at: to_utc(self.last_active_at),
        })
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = chat_messages)]
struct MessageRow {
    id: String,
    session_id: String,
    role: String,
    content: String,
    source: String,
    created_at: NaiveDateTime,
}

impl MessageRow {
    fn from_model(message: &ChatMessage) -> Self {
        Self {
            id: message.id.to_string(),
            session_id: message.session_id.to_string(),
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            source: message.source.to_string(),
            created_at: message.created_at.naive_utc(),
        }
    }

    fn into_model(self) -> Result<ChatMessage, RelayError> {
        Ok(ChatMessage {
            id: parse_uuid(&self.id)?,
            session_id: parse_uuid(&self.session_id)?,
            role: Role::from_str(&self.role)
                .map_err(|_| RelayError::Storage(format!("bad role: {}", self.role)))?,
            content: self.content,
            source: Platform::from_str(&self.source)
                .map_err(|_| RelayError::Storage(format!("bad source: {}", self.source)))?,
            created_at: to_utc(self.created_at),
        })
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = knowledge_entries)]
struct KnowledgeRow {
    id: String,
    agent_id: String,
    input: String,
    output: String,
    created_at: NaiveDateTime,
}

impl KnowledgeRow {
    fn from_model(entry: &KnowledgeEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            agent_id: entry.agent_id.to_string(),
            input: entry.input.clone(),
            output: entry.output.clone(),
            created_at: entry.created_at.naive_utc(),
        }
    }

    fn into_model(self) -> Result<KnowledgeEntry, RelayError> {
        Ok(KnowledgeEntry {
            id: parse_uuid(&self.id)?,
            agent_id: parse_uuid(&self.agent_id)?,
            input: self.input,
            output: self.output,
            created_at: to_utc(self.created_at),
        })
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = channel_configs)]
struct ConfigRow {
    id: String,
    agent_id: String,
    platform: String,
    credential: String,
    public_id: Option<String>,
    verify_token: Option<String>,
    phone_number_id: Option<String>,
    webhook_url: Option<String>,
    is_active: bool,
    created_at: NaiveDateTime,
}

impl ConfigRow {
    fn from_model(config: &ChannelConfig) -> Self {
        Self {
            id: config.id.to_string(),
            agent_id: config.agent_id.to_string(),
            platform: config.platform.to_string(),
            credential: config.credential.clone(),
            public_id: config.public_id.clone(),
            verify_token: config.verify_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
            webhook_url: config.webhook_url.clone(),
            is_active: config.is_active,
            created_at: config.created_at.naive_utc(),
        }
    }

    fn into_model(self) -> Result<ChannelConfig, RelayError> {
        Ok(ChannelConfig {
            id: parse_uuid(&self.id)?,
            agent_id: parse_uuid(&self.agent_id)?,
            platform: Platform::from_str(&self.platform)
                .map_err(|_| RelayError::Storage(format!("bad platform: {}", self.platform)))?,
            credential: self.credential,
            public_id: self.public_id,
            verify_token: self.verify_token,
            phone_number_id: self.phone_number_id,
            webhook_url: self.webhook_url,
            is_active: self.is_active,
            created_at: to_utc(self.created_at),
        })
    }
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, RelayError> {
        let mut conn = self.conn()?;
        let row: Option<AgentRow> = agents::table
            .filter(agents::id.eq(id.to_string()))
            .first(&mut conn)
            .optional()?;
        row.map(AgentRow::into_model).transpose()
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn latest_session(
        &self,
        agent_id: Uuid,
        external_user_id: &str,
        platform: Platform,
    ) -> Result<Option<ChatSession>, RelayError> {
        let mut conn = self.conn()?;
        let row: Option<SessionRow> = chat_sessions::table
            .filter(chat_sessions::agent_id.eq(agent_id.to_string()))
            .filter(chat_sessions::external_user_id.eq(external_user_id))
            .filter(chat_sessions::platform.eq(platform.to_string()))
            .order(chat_sessions::last_active_at.desc())
            .first(&mut conn)
            .optional()?;
        row.map(SessionRow::into_model).transpose()
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>, RelayError> {
        let mut conn = self.conn()?;
        let row: Option<SessionRow> = chat_sessions::table
            .filter(chat_sessions::id.eq(id.to_string()))
            .first(&mut conn)
            .optional()?;
        row.map(SessionRow::into_model).transpose()
    }

    async fn insert_session(&self, session: &ChatSession) -> Result<(), RelayError> {
        let mut conn = self.conn()?;
        diesel::insert_into(chat_sessions::table)
            .values(SessionRow::from_model(session)?)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn touch_session(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        metadata_patch: Option<&Value>,
    ) -> Result<(), RelayError> {
        let mut conn = self.conn()?;

        match metadata_patch {
            None => {
                let updated = diesel::update(
                    chat_sessions::table.filter(chat_sessions::id.eq(id.to_string())),
                )
                .set(chat_sessions::last_active_at.eq(at.naive_utc()))
                .execute(&mut conn)?;
                if updated == 0 {
                    return Err(RelayError::SessionNotFound(id));
                }
            }
            Some(patch) => {
                // Merge happens in Rust: read, merge, write back.
                let row: Option<SessionRow> = chat_sessions::table
                    .filter(chat_sessions::id.eq(id.to_string()))
                    .first(&mut conn)
                    .optional()?;
                let row = row.ok_or(RelayError::SessionNotFound(id))?;
                let mut metadata: Value =
                    serde_json::from_str(&row.metadata).unwrap_or(Value::Null);
                merge_metadata(&mut metadata, patch);
                diesel::update(
                    chat_sessions::table.filter(chat_sessions::id.eq(id.to_string())),
                )
                .set((
                    chat_sessions::last_active_at.eq(at.naive_utc()),
                    chat_sessions::metadata.eq(serde_json::to_string(&metadata)?),
                ))
                .execute(&mut conn)?;
            }
        }
        Ok(())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), RelayError> {
        let mut conn = self.conn()?;
        diesel::insert_into(chat_messages::table)
            .values(MessageRow::from_model(message))
            .execute(&mut conn)?;
        Ok(())
    }

    async fn messages(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RelayError> {
        let mut conn = self.conn()?;
        let rows: Vec<MessageRow> = chat_messages::table
            .filter(chat_messages::session_id.eq(session_id.to_string()))
            .order(chat_messages::created_at.desc())
            .limit(limit as i64)
            .load(&mut conn)?;
        let mut messages: Vec<ChatMessage> = rows
            .into_iter()
            .map(MessageRow::into_model)
            .collect::<Result<_, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn recent_entries(
        &self,
        agent_id: Uuid,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>, RelayError> {
        let mut conn = self.conn()?;
        let rows: Vec<KnowledgeRow> = knowledge_entries::table
            .filter(knowledge_entries::agent_id.eq(agent_id.to_string()))
            .order(knowledge_entries::created_at.desc())
            .limit(limit as i64)
            .load(&mut conn)?;
        rows.into_iter().map(KnowledgeRow::into_model).collect()
    }
}

#[async_trait]
impl ChannelConfigStore for SqliteStore {
    async fn config_for(
        &self,
        agent_id: Uuid,
        platform: Platform,
    ) -> Result<Option<ChannelConfig>, RelayError> {
        let mut conn = self.conn()?;
        let row: Option<ConfigRow> = channel_configs::table
            .filter(channel_configs::agent_id.eq(agent_id.to_string()))
            .filter(channel_configs::platform.eq(platform.to_string()))
            .filter(channel_configs::is_active.eq(true))
            .first(&mut conn)
            .optional()?;
        row.map(ConfigRow::into_model).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agent() -> Agent {
        Agent {
            id: Uuid::new_v4(),
            name: "kb bot".into(),
            system_prompt: "You are helpful.".into(),
            temperature: 0.4,
            welcome_message: "hello".into(),
            header_color: "#123".into(),
            accent_color: "#456".into(),
            background_color: "#789".into(),
            profile_image: None,
            collect_user_info: true,
            form_fields: vec![FormField {
                name: "email".into(),
                label: "Email".into(),
                field_type: Some("email".into()),
                required: true,
            }],
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn agent_round_trips_with_form_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let agent = sample_agent();
        store.insert_agent(&agent).unwrap();

        let loaded = store.get_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, agent.name);
        assert_eq!(loaded.form_fields, agent.form_fields);
        assert!(loaded.collect_user_info);
    }

    #[tokio::test]
    async fn session_resolution_and_touch() {
        let store = SqliteStore::open_in_memory().unwrap();
        let agent_id = Uuid::new_v4();
        let session = ChatSession::new(agent_id, "telegram_555", Platform::Telegram);
        store.insert_session(&session).await.unwrap();

        let found = store
            .latest_session(agent_id, "telegram_555", Platform::Telegram)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, session.id);

        let patch = serde_json::json!({ "name": "Ada" });
        store
            .touch_session(session.id, Utc::now(), Some(&patch))
            .await
            .unwrap();
        let reloaded = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(reloaded.metadata["name"], "Ada");
        assert_eq!(reloaded.metadata["platform"], "telegram");
    }

    #[tokio::test]
    async fn messages_come_back_in_creation_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = ChatSession::new(Uuid::new_v4(), "u", Platform::Widget);
        store.insert_session(&session).await.unwrap();

        for (i, role) in [Role::User, Role::Assistant, Role::User].iter().enumerate() {
            let mut m = ChatMessage::new(session.id, *role, &format!("m{i}"), Platform::Widget);
            m.created_at = Utc::now() + chrono::Duration::milliseconds(i as i64 * 10);
            store.append_message(&m).await.unwrap();
        }

        let all = store.messages(session.id, 50).await.unwrap();
        assert_eq!(
            all.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["m0", "m1", "m2"]
        );

        let capped = store.messages(session.id, 2).await.unwrap();
        assert_eq!(
            capped.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["m1", "m2"]
        );
    }

    #[tokio::test]
    async fn knowledge_is_newest_first_and_capped() {
        let store = SqliteStore::open_in_memory().unwrap();
        let agent_id = Uuid::new_v4();
        for i in 0..4 {
            store
                .insert_knowledge(&KnowledgeEntry {
                    id: Uuid::new_v4(),
                    agent_id,
                    input: format!("doc{i}"),
                    output: format!("text{i}"),
                    created_at: Utc::now() + chrono::Duration::milliseconds(i * 10),
                })
                .unwrap();
        }
        let entries = store.recent_entries(agent_id, 2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].input, "doc3");
        assert_eq!(entries[1].input, "doc2");
    }
}
