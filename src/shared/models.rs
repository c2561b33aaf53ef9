use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::RelayError;

/// Messaging surface a session or channel configuration belongs to.
///
/// `Meta` is a configuration-only platform: one Meta app config serves both
/// Messenger and WhatsApp traffic, while sessions are always tagged with the
/// concrete surface the user messaged through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Widget,
    Telegram,
    Discord,
    Messenger,
    WhatsApp,
    Meta,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Widget => write!(f, "widget"),
            Self::Telegram => write!(f, "telegram"),
            Self::Discord => write!(f, "discord"),
            Self::Messenger => write!(f, "messenger"),
            Self::WhatsApp => write!(f, "whatsapp"),
            Self::Meta => write!(f, "meta"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "widget" | "web" => Ok(Self::Widget),
            "telegram" | "tg" => Ok(Self::Telegram),
            "discord" => Ok(Self::Discord),
            "messenger" | "facebook" => Ok(Self::Messenger),
            "whatsapp" | "wa" => Ok(Self::WhatsApp),
            "meta" => Ok(Self::Meta),
            _ => Err(RelayError::BadRequest(format!("unknown platform: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(RelayError::BadRequest(format!("unknown role: {s}"))),
        }
    }
}

/// One declared pre-chat form field on an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormField {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A configured chatbot persona. Owned by the dashboard; this crate only
/// reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub welcome_message: String,
    pub header_color: String,
    pub accent_color: String,
    pub background_color: String,
    pub profile_image: Option<String>,
    pub collect_user_info: bool,
    pub form_fields: Vec<FormField>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// The only agent shape ever serialized back to a channel caller.
    pub fn public_projection(&self) -> AgentPublic {
        AgentPublic {
            id: self.id,
            name: self.name.clone(),
            welcome_message: self.welcome_message.clone(),
            system_prompt: self.system_prompt.clone(),
            temperature: self.temperature,
            header_color: self.header_color.clone(),
            accent_color: self.accent_color.clone(),
            background_color: self.background_color.clone(),
            profile_image: self.profile_image.clone(),
            collect_user_info: self.collect_user_info,
            form_fields: self.form_fields.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPublic {
    pub id: Uuid,
    pub name: String,
    pub welcome_message: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub header_color: String,
    pub accent_color: String,
    pub background_color: String,
    pub profile_image: Option<String>,
    pub collect_user_info: bool,
    pub form_fields: Vec<FormField>,
}

/// One continuous conversation between one external identity and one agent
/// on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub external_user_id: String,
    pub platform: Platform,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(agent_id: Uuid, external_user_id: &str, platform: Platform) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_id,
            external_user_id: external_user_id.to_string(),
            platform,
            metadata: serde_json::json!({ "platform": platform.to_string() }),
            created_at: now,
            last_active_at: now,
        }
    }
}

/// One turn in a session. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    pub source: Platform,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(session_id: Uuid, role: Role, content: &str, source: Platform) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            content: content.to_string(),
            source,
            created_at: Utc::now(),
        }
    }
}

/// Ingested document/URL fragment attached to an agent. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub input: String,
    pub output: String,
    pub created_at: DateTime<Utc>,
}

/// Per-agent credentials for one messaging platform. Created and edited by
/// the dashboard; this crate reads credentials for outbound calls and
/// validates inbound signatures/tokens against the public side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub platform: Platform,
    /// Bot token (Telegram), page/app access token (Meta) or backend bot
    /// token (Discord). Never serialized into responses.
    pub credential: String,
    /// Public counterpart: Discord application public key, Meta app id.
    pub public_id: Option<String>,
    pub verify_token: Option<String>,
    pub phone_number_id: Option<String>,
    pub webhook_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Merge `patch` into `base` object-wise, overwriting scalar fields.
/// Non-object patches are stored under the given key namespace as-is.
pub fn merge_metadata(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                base_map.insert(k.clone(), v.clone());
            }
        }
        (base_slot, patch_value) => {
            if !patch_value.is_null() {
                let mut map = HashMap::new();
                map.insert("value".to_string(), patch_value.clone());
                *base_slot = serde_json::to_value(map).unwrap_or(Value::Null);
            }
        }
    }
}
