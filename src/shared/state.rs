use std::sync::Arc;

use crate::channels::meta::{GraphApi, MetaApi};
use crate::channels::telegram::{BotApi, TelegramApi};
use crate::config::AppConfig;
use crate::error::RelayError;
use crate::llm::ResponseGenerator;
use crate::store::memory::MemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::{AgentStore, ChannelConfigStore, KnowledgeStore, SessionStore};

/// Shared application state handed to every handler.
///
/// Storage and outbound platform APIs are trait objects so tests and
/// alternative backends plug in at construction time instead of being
/// probed for at call time.
pub struct AppState {
    pub config: AppConfig,
    pub agents: Arc<dyn AgentStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub channel_configs: Arc<dyn ChannelConfigStore>,
    pub generator: ResponseGenerator,
    pub telegram: Arc<dyn TelegramApi>,
    pub meta: Arc<dyn MetaApi>,
}

impl AppState {
    /// Production wiring: SQLite when `DATABASE_PATH` is set, otherwise the
    /// ephemeral in-memory store; real platform clients; provider chain
    /// from configured keys.
    pub fn initialize(config: AppConfig) -> Result<Arc<Self>, RelayError> {
        let generator = ResponseGenerator::from_config(&config.llm);
        let telegram: Arc<dyn TelegramApi> = Arc::new(BotApi::new(config.llm.request_timeout));
        let meta: Arc<dyn MetaApi> = Arc::new(GraphApi::new(config.llm.request_timeout));

        let state = match &config.database_path {
            Some(path) => {
                let store = Arc::new(SqliteStore::open(path)?);
                Self {
                    config,
                    agents: store.clone(),
                    sessions: store.clone(),
                    knowledge: store.clone(),
                    channel_configs: store,
                    generator,
                    telegram,
                    meta,
                }
            }
            None => {
                let store = Arc::new(MemoryStore::new());
                Self {
                    config,
                    agents: store.clone(),
                    sessions: store.clone(),
                    knowledge: store.clone(),
                    channel_configs: store,
                    generator,
                    telegram,
                    meta,
                }
            }
        };

        Ok(Arc::new(state))
    }
}

/// Test wiring: in-memory store, recording platform doubles, injectable
/// providers. Lives in the library (not behind `cfg(test)`) so integration
/// tests can use it too.
pub mod test_support {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::channels::meta::MetaApi;
    use crate::channels::telegram::TelegramApi;
    use crate::config::AppConfig;
    use crate::error::RelayError;
    use crate::llm::{LlmError, LlmProvider, LlmRequest, ResponseGenerator};
    use crate::shared::models::{Agent, ChannelConfig, FormField, Platform};
    use crate::store::memory::MemoryStore;

    use super::AppState;

    pub struct RecordingTelegram {
        pub sent: Mutex<Vec<(String, i64, String)>>,
        pub webhooks: Mutex<Vec<(String, String)>>,
        pub reject_token: AtomicBool,
        pub fail_sends: AtomicBool,
    }

    impl RecordingTelegram {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                webhooks: Mutex::new(Vec::new()),
                reject_token: AtomicBool::new(false),
                fail_sends: AtomicBool::new(false),
            }
        }

        pub fn sent_messages(&self) -> Vec<(String, i64, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Default for RecordingTelegram {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl TelegramApi for RecordingTelegram {
        async fn send_message(
            &self,
            token: &str,
            chat_id: i64,
            text: &str,
        ) -> Result<(), RelayError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(RelayError::Upstream("telegram send failed".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((token.to_string(), chat_id, text.to_string()));
            Ok(())
        }

        async fn set_webhook(&self, token: &str, url: &str) -> Result<(), RelayError> {
            if self.reject_token.load(Ordering::SeqCst) {
                return Err(RelayError::Unauthorized(
                    "Telegram rejected the request: invalid bot token - regenerate it with @BotFather"
                        .into(),
                ));
            }
            self.webhooks
                .lock()
                .unwrap()
                .push((token.to_string(), url.to_string()));
            Ok(())
        }

        async fn get_me(&self, _token: &str) -> Result<String, RelayError> {
            if self.reject_token.load(Ordering::SeqCst) {
                return Err(RelayError::Unauthorized(
                    "Telegram rejected the request: invalid bot token - regenerate it with @BotFather"
                        .into(),
                ));
            }
            Ok("test_bot".to_string())
        }
    }

    pub struct RecordingMeta {
        pub messenger_sent: Mutex<Vec<(String, String, String)>>,
        pub whatsapp_sent: Mutex<Vec<(String, String, String, String)>>,
    }

    impl RecordingMeta {
        pub fn new() -> Self {
            Self {
                messenger_sent: Mutex::new(Vec::new()),
                whatsapp_sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl Default for RecordingMeta {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl MetaApi for RecordingMeta {
        async fn send_messenger(
            &self,
            access_token: &str,
            recipient_psid: &str,
            text: &str,
        ) -> Result<(), RelayError> {
            self.messenger_sent.lock().unwrap().push((
                access_token.to_string(),
                recipient_psid.to_string(),
                text.to_string(),
            ));
            Ok(())
        }

        async fn send_whatsapp(
            &self,
            access_token: &str,
            phone_number_id: &str,
            to: &str,
            text: &str,
        ) -> Result<(), RelayError> {
            self.whatsapp_sent.lock().unwrap().push((
                access_token.to_string(),
                phone_number_id.to_string(),
                to.to_string(),
                text.to_string(),
            ));
            Ok(())
        }
    }

    /// Provider double that records every request and returns a fixed reply.
    pub struct RecordingProvider {
        pub requests: Mutex<Vec<LlmRequest>>,
        pub reply: String,
    }

    impl RecordingProvider {
        pub fn new(reply: &str) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                reply: reply.to_string(),
            }
        }

        pub fn requests(&self) -> Vec<LlmRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn generate(&self, request: &LlmRequest) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.reply.clone())
        }
    }

    /// Everything a test needs: the app state plus concrete handles to the
    /// doubles behind it.
    pub struct TestCtx {
        pub app: Arc<AppState>,
        pub store: Arc<MemoryStore>,
        pub telegram: Arc<RecordingTelegram>,
        pub meta: Arc<RecordingMeta>,
    }

    impl std::ops::Deref for TestCtx {
        type Target = AppState;

        fn deref(&self) -> &AppState {
            &self.app
        }
    }

    pub fn sample_agent() -> Agent {
        Agent {
            id: Uuid::new_v4(),
            name: "Support Bot".into(),
            system_prompt: "You are a helpful support assistant.".into(),
            temperature: 0.7,
            welcome_message: "Hi! How can I help?".into(),
            header_color: "#4f46e5".into(),
            accent_color: "#111827".into(),
            background_color: "#ffffff".into(),
            profile_image: None,
            collect_user_info: false,
            form_fields: Vec::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn telegram_config(agent_id: Uuid) -> ChannelConfig {
        ChannelConfig {
            id: Uuid::new_v4(),
            agent_id,
            platform: Platform::Telegram,
            credential: "tg-bot-token".into(),
            public_id: None,
            verify_token: None,
            phone_number_id: None,
            webhook_url: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn meta_config(agent_id: Uuid) -> ChannelConfig {
        ChannelConfig {
            id: Uuid::new_v4(),
            agent_id,
            platform: Platform::Meta,
            credential: "meta-access-token".into(),
            public_id: Some("meta-app-id".into()),
            verify_token: Some("verify-me".into()),
            phone_number_id: Some("555000111".into()),
            webhook_url: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn discord_config(agent_id: Uuid, public_key_hex: &str) -> ChannelConfig {
        ChannelConfig {
            id: Uuid::new_v4(),
            agent_id,
            platform: Platform::Discord,
            credential: "discord-bot-token".into(),
            public_id: Some(public_key_hex.to_string()),
            verify_token: None,
            phone_number_id: None,
            webhook_url: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn agent_with_form() -> Agent {
        let mut agent = sample_agent();
        agent.collect_user_info = true;
        agent.form_fields = vec![
            FormField {
                name: "name".into(),
                label: "Your name".into(),
                field_type: Some("text".into()),
                required: true,
            },
            FormField {
                name: "email".into(),
                label: "Email".into(),
                field_type: Some("email".into()),
                required: false,
            },
        ];
        agent
    }

    fn build_ctx(generator: ResponseGenerator) -> TestCtx {
        let store = Arc::new(MemoryStore::new());
        let telegram = Arc::new(RecordingTelegram::new());
        let meta = Arc::new(RecordingMeta::new());
        let app = Arc::new(AppState {
            config: AppConfig::for_tests(),
            agents: store.clone(),
            sessions: store.clone(),
            knowledge: store.clone(),
            channel_configs: store.clone(),
            generator,
            telegram: telegram.clone(),
            meta: meta.clone(),
        });
        TestCtx {
            app,
            store,
            telegram,
            meta,
        }
    }

    /// State with one active agent and no provider configured (generation
    /// degrades to the neutral fallback).
    pub async fn state_with_agent() -> (TestCtx, Agent) {
        let ctx = build_ctx(ResponseGenerator::disabled());
        let agent = sample_agent();
        ctx.store.insert_agent(agent.clone()).await;
        (ctx, agent)
    }

    /// State with one active agent and a recording provider.
    pub async fn state_with_agent_and_provider(
    ) -> (TestCtx, Agent, Arc<RecordingProvider>) {
        let provider = Arc::new(RecordingProvider::new("mock reply"));
        let ctx = build_ctx(ResponseGenerator::with_providers(vec![provider.clone()]));
        let agent = sample_agent();
        ctx.store.insert_agent(agent.clone()).await;
        (ctx, agent, provider)
    }
}
