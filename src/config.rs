use log::{info, warn};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used when registering webhooks.
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    /// Hard bound on any single provider call.
    pub request_timeout: Duration,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    /// SQLite database path. Unset means the in-memory store (ephemeral).
    pub database_path: Option<String>,
    /// Shared secret authenticating the internal Discord gateway relay.
    pub backend_secret: Option<String>,
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> Self {
        let host = env_str("RELAY_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = env_str("RELAY_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let public_base_url = env_str("RELAY_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://{host}:{port}"));

        let timeout_secs = env_str("LLM_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10u64);

        Self {
            server: ServerConfig {
                host,
                port,
                public_base_url,
            },
            llm: LlmConfig {
                openai_api_key: env_str("OPENAI_API_KEY"),
                openai_base_url: env_str("OPENAI_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                openai_model: env_str("OPENAI_MODEL")
                    .unwrap_or_else(|| "gpt-4o-mini".to_string()),
                anthropic_api_key: env_str("ANTHROPIC_API_KEY"),
                anthropic_model: env_str("ANTHROPIC_MODEL")
                    .unwrap_or_else(|| "claude-3-5-haiku-latest".to_string()),
                request_timeout: Duration::from_secs(timeout_secs),
                max_tokens: env_str("LLM_MAX_TOKENS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
            },
            database_path: env_str("DATABASE_PATH"),
            backend_secret: env_str("BACKEND_SHARED_SECRET"),
        }
    }

    /// Log what is configured so a misconfigured deployment is obvious at
    /// startup. Missing provider keys are not fatal: generation degrades to
    /// the neutral fallback instead.
    pub fn log_summary(&self) {
        info!(
            "listening on {}:{} (public base {})",
            self.server.host, self.server.port, self.server.public_base_url
        );
        match self.database_path.as_deref() {
            Some(path) => info!("storage: sqlite at {path}"),
            None => warn!("DATABASE_PATH not set, using in-memory storage (data is ephemeral)"),
        }
        if self.llm.openai_api_key.is_none() && self.llm.anthropic_api_key.is_none() {
            warn!("no LLM provider key configured, replies will use the neutral fallback");
        }
        if self.backend_secret.is_none() {
            warn!("BACKEND_SHARED_SECRET not set, /discord/respond relay is disabled");
        }
    }
}

impl AppConfig {
    /// Minimal config for tests: no providers, no database, a fixed secret.
    pub fn for_tests() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                public_base_url: "http://127.0.0.1:0".to_string(),
            },
            llm: LlmConfig {
                openai_api_key: None,
                openai_base_url: "http://127.0.0.1:0".to_string(),
                openai_model: "test-model".to_string(),
                anthropic_api_key: None,
                anthropic_model: "test-model".to_string(),
                request_timeout: Duration::from_secs(1),
                max_tokens: 64,
            },
            database_path: None,
            backend_secret: Some("test-backend-secret".to_string()),
        }
    }
}
