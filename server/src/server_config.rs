use config::Config;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::{env, fmt, path::Path, time::Duration};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct PromptLimits {
    pub rate_limit_per_sec: usize,
    pub refill_interval_ms: usize,
    pub refill_amount: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub temperature: f64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    #[serde(default)]
    pub ollama_model: String,
    pub limits: PromptLimits,
}

impl LlmConfig {
    pub fn ollama_model(&self) -> Option<&str> {
        Some(self.ollama_model.as_str()).filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub gmail_pubsub_topic: String,
    pub graph_notification_url: String,
}

impl ProvidersConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_backoff_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub deferred_poll_secs: u64,
    pub inbound_lookback_minutes: i64,
    pub max_messages_per_notification: u32,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    llm: LlmConfig,
    providers: ProvidersConfig,
    webhook: WebhookConfig,
    engine: EngineConfig,
}

#[derive(Debug)]
pub struct ServerConfig {
    pub llm: LlmConfig,
    pub providers: ProvidersConfig,
    pub webhook: WebhookConfig,
    pub engine: EngineConfig,
    pub llm_api_key: String,
    pub token_encryption_key: String,
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM: {} {} via {}\nProviders: timeout {}s, {} retries\nWebhook timeout: {}s\nEngine: {:?}",
            self.llm.provider,
            self.llm.model,
            self.llm.endpoint,
            self.providers.request_timeout_secs,
            self.providers.max_retries,
            self.webhook.timeout_secs,
            self.engine,
        )
    }
}

fn config_root() -> String {
    env::var("APP_DIR").unwrap_or_else(|_| {
        let dir =
            env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR or APP_DIR is required");
        let dir = Path::new(&dir)
            .parent()
            .expect("Failed to get parent dir")
            .display()
            .to_string();
        format!("{}/config", dir)
    })
}

fn load_config_file(root: &str) -> Result<ConfigFile, config::ConfigError> {
    let path = format!("{root}/config.toml");
    Config::builder()
        .add_source(config::File::with_name(&path))
        .build()?
        .try_deserialize()
}

lazy_static! {
    pub static ref cfg: ServerConfig = {
        let ConfigFile {
            llm,
            providers,
            webhook,
            engine,
        } = load_config_file(&config_root()).expect("config.toml is missing or invalid");

        ServerConfig {
            llm,
            providers,
            webhook,
            engine,
            llm_api_key: env::var("LLM_API_KEY").unwrap_or_default(),
            token_encryption_key: env::var("TOKEN_ENCRYPTION_KEY")
                .expect("TOKEN_ENCRYPTION_KEY is required"),
        }
    };
}
