use serde::Deserialize;
use service_core::config::{self as core_config, get_env, get_env_parsed, Environment};
use service_core::error::AppError;
use std::env;
use std::time::Duration;

const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "deepseek/deepseek-chat-v3.1:free";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub client_url: Option<String>,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub relay: RelayConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub default_max_tokens: u32,
    pub default_temperature: f32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Period of the checkpoint timer.
    pub checkpoint_interval_ms: u64,
    /// Hard ceiling on one streamed reply.
    pub stream_timeout_secs: u64,
    /// Frames buffered between the relay and a slow client.
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl ChatConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let environment = Environment::current();

        Ok(ChatConfig {
            common: common_config,
            service_name: get_env("SERVICE_NAME", Some("chat-service"), environment)?,
            log_level: get_env("LOG_LEVEL", Some("info"), environment)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            client_url: env::var("CLIENT_URL").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, environment)?,
                max_connections: get_env_parsed("DATABASE_MAX_CONNECTIONS", 10, environment)?,
                min_connections: get_env_parsed("DATABASE_MIN_CONNECTIONS", 1, environment)?,
            },
            provider: ProviderConfig {
                api_key: get_env("OPENROUTER_API_KEY", None, environment)?,
                base_url: get_env(
                    "OPENROUTER_BASE_URL",
                    Some(DEFAULT_OPENROUTER_BASE_URL),
                    environment,
                )?,
                default_model: get_env("PROVIDER_DEFAULT_MODEL", Some(DEFAULT_MODEL), environment)?,
                default_max_tokens: get_env_parsed(
                    "PROVIDER_DEFAULT_MAX_TOKENS",
                    1000,
                    environment,
                )?,
                default_temperature: get_env_parsed(
                    "PROVIDER_DEFAULT_TEMPERATURE",
                    1.0,
                    environment,
                )?,
                request_timeout_secs: get_env_parsed(
                    "PROVIDER_REQUEST_TIMEOUT_SECS",
                    120,
                    environment,
                )?,
            },
            relay: RelayConfig {
                checkpoint_interval_ms: get_env_parsed(
                    "RELAY_CHECKPOINT_INTERVAL_MS",
                    1000,
                    environment,
                )?,
                stream_timeout_secs: get_env_parsed("RELAY_STREAM_TIMEOUT_SECS", 300, environment)?,
                channel_capacity: get_env_parsed("RELAY_CHANNEL_CAPACITY", 32, environment)?,
            },
            auth: AuthConfig {
                jwt_secret: get_env("JWT_SECRET", None, environment)?,
            },
        })
    }
}

impl RelayConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms.max(1))
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_ms: 1000,
            stream_timeout_secs: 300,
            channel_capacity: 32,
        }
    }
}
