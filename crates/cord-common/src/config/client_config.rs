//! Client configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file if present).

use cord_core::Intents;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Main client configuration
#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    /// Bot token, sent as `Authorization: Bot <token>` and in Identify/Resume
    pub token: String,
    pub app: AppSettings,
    pub gateway: GatewayConfig,
    pub rest: RestConfig,
}

// Keep the token out of logs
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("token", &"<redacted>")
            .field("app", &self.app)
            .field("gateway", &self.gateway)
            .field("rest", &self.rest)
            .finish()
    }
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// How many shards to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShardCount {
    /// Use the count recommended by the remote
    #[default]
    Auto,
    /// Use exactly this many shards
    Fixed(u32),
}

impl FromStr for ShardCount {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        match s.parse::<u32>() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidValue("SHARD_COUNT", s.to_string())),
            Ok(n) => Ok(Self::Fixed(n)),
        }
    }
}

impl fmt::Display for ShardCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Fixed(n) => write!(f, "{n}"),
        }
    }
}

/// Gateway session and shard settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Gateway protocol version appended to the connect URL
    #[serde(default = "default_gateway_version")]
    pub version: u8,
    #[serde(default)]
    pub shard_count: ShardCount,
    /// Intents requested in addition to those implied by registered handlers
    #[serde(default = "Intents::empty")]
    pub extra_intents: Intents,
    /// Member count above which offline members are omitted from GUILD_CREATE
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u16,
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    /// Consecutive failed connect attempts before a shard gives up
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    /// Times a failed shard is respawned by the coordinator
    #[serde(default = "default_max_shard_restarts")]
    pub max_shard_restarts: u32,
    #[serde(default = "default_shard_spawn_delay_ms")]
    pub shard_spawn_delay_ms: u64,
    /// Refill interval of an identify bucket
    #[serde(default = "default_identify_interval_ms")]
    pub identify_interval_ms: u64,
    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl GatewayConfig {
    #[must_use]
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    #[must_use]
    pub fn shard_spawn_delay(&self) -> Duration {
        Duration::from_millis(self.shard_spawn_delay_ms)
    }

    #[must_use]
    pub fn identify_interval(&self) -> Duration {
        Duration::from_millis(self.identify_interval_ms)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: default_gateway_version(),
            shard_count: ShardCount::Auto,
            extra_intents: Intents::empty(),
            large_threshold: default_large_threshold(),
            hello_timeout_ms: default_hello_timeout_ms(),
            max_connect_attempts: default_max_connect_attempts(),
            max_shard_restarts: default_max_shard_restarts(),
            shard_spawn_delay_ms: default_shard_spawn_delay_ms(),
            identify_interval_ms: default_identify_interval_ms(),
            dispatch_queue_capacity: default_dispatch_queue_capacity(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// REST client settings
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Retries for 429 and 5xx responses before giving up
    #[serde(default = "default_rest_max_retries")]
    pub max_retries: u32,
    /// Global request budget per second across all routes
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl RestConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            max_retries: default_rest_max_retries(),
            global_requests_per_second: default_global_requests_per_second(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "cord".to_string()
}

fn default_api_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_gateway_version() -> u8 {
    10
}

fn default_large_threshold() -> u16 {
    50
}

fn default_hello_timeout_ms() -> u64 {
    20_000
}

fn default_max_connect_attempts() -> u32 {
    10
}

fn default_max_shard_restarts() -> u32 {
    3
}

fn default_shard_spawn_delay_ms() -> u64 {
    1_000
}

fn default_identify_interval_ms() -> u64 {
    5_000
}

fn default_dispatch_queue_capacity() -> usize {
    256
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_rest_max_retries() -> u32 {
    3
}

fn default_global_requests_per_second() -> u32 {
    50
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

impl ClientConfig {
    /// Build a configuration with defaults for everything but the token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            app: AppSettings {
                name: default_app_name(),
                env: Environment::default(),
            },
            gateway: GatewayConfig::default(),
            rest: RestConfig::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `BOT_TOKEN` is missing or a variable fails to parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let token = env::var("BOT_TOKEN").map_err(|_| ConfigError::MissingVar("BOT_TOKEN"))?;
        if token.trim().is_empty() {
            return Err(ConfigError::InvalidValue("BOT_TOKEN", String::new()));
        }

        let defaults = GatewayConfig::default();
        let rest_defaults = RestConfig::default();

        Ok(Self {
            token: token.trim().to_string(),
            app: AppSettings {
                name: env::var("APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: env::var("APP_ENV")
                    .ok()
                    .and_then(|s| Environment::parse(&s))
                    .unwrap_or_default(),
            },
            gateway: GatewayConfig {
                version: parse_var("GATEWAY_VERSION")?.unwrap_or(defaults.version),
                shard_count: parse_var("SHARD_COUNT")?.unwrap_or(defaults.shard_count),
                extra_intents: env::var("GATEWAY_INTENTS")
                    .ok()
                    .map(|s| {
                        Intents::parse(&s)
                            .map_err(|_| ConfigError::InvalidValue("GATEWAY_INTENTS", s))
                    })
                    .transpose()?
                    .unwrap_or(defaults.extra_intents),
                large_threshold: parse_var("LARGE_THRESHOLD")?.unwrap_or(defaults.large_threshold),
                hello_timeout_ms: parse_var("HELLO_TIMEOUT_MS")?
                    .unwrap_or(defaults.hello_timeout_ms),
                max_connect_attempts: parse_var("MAX_CONNECT_ATTEMPTS")?
                    .unwrap_or(defaults.max_connect_attempts),
                max_shard_restarts: parse_var("MAX_SHARD_RESTARTS")?
                    .unwrap_or(defaults.max_shard_restarts),
                shard_spawn_delay_ms: parse_var("SHARD_SPAWN_DELAY_MS")?
                    .unwrap_or(defaults.shard_spawn_delay_ms),
                identify_interval_ms: parse_var("IDENTIFY_INTERVAL_MS")?
                    .unwrap_or(defaults.identify_interval_ms),
                dispatch_queue_capacity: parse_var("DISPATCH_QUEUE_CAPACITY")?
                    .unwrap_or(defaults.dispatch_queue_capacity),
                shutdown_grace_ms: parse_var("SHUTDOWN_GRACE_MS")?
                    .unwrap_or(defaults.shutdown_grace_ms),
            },
            rest: RestConfig {
                base_url: env::var("API_BASE_URL").unwrap_or(rest_defaults.base_url),
                max_retries: parse_var("REST_MAX_RETRIES")?.unwrap_or(rest_defaults.max_retries),
                global_requests_per_second: parse_var("REST_GLOBAL_REQUESTS_PER_SECOND")?
                    .unwrap_or(rest_defaults.global_requests_per_second),
                request_timeout_secs: parse_var("REST_REQUEST_TIMEOUT_SECS")?
                    .unwrap_or(rest_defaults.request_timeout_secs),
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
