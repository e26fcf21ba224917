//! # cord-common
//!
//! Shared utilities including configuration, error handling, retry backoff, and telemetry.

pub mod config;
pub mod error;
pub mod retry;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    AppSettings, ClientConfig, ConfigError, Environment, GatewayConfig, RestConfig, ShardCount,
};
pub use error::{ClientError, ClientResult};
pub use retry::Backoff;
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
