//! # cord-core
//!
//! Domain layer shared by the REST client and the gateway: snowflake IDs, gateway intents,
//! and dispatch event types. Has no dependency on networking or runtime crates.

pub mod events;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use events::EventType;
pub use value_objects::{Intents, Snowflake, SnowflakeParseError};
