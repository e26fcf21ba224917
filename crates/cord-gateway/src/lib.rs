//! # cord-gateway
//!
//! Gateway client: per-shard session state machines, the shard coordinator that boots and
//! supervises them, and the event dispatcher that runs registered handlers.
//!
//! ```no_run
//! use cord_common::{ClientConfig, ShardCount};
//! use cord_gateway::{EventDispatcher, ShardCoordinator, WebSocketConnector};
//! use cord_http::RestClient;
//! use cord_ratelimit::RateLimiter;
//! use std::sync::Arc;
//!
//! # async fn boot() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let limiter = Arc::new(RateLimiter::default());
//! let rest = Arc::new(RestClient::new(&config, Arc::clone(&limiter))?);
//!
//! let dispatcher = Arc::new(EventDispatcher::default());
//! dispatcher.register_handler("MESSAGE_CREATE", |event| async move {
//!     println!("message on shard {}", event.shard_id);
//!     Ok(())
//! });
//!
//! let coordinator =
//!     ShardCoordinator::new(config, rest, Arc::new(WebSocketConnector), limiter, dispatcher);
//! coordinator.start(ShardCount::Auto).await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod protocol;
pub mod session;
pub mod shard;
pub mod transport;

pub use dispatch::{DispatchEvent, EventDispatcher, WILDCARD};
pub use session::{ExitReason, Session, SessionConfig, SessionState, ShardExit, ShardHandle};
pub use shard::{shard_for_guild, ShardAssignment, ShardCoordinator, ShardStatus};
pub use transport::{Connector, Transport, WebSocketConnector};
