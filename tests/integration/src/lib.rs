//! Integration test utilities for the gateway client
//!
//! This crate runs the client against local stand-ins for the remote service: a WebSocket
//! gateway served with `tokio-tungstenite` and a scripted HTTP API on a raw TCP socket.

pub mod api;
pub mod gateway;

pub use api::{MockApi, MockResponse, RecordedRequest};
pub use gateway::{GatewayConnection, Inbound, MockGateway};

use std::time::Duration;

/// Upper bound for any single wait in the integration tests
pub const WAIT: Duration = Duration::from_secs(5);
