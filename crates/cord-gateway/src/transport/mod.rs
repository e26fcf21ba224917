//! Message transport
//!
//! A session talks to the gateway through a [`Transport`] opened by a [`Connector`]. The production
//! implementation runs over `tokio-tungstenite`; [`memory`] provides an in-process pair for tests.

pub mod memory;
mod websocket;

use async_trait::async_trait;
use cord_common::ClientError;

pub use websocket::{WebSocketConnector, WebSocketTransport};

/// Frame received from the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON text frame
    Text(String),
    /// Close frame; `None` when the peer closed without a code
    Close(Option<CloseFrame>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection closed")]
    Closed,
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::TransientNetwork(err.to_string())
    }
}

/// Bidirectional text transport for one gateway connection
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next frame; `None` when the stream ended without a close frame.
    ///
    /// Must be cancel safe: it is raced against timers in `select!`.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    /// Close with the given code
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Opens transports
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}
