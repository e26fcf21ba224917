//! Local WebSocket gateway
//!
//! Every accepted connection is handed to the test as a [`GatewayConnection`], which plays the
//! remote side of the protocol frame by frame.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cord_gateway::protocol::{GatewayMessage, OpCode};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

/// WebSocket server accepting gateway connections on a random local port
pub struct MockGateway {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<GatewayConnection>,
    _handle: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, connections) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(connection) = GatewayConnection::accept(stream).await {
                        let _ = tx.send(connection);
                    }
                });
            }
        });

        Ok(Self {
            addr,
            connections,
            _handle: handle,
        })
    }

    /// `ws://` URL of the server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the client to open the next connection
    pub async fn next_connection(&mut self, within: Duration) -> Result<GatewayConnection> {
        tokio::time::timeout(within, self.connections.recv())
            .await
            .context("no connection within the deadline")?
            .context("gateway listener stopped")
    }
}

/// What the client sent on a connection
#[derive(Debug)]
pub enum Inbound {
    Message(GatewayMessage),
    /// Close frame code, `None` when the client dropped without one
    Close(Option<u16>),
}

/// Server side of one accepted connection
pub struct GatewayConnection {
    /// Request path and query the client connected with
    pub path: String,
    stream: WebSocketStream<TcpStream>,
}

impl GatewayConnection {
    async fn accept(stream: TcpStream) -> Result<Self> {
        let mut path = String::new();
        let stream = accept_hdr_async(stream, |request: &Request, response: Response| {
            path = request.uri().to_string();
            Ok::<Response, ErrorResponse>(response)
        })
        .await?;
        Ok(Self { path, stream })
    }

    pub async fn send(&mut self, message: &GatewayMessage) -> Result<()> {
        self.stream.send(Message::Text(message.to_json()?)).await?;
        Ok(())
    }

    /// Close from the server side with `code`
    pub async fn close(&mut self, code: u16) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Borrowed(""),
        };
        self.stream.close(Some(frame)).await?;
        Ok(())
    }

    /// Next frame from the client
    pub async fn next_frame(&mut self, within: Duration) -> Result<Inbound> {
        loop {
            let next = tokio::time::timeout(within, self.stream.next())
                .await
                .context("client sent nothing within the deadline")?;

            match next {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Inbound::Message(GatewayMessage::from_json(&text)?));
                }
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Inbound::Close(frame.map(|frame| u16::from(frame.code))));
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return Ok(Inbound::Close(None)),
            }
        }
    }

    /// Next frame with opcode `op`, acknowledging heartbeats on the way
    pub async fn expect_op(&mut self, op: OpCode, within: Duration) -> Result<GatewayMessage> {
        loop {
            match self.next_frame(within).await? {
                Inbound::Message(message) if message.op == op => return Ok(message),
                Inbound::Message(message) if message.op == OpCode::Heartbeat => {
                    self.send(&GatewayMessage::heartbeat_ack()).await?;
                }
                Inbound::Message(message) => bail!("expected {op:?}, got {:?}", message.op),
                Inbound::Close(code) => bail!("expected {op:?}, connection closed with {code:?}"),
            }
        }
    }

    /// Wait for the client's close frame, acknowledging heartbeats and skipping other frames
    pub async fn expect_close(&mut self, within: Duration) -> Result<Option<u16>> {
        loop {
            match self.next_frame(within).await? {
                Inbound::Message(message) if message.op == OpCode::Heartbeat => {
                    self.send(&GatewayMessage::heartbeat_ack()).await?;
                }
                Inbound::Message(_) => {}
                Inbound::Close(code) => return Ok(code),
            }
        }
    }
}
