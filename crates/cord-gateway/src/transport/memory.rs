//! In-process transport
//!
//! [`MemoryConnector`] hands every opened connection's far end to the test as a [`MemoryPeer`],
//! which plays the gateway: it pushes frames to the session and reads what the session sent.

use super::{CloseFrame, Connector, Frame, Transport, TransportError};
use crate::protocol::GatewayMessage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

/// What the client wrote to a [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Text(String),
    Close(u16),
}

/// Gateway side of an in-process connection
#[derive(Debug)]
pub struct MemoryPeer {
    pub url: String,
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<PeerEvent>,
}

impl MemoryPeer {
    /// Push a frame to the client. Returns false once the client dropped the connection.
    pub fn send(&self, message: &GatewayMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.to_client.send(Frame::Text(json)).is_ok(),
            Err(_) => false,
        }
    }

    /// Push raw text, e.g. malformed JSON
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Frame::Text(text.into())).is_ok()
    }

    /// Close the connection from the gateway side with `code`
    pub fn close(&self, code: u16) -> bool {
        self.to_client
            .send(Frame::Close(Some(CloseFrame {
                code,
                reason: String::new(),
            })))
            .is_ok()
    }

    /// Next thing the client wrote; `None` once the client dropped the connection
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.from_client.recv().await
    }

    /// Next frame the client wrote, decoded. `None` on close or disconnect.
    pub async fn recv_message(&mut self) -> Option<GatewayMessage> {
        match self.recv().await? {
            PeerEvent::Text(text) => GatewayMessage::from_json(&text).ok(),
            PeerEvent::Close(_) => None,
        }
    }
}

/// Client side of an in-process connection
#[derive(Debug)]
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<PeerEvent>,
}

/// Create a connected transport/peer pair
pub fn pair(url: impl Into<String>) -> (MemoryTransport, MemoryPeer) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    (
        MemoryTransport { inbound, outbound },
        MemoryPeer {
            url: url.into(),
            to_client,
            from_client,
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(PeerEvent::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16, _reason: &str) -> Result<(), TransportError> {
        // The peer may already be gone; closing is still a success from the client's view.
        let _ = self.outbound.send(PeerEvent::Close(code));
        self.inbound.close();
        Ok(())
    }
}

/// Connector producing in-process connections
#[derive(Debug)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    failures: AtomicU32,
    urls: Mutex<Vec<String>>,
}

impl MemoryConnector {
    /// Connector plus the stream of peers for every successful connect
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (accepted, peers) = mpsc::unbounded_channel();
        (
            Self {
                accepted,
                failures: AtomicU32::new(0),
                urls: Mutex::new(Vec::new()),
            },
            peers,
        )
    }

    /// Make the next `count` connects fail
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Every URL a connect was attempted on, in order
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.urls.lock().push(url.to_string());

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Connect(format!("refused: {url}")));
        }

        let (transport, peer) = pair(url);
        self.accepted
            .send(peer)
            .map_err(|_| TransportError::Connect("no gateway listening".to_string()))?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (mut transport, mut peer) = pair("mem://gw");
        assert!(peer.send(&GatewayMessage::hello(1_000)));
        match transport.recv().await {
            Some(Ok(Frame::Text(text))) => assert!(text.contains("heartbeat_interval")),
            other => panic!("unexpected {other:?}"),
        }

        transport.send("{\"op\":1,\"d\":null}".to_string()).await.unwrap();
        let message = peer.recv_message().await.unwrap();
        assert_eq!(message.as_heartbeat_seq(), Some(None));

        transport.close(1000, "bye").await.unwrap();
        assert_eq!(peer.recv().await, Some(PeerEvent::Close(1000)));
    }

    #[tokio::test]
    async fn test_dropped_peer_ends_stream() {
        let (mut transport, peer) = pair("mem://gw");
        drop(peer);
        assert!(transport.recv().await.is_none());
        assert!(transport.send("x".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_connector_failures_and_urls() {
        let (connector, mut peers) = MemoryConnector::channel();
        connector.fail_next(1);

        assert!(connector.connect("mem://a").await.is_err());
        assert!(connector.connect("mem://b").await.is_ok());
        assert_eq!(peers.recv().await.map(|p| p.url), Some("mem://b".to_string()));
        assert_eq!(connector.urls(), vec!["mem://a".to_string(), "mem://b".to_string()]);
    }
}
