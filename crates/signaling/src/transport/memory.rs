//! In-process transport
//!
//! [`MemoryConnector`] hands every opened channel to a [`MemoryListener`],
//! which plays the server side. Used to embed a signaling server in the
//! same process and to script servers in tests.

use super::{Connector, TransportChannel, TransportEvent};
use crate::protocol::{self, SignalRequest, SignalResponse};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

/// Client side of the in-process transport
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryServerConn>,
    online: Arc<AtomicBool>,
    opened: Arc<AtomicU32>,
}

/// Server side: yields one connection per successful `open`
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryServerConn>,
}

/// Server end of one in-process channel
#[derive(Debug)]
pub struct MemoryServerConn {
    url: Url,
    from_client: mpsc::UnboundedReceiver<Vec<u8>>,
    to_client: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryConnector {
    /// Create a connector and the listener that receives its connections
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                online: Arc::new(AtomicBool::new(true)),
                opened: Arc::new(AtomicU32::new(0)),
            },
            MemoryListener { accept_rx },
        )
    }

    /// Make subsequent `open` calls fail (`false`) or succeed (`true`)
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of channels opened so far
    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &Url) -> Result<TransportChannel> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::Connect("memory transport offline".to_string()));
        }

        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();

        self.accept_tx
            .send(MemoryServerConn {
                url: url.clone(),
                from_client,
                to_client,
            })
            .map_err(|_| Error::Connect("memory listener dropped".to_string()))?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!(path = url.path(), "Opened in-memory channel");

        Ok(TransportChannel::new(client_tx, client_rx))
    }
}

impl MemoryListener {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<MemoryServerConn> {
        self.accept_rx.recv().await
    }
}

impl MemoryServerConn {
    /// URL the client connected to
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Value of a query parameter on the connect URL
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Next raw frame from the client; `None` once the client closed
    pub async fn recv_frame(&mut self) -> Option<Vec<u8>> {
        self.from_client.recv().await
    }

    /// Next decoded request from the client; `None` once the client closed
    pub async fn recv_request(&mut self) -> Option<Result<SignalRequest>> {
        let frame = self.from_client.recv().await?;
        Some(protocol::decode_request(&frame))
    }

    /// Send a typed response
    pub fn send_response(&self, response: &SignalResponse) -> Result<()> {
        self.send_frame(protocol::encode_response(response)?)
    }

    /// Send raw bytes (possibly malformed)
    pub fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        self.to_client
            .send(TransportEvent::Message(frame))
            .map_err(|_| Error::NotConnected)
    }

    /// Whether the client end is still open
    pub fn is_client_open(&self) -> bool {
        !self.to_client.is_closed()
    }

    /// Close the connection from the server side
    pub fn disconnect(self, reason: Option<&str>) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed(reason.map(str::to_string)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LeaveRequest;

    #[tokio::test]
    async fn test_open_and_exchange() {
        let (connector, mut listener) = MemoryConnector::new();
        let url = Url::parse("ws://memory/rtc?access_token=t").unwrap();

        let mut channel = connector.open(&url).await.unwrap();
        let mut server = listener.accept().await.unwrap();
        assert_eq!(server.query("access_token").as_deref(), Some("t"));

        let frame = protocol::encode_request(&SignalRequest::Leave(LeaveRequest::default())).unwrap();
        channel.send(frame).unwrap();
        let request = server.recv_request().await.unwrap().unwrap();
        assert_eq!(request.kind(), "leave");

        server.send_response(&SignalResponse::Pong(1)).unwrap();
        match channel.recv().await.unwrap() {
            TransportEvent::Message(bytes) => {
                assert_eq!(protocol::decode_response(&bytes).unwrap(), SignalResponse::Pong(1));
            }
            other => panic!("unexpected event {:?}", other),
        }

        server.disconnect(Some("bye"));
        assert_eq!(
            channel.recv().await,
            Some(TransportEvent::Closed(Some("bye".to_string())))
        );
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test]
    async fn test_offline_connector_fails() {
        let (connector, _listener) = MemoryConnector::new();
        connector.set_online(false);

        let url = Url::parse("ws://memory/rtc").unwrap();
        let err = connector.open(&url).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(connector.opened(), 0);
    }

    #[tokio::test]
    async fn test_client_drop_is_visible_to_server() {
        let (connector, mut listener) = MemoryConnector::new();
        let url = Url::parse("ws://memory/rtc").unwrap();

        let channel = connector.open(&url).await.unwrap();
        let mut server = listener.accept().await.unwrap();
        drop(channel);

        assert!(server.recv_frame().await.is_none());
        assert!(!server.is_client_open());
    }
}
