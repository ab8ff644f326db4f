//! Transport Channel: duplex, message-oriented connection to the server
//!
//! A [`Connector`] opens a [`TransportChannel`]. The channel moves opaque
//! frames; it never reconnects on its own. Background reader/writer tasks
//! (if any) are owned by the channel and torn down when it is closed or
//! dropped.

pub mod memory;
pub mod websocket;

pub use memory::{MemoryConnector, MemoryListener, MemoryServerConn};
pub use websocket::WebSocketConnector;

use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

/// How long `close()` waits for queued frames to flush
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Something received on a transport channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete frame
    Message(Vec<u8>),
    /// The connection ended (peer close or error)
    Closed(Option<String>),
}

/// Opens transport channels
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a channel to `url`
    ///
    /// Fails with `Error::Connect` on transport failure and `Error::Auth`
    /// when the server rejects the handshake for credential reasons.
    async fn open(&self, url: &Url) -> Result<TransportChannel>;
}

/// An open duplex channel
pub struct TransportChannel {
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    incoming: mpsc::UnboundedReceiver<TransportEvent>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl TransportChannel {
    /// Channel backed directly by in-process queues
    pub fn new(
        outgoing: mpsc::UnboundedSender<Vec<u8>>,
        incoming: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            outgoing: Some(outgoing),
            incoming,
            writer: None,
            reader: None,
        }
    }

    /// Channel whose queues are pumped by background tasks
    pub fn with_tasks(
        outgoing: mpsc::UnboundedSender<Vec<u8>>,
        incoming: mpsc::UnboundedReceiver<TransportEvent>,
        writer: JoinHandle<()>,
        reader: JoinHandle<()>,
    ) -> Self {
        Self {
            outgoing: Some(outgoing),
            incoming,
            writer: Some(writer),
            reader: Some(reader),
        }
    }

    /// Queue a frame for sending
    pub fn send(&self, frame: Vec<u8>) -> Result<()> {
        let outgoing = self.outgoing.as_ref().ok_or(Error::NotConnected)?;
        outgoing.send(frame).map_err(|_| Error::NotConnected)
    }

    /// Receive the next event; `None` once the channel is exhausted
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.incoming.recv().await
    }

    /// Flush queued frames (bounded wait) and tear the channel down
    pub async fn close(mut self) {
        // Dropping the sender lets the writer drain and exit.
        self.outgoing.take();

        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer)
                .await
                .is_err()
            {
                debug!("Transport writer did not flush in time, aborting");
                writer.abort();
            }
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportChannel")
            .field("open", &self.outgoing.is_some())
            .field("background_tasks", &self.writer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_send_recv() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let mut channel = TransportChannel::new(out_tx, in_rx);

        channel.send(b"hello".to_vec()).unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), b"hello".to_vec());

        in_tx.send(TransportEvent::Message(b"world".to_vec())).unwrap();
        assert_eq!(
            channel.recv().await,
            Some(TransportEvent::Message(b"world".to_vec()))
        );

        drop(in_tx);
        assert_eq!(channel.recv().await, None);
    }

    #[tokio::test]
    async fn test_send_after_peer_gone_fails() {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let channel = TransportChannel::new(out_tx, in_rx);

        drop(out_rx);
        assert!(matches!(channel.send(vec![1]), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_stops_background_tasks() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();

        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();

        let writer = tokio::spawn(async move { while out_rx.recv().await.is_some() {} });
        let reader = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await
        });

        let channel = TransportChannel::with_tasks(out_tx, in_rx, writer, reader);
        channel.close().await;

        // The reader future is dropped on abort, which drops the sender.
        assert!(alive_rx.await.is_err());
    }
}
