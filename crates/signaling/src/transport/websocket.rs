//! WebSocket transport over tokio-tungstenite

use super::{Connector, TransportChannel, TransportEvent};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens signaling channels over WebSocket (ws:// or wss://)
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<TransportChannel> {
        info!("Connecting to signaling server: {}", redact(url));

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(map_connect_error)?;

        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(sender_task(write, out_rx));
        let reader = tokio::spawn(receiver_task(read, in_tx));

        Ok(TransportChannel::with_tasks(out_tx, in_rx, writer, reader))
    }
}

/// Sender task: sends frames from the channel to the WebSocket
async fn sender_task(
    mut write: futures::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(frame) = rx.recv().await {
        let msg = match String::from_utf8(frame) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        if let Err(e) = write.send(msg).await {
            error!("Failed to send WebSocket message: {}", e);
            break;
        }
    }

    // Initiates the close handshake; the peer may already be gone.
    let _ = write.close().await;
    debug!("Sender task terminated");
}

/// Receiver task: forwards WebSocket frames into the channel
async fn receiver_task(
    mut read: futures::stream::SplitStream<WsStream>,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let reason = loop {
        let Some(msg_result) = read.next().await else {
            break None;
        };
        let event = match msg_result {
            Ok(Message::Text(text)) => TransportEvent::Message(text.into_bytes()),
            Ok(Message::Binary(bytes)) => TransportEvent::Message(bytes),
            Ok(Message::Close(frame)) => {
                info!("WebSocket connection closed");
                break frame.map(|f| f.reason.to_string());
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                break Some(e.to_string());
            }
            _ => continue,
        };
        if tx.send(event).is_err() {
            debug!("Channel owner gone, stopping receiver");
            return;
        }
    };

    let _ = tx.send(TransportEvent::Closed(reason));
    debug!("Receiver task terminated");
}

fn map_connect_error(e: tungstenite::Error) -> Error {
    match e {
        tungstenite::Error::Http(response)
            if response.status() == 401 || response.status() == 403 =>
        {
            Error::Auth(format!("server returned {}", response.status()))
        }
        tungstenite::Error::Io(io) => Error::Connect(format!("Failed to connect: {}", io)),
        other => Error::Connect(format!("Failed to connect: {}", other)),
    }
}

/// URL with the access token removed, for logs
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "access_token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}
