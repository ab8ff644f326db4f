//! Open a channel and complete the join handshake

use crate::config::SignalingConfig;
use crate::protocol::{self, JoinRequest, JoinResponse, SignalRequest, SignalResponse};
use crate::transport::{Connector, TransportChannel, TransportEvent};
use crate::{Error, Result};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Open a channel, send the join request and wait for the join response
///
/// Transport open and join share one deadline of `join_timeout`. The
/// channel is closed on every error path.
#[instrument(skip(config, connector, token), fields(room = %config.room, resume = resume_sid.is_some()))]
pub(crate) async fn open_and_join(
    config: &SignalingConfig,
    connector: &dyn Connector,
    token: &str,
    resume_sid: Option<&str>,
) -> Result<(TransportChannel, JoinResponse)> {
    let url = config.connect_url(token, resume_sid)?;
    let deadline = Instant::now() + config.join_timeout();

    let mut channel = tokio::time::timeout_at(deadline, connector.open(&url))
        .await
        .map_err(|_| Error::Timeout("transport open timed out".to_string()))??;

    let request = SignalRequest::Join(JoinRequest {
        room: config.room.clone(),
        reconnect: resume_sid.is_some(),
        participant_sid: resume_sid.map(str::to_string),
        auto_subscribe: config.auto_subscribe,
    });

    let sent = protocol::encode_request(&request).and_then(|frame| {
        channel
            .send(frame)
            .map_err(|_| Error::Connect("connection closed before join request".to_string()))
    });
    if let Err(e) = sent {
        channel.close().await;
        return Err(e);
    }

    match tokio::time::timeout_at(deadline, await_join(&mut channel)).await {
        Ok(Ok(response)) => Ok((channel, response)),
        Ok(Err(e)) => {
            channel.close().await;
            Err(e)
        }
        Err(_) => {
            channel.close().await;
            Err(Error::Timeout(format!(
                "no join response within {:?}",
                config.join_timeout()
            )))
        }
    }
}

async fn await_join(channel: &mut TransportChannel) -> Result<JoinResponse> {
    while let Some(event) = channel.recv().await {
        let frame = match event {
            TransportEvent::Message(frame) => frame,
            TransportEvent::Closed(reason) => {
                return Err(Error::Connect(format!(
                    "connection closed before join response: {}",
                    reason.unwrap_or_else(|| "no reason".to_string())
                )))
            }
        };

        match protocol::decode_response(&frame) {
            Ok(SignalResponse::Join(response)) => return Ok(response),
            Ok(SignalResponse::Error(e)) if e.code == 401 || e.code == 403 => {
                return Err(Error::Auth(e.message))
            }
            Ok(SignalResponse::Error(e)) => {
                return Err(Error::ServerRejected {
                    code: e.code,
                    message: e.message,
                })
            }
            Ok(SignalResponse::Leave(leave)) => {
                return Err(Error::Connect(format!(
                    "server refused join: {:?}",
                    leave.reason
                )))
            }
            Ok(other) => debug!(kind = other.kind(), "Ignoring message before join response"),
            Err(e) => warn!("Dropping malformed signaling message: {}", e),
        }
    }

    Err(Error::Connect(
        "connection closed before join response".to_string(),
    ))
}
