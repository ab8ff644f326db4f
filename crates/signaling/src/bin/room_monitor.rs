//! Room monitor binary
//!
//! Joins a room, prints room events as they arrive and leaves on Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin room_monitor --features full -- \
//!   --url wss://media.example.com \
//!   --room standup \
//!   --token "$ROOM_TOKEN"
//! ```

use clap::Parser;
use futures::StreamExt;
use room_signaling::protocol::IceServer;
use room_signaling::{ReconnectPolicy, SessionEvent, SessionHandle, SignalingConfig, WebRtcPeer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Room signaling monitor
///
/// Joins a room with a receive-only peer connection and logs every
/// participant, track and connection event.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Signaling server URL (ws:// or wss://)
    #[arg(long, env = "ROOM_SIGNALING_URL")]
    url: String,

    /// Access token
    #[arg(long, env = "ROOM_TOKEN")]
    token: String,

    /// Room name
    #[arg(long, env = "ROOM_NAME")]
    room: String,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302"
    )]
    stun_servers: Vec<String>,

    /// Join timeout in seconds
    #[arg(long, default_value_t = 10)]
    join_timeout_secs: u64,

    /// Maximum reconnection attempts
    #[arg(long, default_value_t = 5, env = "ROOM_MAX_RECONNECT_ATTEMPTS")]
    max_reconnect_attempts: u32,

    /// Subscribe to remote tracks automatically (`--auto-subscribe false` to disable)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    auto_subscribe: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = SignalingConfig::new(&args.url, &args.token, &args.room)
        .with_join_timeout(Duration::from_secs(args.join_timeout_secs))
        .with_auto_subscribe(args.auto_subscribe)
        .with_reconnect_policy(ReconnectPolicy {
            max_attempts: args.max_reconnect_attempts,
            ..Default::default()
        });

    let ice_servers = vec![IceServer {
        urls: args.stun_servers,
        ..Default::default()
    }];
    let peer = Arc::new(WebRtcPeer::new(&ice_servers).await?);

    let session = SessionHandle::connect(config, peer.clone()).await?;
    peer.attach(session.candidate_sink());

    let room = session.room();
    info!(
        room = %room.name,
        participant = %room.local.sid,
        others = room.participants.len(),
        "Joined"
    );

    let mut events = session.events();
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(SessionEvent::Disconnected { reason }) => {
                    warn!(?reason, "Disconnected");
                    break;
                }
                Some(event) => log_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, leaving room");
                session.close().await?;
                break;
            }
        }
    }

    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::ParticipantJoined(p) | SessionEvent::ParticipantLeft(p) => {
            info!(event = event.kind(), identity = %p.identity, sid = %p.sid);
        }
        SessionEvent::ParticipantUpdated(p) => {
            info!(event = event.kind(), identity = %p.identity, revision = p.revision);
        }
        SessionEvent::TrackPublished(t)
        | SessionEvent::TrackUnpublished(t)
        | SessionEvent::TrackSubscribed(t)
        | SessionEvent::TrackMuted(t) => {
            info!(event = event.kind(), participant = %t.participant, track = %t.sid, muted = t.muted);
        }
        SessionEvent::RoomUpdated {
            metadata,
            metadata_version,
        } => {
            info!(event = event.kind(), version = metadata_version, %metadata);
        }
        SessionEvent::Reconnecting { attempt, delay } => {
            warn!(event = event.kind(), attempt, ?delay);
        }
        SessionEvent::SpeakersChanged(speakers) => {
            let active: Vec<&str> = speakers
                .iter()
                .filter(|s| s.active)
                .map(|s| s.sid.as_str())
                .collect();
            debug!(event = event.kind(), ?active);
        }
        SessionEvent::ConnectionQualityChanged(updates) => {
            for update in updates {
                debug!(event = event.kind(), participant = %update.participant_sid, quality = ?update.quality);
            }
        }
        other => info!(event = other.kind()),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,room_signaling=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "room_monitor",
            "--url",
            "ws://localhost:7880",
            "--token",
            "t",
            "--room",
            "r",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_auto_subscribe_flag() {
        assert!(parse(&[]).auto_subscribe);
        assert!(!parse(&["--auto-subscribe", "false"]).auto_subscribe);
        assert!(parse(&["--auto-subscribe", "true"]).auto_subscribe);
    }
}
