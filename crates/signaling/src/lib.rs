//! Room signaling client
//!
//! This crate implements the client side of a room-based real-time media
//! signaling protocol: it joins a room over a persistent WebSocket,
//! reconciles the room's participant and track state from server updates,
//! and sequences SDP offer/answer and ICE candidate exchange for a peer
//! connection owned by the application.
//!
//! # Features
//!
//! - **Session lifecycle**: join with timeout, keepalive, reconnect with
//!   exponential backoff and jitter, resume of the previous participant sid
//! - **Room state**: revision-ordered participant merge, tombstones for
//!   departed participants, events derived from snapshot diffs
//! - **Negotiation**: one offer/answer exchange in flight at a time, glare
//!   resolution, ICE candidates buffered until a remote description exists
//! - **Transports**: WebSocket (`tokio-tungstenite`) and an in-process
//!   memory transport for tests
//! - **Optional WebRTC adapter** (`webrtc-peer` feature)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Application                                            │
//! │  ↓ SessionHandle (requests, events(), room())           │
//! │  Session task (one per session)                         │
//! │  ├─ TransportChannel (WebSocket / memory)               │
//! │  ├─ RoomState (participants, tracks, tombstones)        │
//! │  └─ NegotiationCoordinator (offer/answer, candidates)   │
//! │     ↓                                                   │
//! │  PeerConnection (application-supplied)                  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use room_signaling::{ReconnectPolicy, SignalingConfig};
//!
//! let config = SignalingConfig::new("wss://media.example.com", "token", "standup")
//!     .with_reconnect_policy(ReconnectPolicy::aggressive());
//!
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use futures::StreamExt;
//! use room_signaling::{PeerConnection, SessionHandle, SignalingConfig};
//! use std::sync::Arc;
//!
//! # async fn example(peer: Arc<dyn PeerConnection>) -> room_signaling::Result<()> {
//! let config = SignalingConfig::new("wss://media.example.com", "token", "standup");
//! let session = SessionHandle::connect(config, peer).await?;
//!
//! let mut events = session.events();
//! while let Some(event) = events.next().await {
//!     println!("{}", event.kind());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod event;
pub mod negotiation;
pub mod protocol;
pub mod room;
pub mod session;
pub mod transport;

#[cfg(feature = "webrtc-peer")]
pub mod peer;

// Re-exports for public API
pub use config::{ReconnectPolicy, SdkInfo, SignalingConfig};
pub use error::{Error, Result};
pub use event::SessionEvent;
pub use negotiation::{NegotiationCoordinator, NegotiationRole, PeerConnection};
pub use protocol::{DisconnectReason, IceCandidateInit, SessionDescription, SignalTarget};
pub use room::{ConnectionState, Participant, RoomSnapshot, Track};
pub use session::{CandidateSink, EventStream, SessionHandle, SessionState};

#[cfg(feature = "webrtc-peer")]
pub use peer::WebRtcPeer;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
