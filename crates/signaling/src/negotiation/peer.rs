//! Peer connection capability consumed by the coordinator

use crate::protocol::{IceCandidateInit, SessionDescription};
use crate::Result;
use async_trait::async_trait;

/// Operations the negotiation driver needs from a peer connection
///
/// The application owns the peer connection; the session only makes these
/// calls, one at a time. Local ICE candidates discovered by the peer
/// connection are pushed back through `SessionHandle::candidate_sink()`.
#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    /// Create a local offer and install it as the local description
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Apply a remote offer, then create and install the local answer
    ///
    /// Implementations roll back a pending local offer first if needed.
    async fn create_answer(&self, offer: SessionDescription) -> Result<SessionDescription>;

    /// Apply a remote description (the answer to a local offer)
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()>;
}
