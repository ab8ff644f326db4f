//! Application-visible session events

use crate::protocol::{
    ConnectionQualityInfo, DisconnectReason, SpeakerInfo, StreamStateInfo,
    SubscribedQualityUpdate, SubscriptionPermissionUpdate,
};
use crate::room::{Participant, Track};
use std::time::Duration;

/// Something that changed in the session or the room
///
/// Participant and track payloads are copies taken at the time of the
/// change; the authoritative view is always `SessionHandle::room()`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A remote participant joined
    ParticipantJoined(Participant),
    /// A participant record changed (higher revision applied)
    ParticipantUpdated(Participant),
    /// A remote participant left; its state is `Removed`
    ParticipantLeft(Participant),
    /// A track was published (remote, or local after server acknowledgment)
    TrackPublished(Track),
    /// A track was removed
    TrackUnpublished(Track),
    /// A remote track subscription became active
    TrackSubscribed(Track),
    /// A track's mute state changed
    TrackMuted(Track),
    /// Room metadata changed
    RoomUpdated {
        /// New metadata
        metadata: String,
        /// Room metadata version after the change
        metadata_version: u64,
    },
    /// The server asked for a new offer
    NegotiationRequired,
    /// Connection lost, a reconnect attempt is scheduled
    Reconnecting {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// Rejoined after a connection loss; reconciliation events precede this
    Reconnected,
    /// The server issued a new access token
    TokenRefreshed,
    /// Active speakers changed
    SpeakersChanged(Vec<SpeakerInfo>),
    /// Connection quality reports for participants
    ConnectionQualityChanged(Vec<ConnectionQualityInfo>),
    /// The server paused or resumed subscribed tracks
    StreamStateChanged(Vec<StreamStateInfo>),
    /// Subscribers want a different set of layers from a local track
    SubscribedQualityChanged(SubscribedQualityUpdate),
    /// Permission to subscribe to a remote track changed
    SubscriptionPermissionChanged(SubscriptionPermissionUpdate),
    /// The session ended; the event stream terminates after this
    Disconnected {
        /// Why the session ended
        reason: DisconnectReason,
    },
}

impl SessionEvent {
    /// Event name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParticipantJoined(_) => "participant_joined",
            Self::ParticipantUpdated(_) => "participant_updated",
            Self::ParticipantLeft(_) => "participant_left",
            Self::TrackPublished(_) => "track_published",
            Self::TrackUnpublished(_) => "track_unpublished",
            Self::TrackSubscribed(_) => "track_subscribed",
            Self::TrackMuted(_) => "track_muted",
            Self::RoomUpdated { .. } => "room_updated",
            Self::NegotiationRequired => "negotiation_required",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Reconnected => "reconnected",
            Self::TokenRefreshed => "token_refreshed",
            Self::SpeakersChanged(_) => "speakers_changed",
            Self::ConnectionQualityChanged(_) => "connection_quality_changed",
            Self::StreamStateChanged(_) => "stream_state_changed",
            Self::SubscribedQualityChanged(_) => "subscribed_quality_changed",
            Self::SubscriptionPermissionChanged(_) => "subscription_permission_changed",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}
