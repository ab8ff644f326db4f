//! Signaling message variants
//!
//! Requests flow client → server, responses server → client. Both are
//! closed sets encoded as externally tagged JSON objects, e.g.
//! `{"offer":{"type":"offer","sdp":"..."}}`.

use super::types::{
    ConnectionQualityInfo, DisconnectReason, IceCandidateInit, IceServer, ParticipantInfo,
    RoomInfo, ServerInfo, SessionDescription, SignalTarget, SpeakerInfo, StreamStateInfo,
    SubscribedCodec, SubscribedQuality, TrackInfo, TrackSource, TrackType,
};
use serde::{Deserialize, Serialize};

/// Client → server message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalRequest {
    /// Join (or resume) a room
    Join(JoinRequest),
    /// Local offer for the publisher connection
    Offer(SessionDescription),
    /// Local answer for the subscriber connection
    Answer(SessionDescription),
    /// Local ICE candidate
    Trickle(TrickleRequest),
    /// Announce a local track before it is negotiated
    AddTrack(AddTrackRequest),
    /// Mute or unmute a local track
    Mute(MuteTrackRequest),
    /// Change subscription to remote tracks
    Subscription(UpdateSubscription),
    /// Allow other participants to subscribe to local tracks
    SubscriptionPermission(SubscriptionPermission),
    /// Leave the room
    Leave(LeaveRequest),
    /// Keepalive, carries a millisecond timestamp
    Ping(i64),
}

/// Server → client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalResponse {
    /// Join accepted; carries the room snapshot
    Join(JoinResponse),
    /// Server offer for the subscriber connection
    Offer(SessionDescription),
    /// Server answer for the publisher connection
    Answer(SessionDescription),
    /// Remote ICE candidate
    Trickle(TrickleRequest),
    /// Participant records changed
    Update(ParticipantUpdate),
    /// A local track was accepted
    TrackPublished(TrackPublishedResponse),
    /// A track was removed
    TrackUnpublished(TrackUnpublishedResponse),
    /// A remote track subscription became active
    TrackSubscribed(TrackSubscribed),
    /// Server asks the client to leave
    Leave(LeaveRequest),
    /// A track was muted or unmuted
    Mute(MuteTrackRequest),
    /// Room info changed
    RoomUpdate(RoomUpdate),
    /// Replacement access token
    RefreshToken(String),
    /// Server wants a new offer from the client
    NegotiationRequired(NegotiationRequired),
    /// Keepalive reply, echoes the ping timestamp
    Pong(i64),
    /// Request failed
    Error(ErrorResponse),
    /// Active speakers changed
    SpeakersChanged(SpeakersChanged),
    /// Connection quality of one or more participants changed
    ConnectionQuality(ConnectionQualityUpdate),
    /// Server paused or resumed forwarding of subscribed tracks
    StreamStateUpdate(StreamStateUpdate),
    /// Simulcast layers wanted by subscribers of a local track
    SubscribedQualityUpdate(SubscribedQualityUpdate),
    /// Permission to subscribe to a remote track changed
    SubscriptionPermissionUpdate(SubscriptionPermissionUpdate),
}

impl SignalRequest {
    /// Variant name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Trickle(_) => "trickle",
            Self::AddTrack(_) => "add_track",
            Self::Mute(_) => "mute",
            Self::Subscription(_) => "subscription",
            Self::SubscriptionPermission(_) => "subscription_permission",
            Self::Leave(_) => "leave",
            Self::Ping(_) => "ping",
        }
    }
}

impl SignalResponse {
    /// Variant name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Trickle(_) => "trickle",
            Self::Update(_) => "update",
            Self::TrackPublished(_) => "track_published",
            Self::TrackUnpublished(_) => "track_unpublished",
            Self::TrackSubscribed(_) => "track_subscribed",
            Self::Leave(_) => "leave",
            Self::Mute(_) => "mute",
            Self::RoomUpdate(_) => "room_update",
            Self::RefreshToken(_) => "refresh_token",
            Self::NegotiationRequired(_) => "negotiation_required",
            Self::Pong(_) => "pong",
            Self::Error(_) => "error",
            Self::SpeakersChanged(_) => "speakers_changed",
            Self::ConnectionQuality(_) => "connection_quality",
            Self::StreamStateUpdate(_) => "stream_state_update",
            Self::SubscribedQualityUpdate(_) => "subscribed_quality_update",
            Self::SubscriptionPermissionUpdate(_) => "subscription_permission_update",
        }
    }
}

/// Join request body
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinRequest {
    /// Room name
    pub room: String,
    /// Resume an existing participant instead of joining fresh
    pub reconnect: bool,
    /// Participant sid being resumed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_sid: Option<String>,
    /// Subscribe to remote tracks automatically
    pub auto_subscribe: bool,
}

/// Join response body
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinResponse {
    /// Room the client joined
    pub room: RoomInfo,
    /// The local participant
    pub participant: ParticipantInfo,
    /// Everyone else currently in the room
    pub other_participants: Vec<ParticipantInfo>,
    /// Server build information
    pub server_info: ServerInfo,
    /// ICE servers to use for the peer connection
    pub ice_servers: Vec<IceServer>,
    /// Whether the subscriber connection is the primary one
    pub subscriber_primary: bool,
    /// Keepalive interval in seconds (0: disabled)
    pub ping_interval: u32,
    /// Keepalive timeout in seconds
    pub ping_timeout: u32,
}

/// ICE candidate envelope
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrickleRequest {
    /// Candidate in `RTCIceCandidateInit` form
    pub candidate: IceCandidateInit,
    /// Peer connection the candidate belongs to
    pub target: SignalTarget,
}

/// Local track announcement
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddTrackRequest {
    /// Client-assigned track id, echoed back in `TrackPublished`
    pub cid: String,
    /// Track name
    pub name: String,
    /// Track kind
    #[serde(rename = "type")]
    pub kind: TrackType,
    /// Video width
    pub width: u32,
    /// Video height
    pub height: u32,
    /// Publish muted
    pub muted: bool,
    /// Track source
    pub source: TrackSource,
}

/// Mute state change for a track
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MuteTrackRequest {
    /// Track sid
    pub sid: String,
    /// New mute state
    pub muted: bool,
}

/// Subscription change for remote tracks
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSubscription {
    /// Tracks affected
    pub track_sids: Vec<String>,
    /// Subscribe (true) or unsubscribe (false)
    pub subscribe: bool,
}

/// Subscription permission for local tracks
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionPermission {
    /// Allow every participant to subscribe
    pub all_participants: bool,
}

/// Leave notification (either direction)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaveRequest {
    /// Server allows the client to reconnect
    pub can_reconnect: bool,
    /// Why the participant is leaving
    pub reason: DisconnectReason,
}

/// Batch of participant records
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantUpdate {
    /// Updated participant records
    pub participants: Vec<ParticipantInfo>,
}

/// Server acknowledgment of a local track
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackPublishedResponse {
    /// Client id from the matching `AddTrackRequest`
    pub cid: String,
    /// Published track
    pub track: TrackInfo,
}

/// Track removal notice
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackUnpublishedResponse {
    /// Removed track sid
    pub track_sid: String,
}

/// Remote subscription became active
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackSubscribed {
    /// Subscribed track sid
    pub track_sid: String,
}

/// Room info change
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomUpdate {
    /// New room info
    pub room: RoomInfo,
}

/// Server request for a client offer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationRequired {
    /// Optional reason supplied by the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error reply
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorResponse {
    /// Error code (HTTP-like: 401 unauthorized, 404 not found, ...)
    pub code: u32,
    /// Human-readable message
    pub message: String,
}

/// Speakers whose activity changed
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakersChanged {
    pub speakers: Vec<SpeakerInfo>,
}

/// Batch of connection quality reports
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionQualityUpdate {
    pub updates: Vec<ConnectionQualityInfo>,
}

/// Batch of stream state changes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamStateUpdate {
    pub stream_states: Vec<StreamStateInfo>,
}

/// Layers subscribers want for a local track
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribedQualityUpdate {
    /// Local track sid
    pub track_sid: String,
    pub subscribed_qualities: Vec<SubscribedQuality>,
    pub subscribed_codecs: Vec<SubscribedCodec>,
}

/// Subscription permission change for a remote track
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionPermissionUpdate {
    /// Publisher of the track
    pub participant_sid: String,
    pub track_sid: String,
    /// Whether this client may subscribe
    pub allowed: bool,
}
