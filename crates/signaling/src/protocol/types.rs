//! Wire data model shared by requests and responses
//!
//! Field sets mirror the signaling server's protocol and are treated as
//! fixed. Every struct decodes with missing fields defaulted so that newer
//! servers adding fields stay compatible.

use serde::{Deserialize, Serialize};

/// Participant state as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantInfoState {
    /// Websocket connected, but not offered yet
    #[default]
    Joining,
    /// Server received client offer
    Joined,
    /// ICE connectivity established
    Active,
    /// Participant left the room
    Disconnected,
}

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackType {
    /// Audio track
    #[default]
    Audio,
    /// Video track
    Video,
    /// Data track
    Data,
}

/// Origin of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackSource {
    /// Unspecified
    #[default]
    Unknown,
    /// Camera capture
    Camera,
    /// Microphone capture
    Microphone,
    /// Screen share video
    ScreenShare,
    /// Screen share audio
    ScreenShareAudio,
}

/// Published track description
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackInfo {
    /// Server-assigned track id
    pub sid: String,
    /// Track kind
    #[serde(rename = "type")]
    pub kind: TrackType,
    /// Track name
    pub name: String,
    /// Whether the publisher muted the track
    pub muted: bool,
    /// Video width (0 for audio)
    pub width: u32,
    /// Video height (0 for audio)
    pub height: u32,
    /// Track source
    pub source: TrackSource,
    /// Codec mime type
    pub mime_type: String,
}

/// Participant description
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantInfo {
    /// Server-assigned participant session id
    pub sid: String,
    /// Stable identity
    pub identity: String,
    /// Connection state
    pub state: ParticipantInfoState,
    /// Published tracks
    pub tracks: Vec<TrackInfo>,
    /// Application metadata
    pub metadata: String,
    /// Join time (seconds since epoch)
    pub joined_at: i64,
    /// Display name
    pub name: String,
    /// Revision of this record; higher wins
    pub version: u32,
}

/// Room description
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomInfo {
    /// Server-assigned room id
    pub sid: String,
    /// Room name
    pub name: String,
    /// Seconds before an empty room is closed
    pub empty_timeout: u32,
    /// Participant cap (0: unlimited)
    pub max_participants: u32,
    /// Creation time (seconds since epoch)
    pub creation_time: i64,
    /// Application metadata
    pub metadata: String,
    /// Number of participants
    pub num_participants: u32,
    /// Whether a recording is active
    pub active_recording: bool,
}

/// ICE server handed out by the signaling server
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IceServer {
    /// STUN/TURN URLs
    pub urls: Vec<String>,
    /// TURN username
    pub username: String,
    /// TURN credential
    pub credential: String,
}

/// Server build information
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Server version
    pub version: String,
    /// Protocol revision
    pub protocol: u32,
    /// Deployment region
    pub region: String,
    /// Node that serves this connection
    pub node_id: String,
}

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    #[default]
    Offer,
    /// Answer
    Answer,
}

/// Session description exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in browser `RTCIceCandidateInit` form
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IceCandidateInit {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media line index
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidateInit {
    /// Create a candidate from its SDP line
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// Which peer connection a trickle candidate belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalTarget {
    /// Publishing peer connection
    Publisher,
    /// Subscribing peer connection
    #[default]
    Subscriber,
}

/// Why a participant or session was disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisconnectReason {
    /// Unspecified
    #[default]
    UnknownReason,
    /// The client asked to leave
    ClientInitiated,
    /// Another participant joined with the same identity
    DuplicateIdentity,
    /// Server is shutting down
    ServerShutdown,
    /// Participant was removed through the server API
    ParticipantRemoved,
    /// Room was deleted
    RoomDeleted,
    /// Client and server state diverged
    StateMismatch,
    /// Join could not complete
    JoinFailure,
    /// Credentials were rejected
    AuthFailed,
    /// Reconnect attempts were exhausted
    ReconnectExhausted,
}

/// Audio activity of one participant
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerInfo {
    /// Participant sid
    pub sid: String,
    /// Audio level, 0.0 to 1.0 (loudest)
    pub level: f32,
    /// Currently speaking
    pub active: bool,
}

/// Coarse connection quality bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionQuality {
    #[default]
    Poor,
    Good,
    Excellent,
}

/// Connection quality of one participant
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionQualityInfo {
    pub participant_sid: String,
    pub quality: ConnectionQuality,
    pub score: f32,
}

/// Whether the server is forwarding a subscribed track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    #[default]
    Active,
    /// Paused by the server, e.g. under congestion
    Paused,
}

/// Forwarding state of one subscribed track
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamStateInfo {
    pub participant_sid: String,
    pub track_sid: String,
    pub state: StreamState,
}

/// Simulcast layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoQuality {
    #[default]
    Low,
    Medium,
    High,
    Off,
}

/// A simulcast layer and whether any subscriber wants it
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribedQuality {
    pub quality: VideoQuality,
    pub enabled: bool,
}

/// Wanted layers per codec
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribedCodec {
    pub codec: String,
    pub qualities: Vec<SubscribedQuality>,
}
