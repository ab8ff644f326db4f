//! Room model: participants, tracks and immutable snapshots

use crate::event::SessionEvent;
use crate::protocol::{ParticipantInfo, ParticipantInfoState, TrackInfo, TrackSource, TrackType};
use std::collections::BTreeMap;

/// Participant connection state as seen by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Connected to the server, not yet negotiated
    Joining,
    /// Joined and (possibly) media-connected
    Active,
    /// Reported disconnected by the server
    Disconnected,
    /// No longer part of the room
    Removed,
}

impl From<ParticipantInfoState> for ConnectionState {
    fn from(state: ParticipantInfoState) -> Self {
        match state {
            ParticipantInfoState::Joining => Self::Joining,
            ParticipantInfoState::Joined | ParticipantInfoState::Active => Self::Active,
            ParticipantInfoState::Disconnected => Self::Disconnected,
        }
    }
}

/// Publication state of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicationState {
    /// Local publish requested, no server acknowledgment yet
    Pending,
    /// Acknowledged by the server
    Published,
    /// Removed (only seen on event payloads)
    Unpublished,
}

/// Subscription state of a remote track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// A media or data track owned by a participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Server-assigned sid (empty while pending)
    pub sid: String,
    /// Client id for locally published tracks
    pub cid: Option<String>,
    pub name: String,
    pub kind: TrackType,
    pub source: TrackSource,
    /// Identity of the owning participant
    pub participant: String,
    pub muted: bool,
    pub publication: PublicationState,
    pub subscription: SubscriptionState,
}

impl Track {
    pub(crate) fn from_info(
        info: &TrackInfo,
        participant: &str,
        subscription: SubscriptionState,
    ) -> Self {
        Self {
            sid: info.sid.clone(),
            cid: None,
            name: info.name.clone(),
            kind: info.kind,
            source: info.source,
            participant: participant.to_string(),
            muted: info.muted,
            publication: PublicationState::Published,
            subscription,
        }
    }

    pub(crate) fn into_unpublished(mut self) -> Self {
        self.publication = PublicationState::Unpublished;
        self
    }
}

/// A room participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub sid: String,
    /// Stable identity
    pub identity: String,
    pub name: String,
    pub metadata: String,
    /// Highest revision applied for this identity
    pub revision: u64,
    pub state: ConnectionState,
    /// Join time (seconds since epoch)
    pub joined_at: i64,
    /// Published tracks keyed by sid
    pub tracks: BTreeMap<String, Track>,
}

impl Participant {
    pub(crate) fn from_info(info: &ParticipantInfo, subscription: SubscriptionState) -> Self {
        let tracks = info
            .tracks
            .iter()
            .map(|t| (t.sid.clone(), Track::from_info(t, &info.identity, subscription)))
            .collect();

        Self {
            sid: info.sid.clone(),
            identity: info.identity.clone(),
            name: info.name.clone(),
            metadata: info.metadata.clone(),
            revision: u64::from(info.version),
            state: info.state.into(),
            joined_at: info.joined_at,
            tracks,
        }
    }

    /// Look up a track by sid
    pub fn track(&self, sid: &str) -> Option<&Track> {
        self.tracks.get(sid)
    }

    pub(crate) fn into_removed(mut self) -> Self {
        self.state = ConnectionState::Removed;
        self.tracks = std::mem::take(&mut self.tracks)
            .into_iter()
            .map(|(sid, track)| (sid, track.into_unpublished()))
            .collect();
        self
    }

    fn same_record(&self, other: &Participant) -> bool {
        self.revision == other.revision
            && self.name == other.name
            && self.metadata == other.metadata
            && self.state == other.state
    }
}

/// Immutable point-in-time copy of the room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub sid: String,
    pub name: String,
    pub metadata: String,
    /// Incremented every time room metadata changes
    pub metadata_version: u64,
    /// The local participant
    pub local: Participant,
    /// Local publish requests awaiting acknowledgment
    pub pending_tracks: Vec<Track>,
    /// Remote participants ordered by join time, then identity
    pub participants: Vec<Participant>,
}

impl RoomSnapshot {
    /// Look up a remote participant by identity
    pub fn participant(&self, identity: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.identity == identity)
    }

    /// Look up any track (local or remote) by sid
    pub fn track(&self, sid: &str) -> Option<&Track> {
        self.local
            .track(sid)
            .or_else(|| self.participants.iter().find_map(|p| p.track(sid)))
    }

    /// Events that turn `self` into `next`
    ///
    /// Used after a reconnect: the fresh join response is the new truth and
    /// everything that changed while the connection was down is reported
    /// exactly once.
    pub fn diff(&self, next: &RoomSnapshot) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        for before in &self.participants {
            match next.participant(&before.identity) {
                None => left_events(before, &mut events),
                Some(after) if after.sid != before.sid => {
                    left_events(before, &mut events);
                    joined_events(after, &mut events);
                }
                Some(after) => {
                    if !before.same_record(after) {
                        events.push(SessionEvent::ParticipantUpdated(after.clone()));
                    }
                    track_diff(before, after, &mut events);
                }
            }
        }

        for after in &next.participants {
            if self.participant(&after.identity).is_none() {
                joined_events(after, &mut events);
            }
        }

        track_diff(&self.local, &next.local, &mut events);

        if self.metadata != next.metadata {
            events.push(SessionEvent::RoomUpdated {
                metadata: next.metadata.clone(),
                metadata_version: next.metadata_version,
            });
        }

        events
    }
}

pub(crate) fn joined_events(participant: &Participant, events: &mut Vec<SessionEvent>) {
    events.push(SessionEvent::ParticipantJoined(participant.clone()));
    events.extend(
        participant
            .tracks
            .values()
            .cloned()
            .map(SessionEvent::TrackPublished),
    );
}

pub(crate) fn left_events(participant: &Participant, events: &mut Vec<SessionEvent>) {
    let removed = participant.clone().into_removed();
    events.extend(
        removed
            .tracks
            .values()
            .cloned()
            .map(SessionEvent::TrackUnpublished),
    );
    events.push(SessionEvent::ParticipantLeft(removed));
}

fn track_diff(before: &Participant, after: &Participant, events: &mut Vec<SessionEvent>) {
    for (sid, track) in &before.tracks {
        if !after.tracks.contains_key(sid) {
            events.push(SessionEvent::TrackUnpublished(track.clone().into_unpublished()));
        }
    }
    for (sid, track) in &after.tracks {
        match before.tracks.get(sid) {
            None => events.push(SessionEvent::TrackPublished(track.clone())),
            Some(old) if old.muted != track.muted => {
                events.push(SessionEvent::TrackMuted(track.clone()))
            }
            Some(_) => {}
        }
    }
}
