//! Room State Store
//!
//! Pure state transitions, no I/O. The session owns the only instance and
//! feeds it one message at a time; readers get [`RoomSnapshot`] copies.

use super::model::{
    joined_events, left_events, ConnectionState, Participant, PublicationState, RoomSnapshot,
    SubscriptionState, Track,
};
use crate::event::SessionEvent;
use crate::protocol::{AddTrackRequest, JoinResponse, ParticipantInfo, RoomInfo, TrackInfo};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Result of applying an update
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome<T> {
    /// The update changed the room
    Applied(T),
    /// Stale or duplicate; nothing changed
    Discarded,
}

impl<T> MergeOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::Discarded => None,
        }
    }
}

/// What an applied participant update did
#[derive(Debug, Clone, PartialEq)]
pub enum ParticipantChange {
    /// New participant (tracks included)
    Joined(Participant),
    /// Existing participant got a higher revision
    Updated {
        participant: Participant,
        published: Vec<Track>,
        unpublished: Vec<Track>,
        muted: Vec<Track>,
    },
    /// Participant removed (tracks marked unpublished)
    Left(Participant),
    /// Same identity reappeared under a new sid
    Replaced {
        left: Participant,
        joined: Participant,
    },
}

impl ParticipantChange {
    /// Events describing this change, in emission order
    pub fn into_events(self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        match self {
            Self::Joined(participant) => joined_events(&participant, &mut events),
            Self::Left(participant) => left_events(&participant, &mut events),
            Self::Replaced { left, joined } => {
                left_events(&left, &mut events);
                joined_events(&joined, &mut events);
            }
            Self::Updated {
                participant,
                published,
                unpublished,
                muted,
            } => {
                events.push(SessionEvent::ParticipantUpdated(participant));
                events.extend(unpublished.into_iter().map(SessionEvent::TrackUnpublished));
                events.extend(published.into_iter().map(SessionEvent::TrackPublished));
                events.extend(muted.into_iter().map(SessionEvent::TrackMuted));
            }
        }
        events
    }
}

/// Track-level input to the store
#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    /// Local intent to publish; creates a pending track
    PublishRequested(AddTrackRequest),
    /// Server acknowledged a local track
    Published { cid: String, track: TrackInfo },
    /// Track removed (server notice or local intent)
    Unpublished { track_sid: String },
    /// Local intent to (un)subscribe a remote track
    SubscriptionRequested { track_sid: String, subscribe: bool },
    /// Server confirmed a subscription
    Subscribed { track_sid: String },
    /// Mute state changed
    Muted { track_sid: String, muted: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Tombstone {
    sid: String,
    revision: u64,
}

/// Authoritative mutable room model
#[derive(Debug, Clone)]
pub struct RoomState {
    info: RoomInfo,
    metadata_version: u64,
    local: Participant,
    remote: HashMap<String, Participant>,
    tombstones: HashMap<String, Tombstone>,
    pending: BTreeMap<String, Track>,
    auto_subscribe: bool,
}

impl RoomState {
    /// Build the room from a join response
    pub fn from_join(join: &JoinResponse, auto_subscribe: bool) -> Self {
        let mut state = Self {
            info: join.room.clone(),
            metadata_version: 0,
            local: Participant::from_info(&join.participant, SubscriptionState::Unsubscribed),
            remote: HashMap::new(),
            tombstones: HashMap::new(),
            pending: BTreeMap::new(),
            auto_subscribe,
        };

        for info in &join.other_participants {
            if info.identity == state.local.identity {
                continue;
            }
            match state.apply_participant_update(info) {
                MergeOutcome::Applied(_) => {}
                MergeOutcome::Discarded => {
                    debug!(identity = %info.identity, "Duplicate participant record in join response")
                }
            }
        }

        state
    }

    /// Carry client-side state over from the room before a reconnect
    ///
    /// Subscription states survive for tracks that still exist, pending
    /// publish requests are kept, and the metadata version continues from
    /// the previous value.
    pub fn inherit(&mut self, previous: &RoomSnapshot) {
        for participant in self.remote.values_mut() {
            let Some(before) = previous.participant(&participant.identity) else {
                continue;
            };
            if before.sid != participant.sid {
                continue;
            }
            for (sid, track) in participant.tracks.iter_mut() {
                if let Some(old) = before.track(sid) {
                    track.subscription = old.subscription;
                }
            }
        }

        for track in &previous.pending_tracks {
            if let Some(cid) = &track.cid {
                self.pending.entry(cid.clone()).or_insert_with(|| track.clone());
            }
        }

        self.metadata_version = if previous.metadata == self.info.metadata {
            previous.metadata_version
        } else {
            previous.metadata_version + 1
        };
    }

    /// Local participant sid
    pub fn local_sid(&self) -> &str {
        &self.local.sid
    }

    /// Published track of the local participant
    pub fn local_track(&self, sid: &str) -> Option<&Track> {
        self.local.tracks.get(sid)
    }

    /// Remote participant by identity
    pub fn participant(&self, identity: &str) -> Option<&Participant> {
        self.remote.get(identity)
    }

    /// Merge a participant record
    ///
    /// Records whose revision is not higher than the stored one are
    /// discarded, which makes the merge idempotent and tolerant of
    /// reordering between identities.
    pub fn apply_participant_update(
        &mut self,
        info: &ParticipantInfo,
    ) -> MergeOutcome<ParticipantChange> {
        let revision = u64::from(info.version);

        if info.identity == self.local.identity {
            return self.apply_local_update(info, revision);
        }

        let leaving = ConnectionState::from(info.state) == ConnectionState::Disconnected;

        if let Some(stored) = self.remote.get(&info.identity) {
            if stored.sid != info.sid {
                return self.replace_session(info, revision, leaving);
            }
            if revision <= stored.revision {
                debug!(
                    identity = %info.identity,
                    revision,
                    stored = stored.revision,
                    "Discarding stale participant update"
                );
                return MergeOutcome::Discarded;
            }
        } else {
            if let Some(tomb) = self.tombstones.get(&info.identity) {
                if tomb.sid == info.sid && revision <= tomb.revision {
                    debug!(identity = %info.identity, revision, "Discarding update for removed participant");
                    return MergeOutcome::Discarded;
                }
            }
            if leaving {
                self.bury(&info.identity, &info.sid, revision);
                return MergeOutcome::Discarded;
            }
            self.tombstones.remove(&info.identity);
            let participant = Participant::from_info(info, self.new_track_subscription());
            self.remote.insert(info.identity.clone(), participant.clone());
            return MergeOutcome::Applied(ParticipantChange::Joined(participant));
        }

        if leaving {
            let Some(stored) = self.remote.remove(&info.identity) else {
                return MergeOutcome::Discarded;
            };
            self.bury(&info.identity, &info.sid, revision);
            let mut removed = stored.into_removed();
            removed.revision = revision;
            return MergeOutcome::Applied(ParticipantChange::Left(removed));
        }

        let subscription = self.new_track_subscription();
        let Some(stored) = self.remote.get_mut(&info.identity) else {
            return MergeOutcome::Discarded;
        };

        let mut incoming = Participant::from_info(info, subscription);
        let mut published = Vec::new();
        let mut muted = Vec::new();

        for (sid, track) in incoming.tracks.iter_mut() {
            match stored.tracks.get(sid) {
                None => published.push(track.clone()),
                Some(old) => {
                    track.subscription = old.subscription;
                    if old.muted != track.muted {
                        muted.push(track.clone());
                    }
                }
            }
        }

        let unpublished = stored
            .tracks
            .iter()
            .filter(|(sid, _)| !incoming.tracks.contains_key(*sid))
            .map(|(_, track)| track.clone().into_unpublished())
            .collect();

        *stored = incoming;

        MergeOutcome::Applied(ParticipantChange::Updated {
            participant: stored.clone(),
            published,
            unpublished,
            muted,
        })
    }

    /// A record for a present identity under a different sid
    ///
    /// Revisions are per sid, so the new session supersedes the stored one
    /// whatever its revision: leave of the old sid, join of the new one.
    fn replace_session(
        &mut self,
        info: &ParticipantInfo,
        revision: u64,
        leaving: bool,
    ) -> MergeOutcome<ParticipantChange> {
        if leaving {
            debug!(identity = %info.identity, sid = %info.sid, "Discarding departure of unknown session");
            return MergeOutcome::Discarded;
        }
        if let Some(tomb) = self.tombstones.get(&info.identity) {
            if tomb.sid == info.sid && revision <= tomb.revision {
                debug!(identity = %info.identity, revision, "Discarding update for replaced session");
                return MergeOutcome::Discarded;
            }
        }
        let Some(previous) = self.remote.remove(&info.identity) else {
            return MergeOutcome::Discarded;
        };
        debug!(
            identity = %info.identity,
            old_sid = %previous.sid,
            new_sid = %info.sid,
            "Participant session replaced"
        );
        self.bury(&info.identity, &previous.sid, previous.revision);

        let joined = Participant::from_info(info, self.new_track_subscription());
        self.remote.insert(info.identity.clone(), joined.clone());
        MergeOutcome::Applied(ParticipantChange::Replaced {
            left: previous.into_removed(),
            joined,
        })
    }

    fn apply_local_update(
        &mut self,
        info: &ParticipantInfo,
        revision: u64,
    ) -> MergeOutcome<ParticipantChange> {
        if revision <= self.local.revision {
            debug!(revision, "Discarding stale local participant update");
            return MergeOutcome::Discarded;
        }

        self.local.revision = revision;
        self.local.sid = info.sid.clone();
        self.local.name = info.name.clone();
        self.local.metadata = info.metadata.clone();
        self.local.state = info.state.into();

        MergeOutcome::Applied(ParticipantChange::Updated {
            participant: self.local.clone(),
            published: Vec::new(),
            unpublished: Vec::new(),
            muted: Vec::new(),
        })
    }

    fn bury(&mut self, identity: &str, sid: &str, revision: u64) {
        let tomb = self
            .tombstones
            .entry(identity.to_string())
            .or_insert_with(|| Tombstone {
                sid: sid.to_string(),
                revision,
            });
        if tomb.sid != sid || tomb.revision < revision {
            tomb.sid = sid.to_string();
            tomb.revision = revision;
        }
    }

    fn new_track_subscription(&self) -> SubscriptionState {
        if self.auto_subscribe {
            SubscriptionState::Subscribing
        } else {
            SubscriptionState::Unsubscribed
        }
    }

    /// Apply a track-level event; returns the affected track
    pub fn apply_track_event(&mut self, event: TrackEvent) -> MergeOutcome<Track> {
        match event {
            TrackEvent::PublishRequested(request) => {
                if self.pending.contains_key(&request.cid)
                    || self
                        .local
                        .tracks
                        .values()
                        .any(|t| t.cid.as_deref() == Some(request.cid.as_str()))
                {
                    return MergeOutcome::Discarded;
                }
                let track = Track {
                    sid: String::new(),
                    cid: Some(request.cid.clone()),
                    name: request.name,
                    kind: request.kind,
                    source: request.source,
                    participant: self.local.identity.clone(),
                    muted: request.muted,
                    publication: PublicationState::Pending,
                    subscription: SubscriptionState::Unsubscribed,
                };
                self.pending.insert(request.cid, track.clone());
                MergeOutcome::Applied(track)
            }
            TrackEvent::Published { cid, track } => {
                if self.local.tracks.contains_key(&track.sid) {
                    return MergeOutcome::Discarded;
                }
                self.pending.remove(&cid);
                let mut published =
                    Track::from_info(&track, &self.local.identity, SubscriptionState::Unsubscribed);
                published.cid = Some(cid);
                self.local
                    .tracks
                    .insert(published.sid.clone(), published.clone());
                MergeOutcome::Applied(published)
            }
            TrackEvent::Unpublished { track_sid } => {
                if let Some(track) = self.local.tracks.remove(&track_sid) {
                    return MergeOutcome::Applied(track.into_unpublished());
                }
                self.remote
                    .values_mut()
                    .find_map(|p| p.tracks.remove(&track_sid))
                    .map(|t| MergeOutcome::Applied(t.into_unpublished()))
                    .unwrap_or(MergeOutcome::Discarded)
            }
            TrackEvent::SubscriptionRequested {
                track_sid,
                subscribe,
            } => {
                let Some(track) = self.remote_track_mut(&track_sid) else {
                    return MergeOutcome::Discarded;
                };
                let next = match (subscribe, track.subscription) {
                    (true, SubscriptionState::Unsubscribed) => SubscriptionState::Subscribing,
                    (false, SubscriptionState::Subscribing | SubscriptionState::Subscribed) => {
                        SubscriptionState::Unsubscribed
                    }
                    _ => return MergeOutcome::Discarded,
                };
                track.subscription = next;
                MergeOutcome::Applied(track.clone())
            }
            TrackEvent::Subscribed { track_sid } => {
                let Some(track) = self.remote_track_mut(&track_sid) else {
                    return MergeOutcome::Discarded;
                };
                if track.subscription == SubscriptionState::Subscribed {
                    return MergeOutcome::Discarded;
                }
                track.subscription = SubscriptionState::Subscribed;
                MergeOutcome::Applied(track.clone())
            }
            TrackEvent::Muted { track_sid, muted } => {
                let track = if self.local.tracks.contains_key(&track_sid) {
                    self.local.tracks.get_mut(&track_sid)
                } else {
                    self.remote_track_mut(&track_sid)
                };
                match track {
                    Some(track) if track.muted != muted => {
                        track.muted = muted;
                        MergeOutcome::Applied(track.clone())
                    }
                    _ => MergeOutcome::Discarded,
                }
            }
        }
    }

    fn remote_track_mut(&mut self, sid: &str) -> Option<&mut Track> {
        self.remote.values_mut().find_map(|p| p.tracks.get_mut(sid))
    }

    /// Replace room info; returns the new metadata version when metadata changed
    pub fn apply_room_update(&mut self, room: &RoomInfo) -> MergeOutcome<u64> {
        if *room == self.info {
            return MergeOutcome::Discarded;
        }
        let metadata_changed = room.metadata != self.info.metadata;
        self.info = room.clone();
        if !metadata_changed {
            return MergeOutcome::Discarded;
        }
        self.metadata_version += 1;
        MergeOutcome::Applied(self.metadata_version)
    }

    /// Immutable copy of the current room
    pub fn snapshot(&self) -> RoomSnapshot {
        let mut participants: Vec<Participant> = self.remote.values().cloned().collect();
        participants.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });

        RoomSnapshot {
            sid: self.info.sid.clone(),
            name: self.info.name.clone(),
            metadata: self.info.metadata.clone(),
            metadata_version: self.metadata_version,
            local: self.local.clone(),
            pending_tracks: self.pending.values().cloned().collect(),
            participants,
        }
    }
}
