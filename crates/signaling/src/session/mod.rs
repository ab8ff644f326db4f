//! Signaling Session
//!
//! [`SessionHandle::connect`] joins a room and spawns the session task,
//! which owns the transport channel, the room store and the negotiation
//! coordinator. All inbound messages, application requests and peer
//! connection completions are processed by that one task, in order.
//! Handles talk to it over channels and read published snapshots.

mod join;
mod task;

use crate::config::SignalingConfig;
use crate::event::SessionEvent;
use crate::negotiation::{NegotiationRole, PeerConnection};
use crate::protocol::{AddTrackRequest, IceCandidateInit, JoinResponse, SignalTarget, TrickleRequest};
use crate::room::RoomSnapshot;
use crate::transport::{Connector, WebSocketConnector};
use crate::{Error, Result};
use futures::stream::BoxStream;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, instrument, warn};

/// Connection lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Rejoin attempt in progress (transport open, join pending)
    Connecting,
    Joined,
    /// Connection lost, waiting out the backoff delay
    Reconnecting,
    /// Terminal
    Closed,
}

/// Stream of session events
///
/// Each call to `SessionHandle::events()` starts a fresh subscription that
/// sees events from that point on. The stream ends after the session
/// closes. A subscriber that falls more than `event_channel_capacity`
/// events behind skips the overflow (logged at warn).
pub type EventStream = BoxStream<'static, SessionEvent>;

type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Command {
    Close(oneshot::Sender<()>),
    Request(Request),
}

pub(crate) enum Request {
    InitiateOffer {
        reply: Reply<()>,
    },
    PublishTrack {
        request: AddTrackRequest,
        reply: Reply<String>,
    },
    UnpublishTrack {
        track_sid: String,
        reply: Reply<()>,
    },
    SetSubscription {
        track_sids: Vec<String>,
        subscribe: bool,
        reply: Reply<()>,
    },
    SubscriptionPermission {
        all_participants: bool,
        reply: Reply<()>,
    },
    MuteTrack {
        track_sid: String,
        muted: bool,
        reply: Reply<()>,
    },
}

impl Request {
    /// Answer with `NotConnected` (used while reconnecting)
    pub(crate) fn reject(self) {
        match self {
            Request::PublishTrack { reply, .. } => {
                let _ = reply.send(Err(Error::NotConnected));
            }
            Request::InitiateOffer { reply }
            | Request::UnpublishTrack { reply, .. }
            | Request::SetSubscription { reply, .. }
            | Request::SubscriptionPermission { reply, .. }
            | Request::MuteTrack { reply, .. } => {
                let _ = reply.send(Err(Error::NotConnected));
            }
        }
    }
}

/// State shared between the session task and its handles
pub(crate) struct Shared {
    state: watch::Sender<SessionState>,
    room: RwLock<Arc<RoomSnapshot>>,
    events: Mutex<Option<broadcast::Sender<SessionEvent>>>,
    role: Mutex<NegotiationRole>,
    reconnect_attempts: AtomicU32,
}

impl Shared {
    fn new(room: RoomSnapshot, events: broadcast::Sender<SessionEvent>) -> Self {
        let (state, _) = watch::channel(SessionState::Joined);
        Self {
            state,
            room: RwLock::new(Arc::new(room)),
            events: Mutex::new(Some(events)),
            role: Mutex::new(NegotiationRole::Idle),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "Session state changed");
        }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            debug!(kind = event.kind(), "Emitting event");
            // No receivers is fine: events are not retained for late subscribers.
            let _ = events.send(event);
        }
    }

    /// Drop the event sender so every stream ends
    pub(crate) fn end_events(&self) {
        self.events.lock().take();
    }

    pub(crate) fn publish_room(&self, snapshot: RoomSnapshot) {
        *self.room.write() = Arc::new(snapshot);
    }

    pub(crate) fn set_role(&self, role: NegotiationRole) {
        *self.role.lock() = role;
    }

    pub(crate) fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::SeqCst);
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        match self.events.lock().as_ref() {
            Some(events) => events.subscribe(),
            None => {
                // Closed session: a receiver whose sender is already gone.
                let (events, receiver) = broadcast::channel(1);
                drop(events);
                receiver
            }
        }
    }
}

/// Pushes local ICE candidates to the session for transmission
#[derive(Debug, Clone)]
pub struct CandidateSink {
    tx: mpsc::UnboundedSender<TrickleRequest>,
}

impl CandidateSink {
    /// Queue a local candidate for the given peer connection
    pub fn send(&self, candidate: IceCandidateInit, target: SignalTarget) -> Result<()> {
        self.tx
            .send(TrickleRequest { candidate, target })
            .map_err(|_| Error::Closed)
    }
}

/// Cloneable handle to a running signaling session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    candidates: CandidateSink,
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Join a room over WebSocket
    ///
    /// # Errors
    ///
    /// - `Error::InvalidConfig` if the configuration does not validate
    /// - `Error::Auth` if the server rejects the token
    /// - `Error::Connect` / `Error::Timeout` once retries are exhausted
    pub async fn connect(config: SignalingConfig, peer: Arc<dyn PeerConnection>) -> Result<Self> {
        Self::connect_with(config, Arc::new(WebSocketConnector::new()), peer).await
    }

    /// Join a room over the given connector
    ///
    /// Connect and timeout failures are retried under the reconnect policy;
    /// authentication failures are returned immediately.
    #[instrument(skip_all, fields(room = %config.room))]
    pub async fn connect_with(
        config: SignalingConfig,
        connector: Arc<dyn Connector>,
        peer: Arc<dyn PeerConnection>,
    ) -> Result<Self> {
        config.validate()?;

        let policy = config.reconnect.clone();
        let mut attempt = 0;
        let (channel, response) = loop {
            match join::open_and_join(&config, connector.as_ref(), &config.token, None).await {
                Ok(joined) => break joined,
                Err(e) if e.is_retryable() && policy.should_retry(attempt) => {
                    let delay = policy.calculate_backoff(attempt);
                    attempt += 1;
                    warn!(attempt, ?delay, "Connect failed, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Connect failed: {}", e);
                    return Err(e);
                }
            }
        };

        info!(
            participant = %response.participant.sid,
            others = response.other_participants.len(),
            "Joined room"
        );

        Ok(Self::start(config, connector, peer, channel, response))
    }

    fn start(
        config: SignalingConfig,
        connector: Arc<dyn Connector>,
        peer: Arc<dyn PeerConnection>,
        channel: crate::transport::TransportChannel,
        response: JoinResponse,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();

        let task = task::SessionTask::new(
            config,
            connector,
            peer,
            command_rx,
            candidate_rx,
            &response,
        );
        let shared = Arc::new(Shared::new(task.room_snapshot(), events));
        tokio::spawn(task.run(shared.clone(), channel));

        Self {
            commands: command_tx,
            candidates: CandidateSink { tx: candidate_tx },
            shared,
        }
    }

    /// Subscribe to session events from now on
    pub fn events(&self) -> EventStream {
        let stream = BroadcastStream::new(self.shared.subscribe()).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "Event subscriber lagged, events dropped");
                None
            }
        });
        Box::pin(stream)
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Wait until the session reaches `state`
    ///
    /// Fails with `Error::Closed` if the session closes first.
    pub async fn wait_for_state(&self, state: SessionState) -> Result<()> {
        let mut rx = self.shared.state.subscribe();
        let reached = rx
            .wait_for(|s| *s == state || *s == SessionState::Closed)
            .await
            .map(|s| *s)
            .map_err(|_| Error::Closed)?;

        if reached == state {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    /// Immutable snapshot of the room
    pub fn room(&self) -> Arc<RoomSnapshot> {
        self.shared.room.read().clone()
    }

    /// Current negotiation role
    pub fn negotiation_role(&self) -> NegotiationRole {
        *self.shared.role.lock()
    }

    /// Reconnect attempts made since the connection was last healthy
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Sink for local ICE candidates produced by the peer connection
    pub fn candidate_sink(&self) -> CandidateSink {
        self.candidates.clone()
    }

    /// Transmit a local ICE candidate
    pub fn send_local_candidate(
        &self,
        candidate: IceCandidateInit,
        target: SignalTarget,
    ) -> Result<()> {
        self.candidates.send(candidate, target)
    }

    /// Start a local offer
    ///
    /// Fails with `Error::InvalidState` unless negotiation is idle.
    pub async fn initiate_offer(&self) -> Result<()> {
        self.request(|reply| Request::InitiateOffer { reply }).await
    }

    /// Announce a local track; returns its client id
    ///
    /// The track stays pending until the server acknowledges it, at which
    /// point a `TrackPublished` event is emitted. An empty `cid` is
    /// replaced by a generated one.
    pub async fn publish_track(&self, mut request: AddTrackRequest) -> Result<String> {
        if request.cid.is_empty() {
            request.cid = uuid::Uuid::new_v4().to_string();
        }
        self.request(|reply| Request::PublishTrack { request, reply })
            .await
    }

    /// Remove a published local track and renegotiate
    pub async fn unpublish_track(&self, track_sid: &str) -> Result<()> {
        let track_sid = track_sid.to_string();
        self.request(|reply| Request::UnpublishTrack { track_sid, reply })
            .await
    }

    /// Subscribe to or unsubscribe from remote tracks
    pub async fn set_subscription(&self, track_sids: Vec<String>, subscribe: bool) -> Result<()> {
        self.request(|reply| Request::SetSubscription {
            track_sids,
            subscribe,
            reply,
        })
        .await
    }

    /// Allow (or stop allowing) all participants to subscribe to local tracks
    pub async fn set_subscription_permission(&self, all_participants: bool) -> Result<()> {
        self.request(|reply| Request::SubscriptionPermission {
            all_participants,
            reply,
        })
        .await
    }

    /// Mute or unmute a local track
    pub async fn mute_track(&self, track_sid: &str, muted: bool) -> Result<()> {
        let track_sid = track_sid.to_string();
        self.request(|reply| Request::MuteTrack {
            track_sid,
            muted,
            reply,
        })
        .await
    }

    /// Leave the room and tear the session down
    ///
    /// Cancels a pending reconnect. Idempotent: later calls return `Ok`
    /// once the session is closed.
    pub async fn close(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Close(ack_tx)).is_ok() {
            // Dropped unanswered if the task was already finishing.
            let _ = ack_rx.await;
        }
        self.wait_for_state(SessionState::Closed).await
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Request(make(reply)))
            .map_err(|_| Error::Closed)?;
        response.await.map_err(|_| Error::Closed)?
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .field("role", &self.negotiation_role())
            .finish()
    }
}
