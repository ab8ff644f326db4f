//! Session task: single dispatch path for one signaling session

use super::join;
use super::{Command, Request, SessionState, Shared};
use crate::config::SignalingConfig;
use crate::event::SessionEvent;
use crate::negotiation::{
    Completion, NegotiationAction, NegotiationCoordinator, PeerConnection,
};
use crate::protocol::{
    self, DisconnectReason, JoinResponse, LeaveRequest, MuteTrackRequest, SignalRequest,
    SignalResponse, SubscriptionPermission, TrickleRequest, UpdateSubscription,
};
use crate::room::{MergeOutcome, RoomSnapshot, RoomState, Track, TrackEvent};
use crate::transport::{Connector, TransportChannel, TransportEvent};
use crate::{Error, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

/// Glare peer id when the server does not report a node id
const DEFAULT_REMOTE_ID: &str = "server";

/// Why the joined loop returned
enum Exit {
    /// Application asked to close (or dropped every handle)
    Close(Option<oneshot::Sender<()>>),
    /// Connection lost; reconnect
    Lost { reason: String, immediate: bool },
    /// Server ended the session for good
    Terminal(DisconnectReason),
}

/// How the session ended
struct Ended {
    reason: DisconnectReason,
    ack: Option<oneshot::Sender<()>>,
}

/// Keepalive settings for the current connection
#[derive(Debug, Clone, Copy)]
struct Keepalive {
    interval: Option<Duration>,
    timeout: Duration,
}

impl Keepalive {
    fn new(config: &SignalingConfig, response: &JoinResponse) -> Self {
        let interval_ms = match config.ping_interval_ms {
            0 => u64::from(response.ping_interval) * 1000,
            ms => ms,
        };
        let timeout_ms = match (config.ping_timeout_ms, response.ping_timeout) {
            (0, 0) => interval_ms * 2,
            (0, secs) => u64::from(secs) * 1000,
            (ms, _) => ms,
        };

        Self {
            interval: (interval_ms > 0).then(|| Duration::from_millis(interval_ms)),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn timer(&self) -> Option<Interval> {
        self.interval.map(|period| {
            let mut timer = tokio::time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        })
    }
}

pub(crate) struct SessionTask {
    config: SignalingConfig,
    connector: Arc<dyn Connector>,
    peer: Arc<dyn PeerConnection>,
    commands: mpsc::UnboundedReceiver<Command>,
    candidates: mpsc::UnboundedReceiver<TrickleRequest>,
    token: String,
    room: RoomState,
    coordinator: NegotiationCoordinator,
    in_flight: Option<BoxFuture<'static, Completion>>,
    keepalive: Keepalive,
}

impl SessionTask {
    pub(crate) fn new(
        config: SignalingConfig,
        connector: Arc<dyn Connector>,
        peer: Arc<dyn PeerConnection>,
        commands: mpsc::UnboundedReceiver<Command>,
        candidates: mpsc::UnboundedReceiver<TrickleRequest>,
        response: &JoinResponse,
    ) -> Self {
        Self {
            token: config.token.clone(),
            room: RoomState::from_join(response, config.auto_subscribe),
            coordinator: NegotiationCoordinator::new(
                response.participant.sid.clone(),
                remote_id(response),
            ),
            keepalive: Keepalive::new(&config, response),
            config,
            connector,
            peer,
            commands,
            candidates,
            in_flight: None,
        }
    }

    pub(crate) fn room_snapshot(&self) -> RoomSnapshot {
        self.room.snapshot()
    }

    pub(crate) async fn run(mut self, shared: Arc<Shared>, mut channel: TransportChannel) {
        let ended = loop {
            match self.serve(&shared, &mut channel).await {
                Exit::Close(ack) => {
                    info!("Leaving room");
                    let _ = send(
                        &channel,
                        SignalRequest::Leave(LeaveRequest {
                            can_reconnect: false,
                            reason: DisconnectReason::ClientInitiated,
                        }),
                    );
                    channel.close().await;
                    break Ended {
                        reason: DisconnectReason::ClientInitiated,
                        ack,
                    };
                }
                Exit::Terminal(reason) => {
                    warn!(?reason, "Server closed the session");
                    channel.close().await;
                    break Ended { reason, ack: None };
                }
                Exit::Lost { reason, immediate } => {
                    warn!("Signal connection lost: {}", reason);
                    channel.close().await;
                    match self.reconnect(&shared, immediate).await {
                        Ok(next) => channel = next,
                        Err(ended) => break ended,
                    }
                }
            }
        };

        self.finish(&shared, ended);
    }

    fn finish(mut self, shared: &Shared, ended: Ended) {
        self.in_flight = None;
        info!(reason = ?ended.reason, "Session closed");

        shared.emit(SessionEvent::Disconnected {
            reason: ended.reason,
        });
        shared.end_events();
        shared.set_state(SessionState::Closed);

        if let Some(ack) = ended.ack {
            let _ = ack.send(());
        }

        // Requests that raced the shutdown see their reply dropped (`Closed`).
        self.commands.close();
        while self.commands.try_recv().is_ok() {}
    }

    /// Joined loop: dispatch until the connection ends
    async fn serve(&mut self, shared: &Shared, channel: &mut TransportChannel) -> Exit {
        let mut keepalive = self.keepalive.timer();
        let mut last_seen = Instant::now();

        loop {
            self.pump(shared, channel);

            tokio::select! {
                command = self.commands.recv() => match command {
                    None => return Exit::Close(None),
                    Some(Command::Close(ack)) => return Exit::Close(Some(ack)),
                    Some(Command::Request(request)) => self.handle_request(shared, channel, request),
                },
                Some(trickle) = self.candidates.recv() => {
                    let _ = send(channel, SignalRequest::Trickle(trickle));
                }
                event = channel.recv() => match event {
                    Some(TransportEvent::Message(frame)) => {
                        last_seen = Instant::now();
                        if let Some(exit) = self.dispatch(shared, &frame) {
                            return exit;
                        }
                    }
                    Some(TransportEvent::Closed(reason)) => {
                        return Exit::Lost {
                            reason: reason.unwrap_or_else(|| "closed by server".to_string()),
                            immediate: false,
                        };
                    }
                    None => {
                        return Exit::Lost {
                            reason: "transport ended".to_string(),
                            immediate: false,
                        };
                    }
                },
                completion = next_completion(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.complete(completion);
                }
                _ = tick(&mut keepalive) => {
                    if last_seen.elapsed() >= self.keepalive.timeout {
                        return Exit::Lost {
                            reason: format!("no message for {:?}", last_seen.elapsed()),
                            immediate: false,
                        };
                    }
                    let _ = send(channel, SignalRequest::Ping(unix_millis()));
                }
            }
        }
    }

    /// Run coordinator actions until a peer call is in flight
    fn pump(&mut self, shared: &Shared, channel: &TransportChannel) {
        while self.in_flight.is_none() {
            let Some(action) = self.coordinator.poll_action() else {
                break;
            };
            let peer = self.peer.clone();
            match action {
                NegotiationAction::SendOffer(offer) => {
                    let _ = send(channel, SignalRequest::Offer(offer));
                }
                NegotiationAction::SendAnswer(answer) => {
                    let _ = send(channel, SignalRequest::Answer(answer));
                }
                NegotiationAction::CreateOffer { epoch } => {
                    self.in_flight = Some(Box::pin(async move {
                        Completion::OfferCreated {
                            epoch,
                            result: peer.create_offer().await,
                        }
                    }));
                }
                NegotiationAction::CreateAnswer { epoch, offer } => {
                    self.in_flight = Some(Box::pin(async move {
                        Completion::AnswerCreated {
                            epoch,
                            result: peer.create_answer(offer).await,
                        }
                    }));
                }
                NegotiationAction::ApplyAnswer { epoch, answer } => {
                    self.in_flight = Some(Box::pin(async move {
                        Completion::AnswerApplied {
                            epoch,
                            result: peer.set_remote_description(answer).await,
                        }
                    }));
                }
                NegotiationAction::AddIceCandidate(candidate) => {
                    self.in_flight = Some(Box::pin(async move {
                        Completion::CandidateAdded {
                            result: peer.add_ice_candidate(candidate).await,
                        }
                    }));
                }
            }
        }
        shared.set_role(self.coordinator.role());
    }

    fn complete(&mut self, completion: Completion) {
        match self.coordinator.handle_completion(completion) {
            Ok(()) => {}
            Err(e @ Error::StaleNegotiation { .. }) => debug!("Discarding stale completion: {}", e),
            Err(e) => warn!("Peer connection call failed: {}", e),
        }
    }

    /// Route one inbound frame
    fn dispatch(&mut self, shared: &Shared, frame: &[u8]) -> Option<Exit> {
        let response = match protocol::decode_response(frame) {
            Ok(response) => response,
            Err(e) => {
                warn!("Dropping malformed signaling message: {}", e);
                return None;
            }
        };
        debug!(kind = response.kind(), "Received signal");

        match response {
            SignalResponse::Update(update) => {
                let mut events = Vec::new();
                for info in &update.participants {
                    match self.room.apply_participant_update(info) {
                        MergeOutcome::Applied(change) => events.extend(change.into_events()),
                        MergeOutcome::Discarded => {}
                    }
                }
                if !events.is_empty() {
                    shared.publish_room(self.room.snapshot());
                    events.into_iter().for_each(|event| shared.emit(event));
                }
            }
            SignalResponse::TrackPublished(published) => self.apply_track(
                shared,
                TrackEvent::Published {
                    cid: published.cid,
                    track: published.track,
                },
                SessionEvent::TrackPublished,
            ),
            SignalResponse::TrackUnpublished(unpublished) => self.apply_track(
                shared,
                TrackEvent::Unpublished {
                    track_sid: unpublished.track_sid,
                },
                SessionEvent::TrackUnpublished,
            ),
            SignalResponse::TrackSubscribed(subscribed) => self.apply_track(
                shared,
                TrackEvent::Subscribed {
                    track_sid: subscribed.track_sid,
                },
                SessionEvent::TrackSubscribed,
            ),
            SignalResponse::Mute(mute) => self.apply_track(
                shared,
                TrackEvent::Muted {
                    track_sid: mute.sid,
                    muted: mute.muted,
                },
                SessionEvent::TrackMuted,
            ),
            SignalResponse::RoomUpdate(update) => {
                if let MergeOutcome::Applied(metadata_version) =
                    self.room.apply_room_update(&update.room)
                {
                    shared.publish_room(self.room.snapshot());
                    shared.emit(SessionEvent::RoomUpdated {
                        metadata: update.room.metadata,
                        metadata_version,
                    });
                }
            }
            SignalResponse::Offer(offer) => {
                trace!(sdp = %offer.sdp, "Remote offer");
                let disposition = self.coordinator.handle_remote_offer(offer);
                debug!(?disposition, "Remote offer handled");
            }
            SignalResponse::Answer(answer) => {
                trace!(sdp = %answer.sdp, "Remote answer");
                if let Err(e) = self.coordinator.handle_remote_answer(answer) {
                    debug!("Discarding remote answer: {}", e);
                }
            }
            SignalResponse::Trickle(trickle) => {
                let disposition = self.coordinator.add_remote_candidate(trickle.candidate);
                trace!(?disposition, target = ?trickle.target, "Remote candidate");
            }
            SignalResponse::NegotiationRequired(_) => {
                shared.emit(SessionEvent::NegotiationRequired);
                let renegotiation = self.coordinator.negotiation_required();
                debug!(?renegotiation, "Server requested negotiation");
            }
            SignalResponse::Leave(leave) => {
                info!(reason = ?leave.reason, can_reconnect = leave.can_reconnect, "Server requested leave");
                return Some(if leave.can_reconnect {
                    Exit::Lost {
                        reason: "server requested reconnect".to_string(),
                        immediate: true,
                    }
                } else {
                    Exit::Terminal(leave.reason)
                });
            }
            SignalResponse::RefreshToken(token) => {
                debug!("Access token refreshed");
                self.token = token;
                shared.emit(SessionEvent::TokenRefreshed);
            }
            SignalResponse::Pong(timestamp) => {
                trace!(rtt_ms = unix_millis() - timestamp, "Pong");
            }
            SignalResponse::Error(e) => {
                warn!(code = e.code, "Server error: {}", e.message);
            }
            SignalResponse::Join(_) => {
                warn!("Ignoring join response on an established session");
            }
            SignalResponse::SpeakersChanged(changed) => {
                shared.emit(SessionEvent::SpeakersChanged(changed.speakers));
            }
            SignalResponse::ConnectionQuality(update) => {
                shared.emit(SessionEvent::ConnectionQualityChanged(update.updates));
            }
            SignalResponse::StreamStateUpdate(update) => {
                shared.emit(SessionEvent::StreamStateChanged(update.stream_states));
            }
            SignalResponse::SubscribedQualityUpdate(update) => {
                shared.emit(SessionEvent::SubscribedQualityChanged(update));
            }
            SignalResponse::SubscriptionPermissionUpdate(update) => {
                shared.emit(SessionEvent::SubscriptionPermissionChanged(update));
            }
        }

        None
    }

    fn apply_track(
        &mut self,
        shared: &Shared,
        event: TrackEvent,
        to_event: fn(Track) -> SessionEvent,
    ) {
        match self.room.apply_track_event(event) {
            MergeOutcome::Applied(track) => {
                shared.publish_room(self.room.snapshot());
                shared.emit(to_event(track));
            }
            MergeOutcome::Discarded => debug!("Discarding duplicate track event"),
        }
    }

    fn handle_request(&mut self, shared: &Shared, channel: &TransportChannel, request: Request) {
        match request {
            Request::InitiateOffer { reply } => {
                let result = self.coordinator.initiate_offer().map(|epoch| {
                    debug!(epoch, "Initiating offer");
                });
                let _ = reply.send(result);
            }
            Request::PublishTrack { request, reply } => {
                let cid = request.cid.clone();
                let result = match self
                    .room
                    .apply_track_event(TrackEvent::PublishRequested(request.clone()))
                {
                    MergeOutcome::Applied(_) => {
                        shared.publish_room(self.room.snapshot());
                        send(channel, SignalRequest::AddTrack(request)).map(|_| cid)
                    }
                    MergeOutcome::Discarded => Err(Error::InvalidState(format!(
                        "track {} already requested",
                        cid
                    ))),
                };
                let _ = reply.send(result);
            }
            Request::UnpublishTrack { track_sid, reply } => {
                if self.room.local_track(&track_sid).is_none() {
                    let _ = reply.send(Err(Error::InvalidState(format!(
                        "no local track {}",
                        track_sid
                    ))));
                    return;
                }
                let result = match self.room.apply_track_event(TrackEvent::Unpublished {
                    track_sid: track_sid.clone(),
                }) {
                    MergeOutcome::Applied(track) => {
                        shared.publish_room(self.room.snapshot());
                        shared.emit(SessionEvent::TrackUnpublished(track));
                        let _ = self.coordinator.negotiation_required();
                        Ok(())
                    }
                    MergeOutcome::Discarded => Err(Error::InvalidState(format!(
                        "no local track {}",
                        track_sid
                    ))),
                };
                let _ = reply.send(result);
            }
            Request::SetSubscription {
                track_sids,
                subscribe,
                reply,
            } => {
                let mut changed = false;
                for track_sid in &track_sids {
                    changed |= self
                        .room
                        .apply_track_event(TrackEvent::SubscriptionRequested {
                            track_sid: track_sid.clone(),
                            subscribe,
                        })
                        .is_applied();
                }
                if changed {
                    shared.publish_room(self.room.snapshot());
                }
                let result = send(
                    channel,
                    SignalRequest::Subscription(UpdateSubscription {
                        track_sids,
                        subscribe,
                    }),
                );
                let _ = reply.send(result);
            }
            Request::SubscriptionPermission {
                all_participants,
                reply,
            } => {
                let result = send(
                    channel,
                    SignalRequest::SubscriptionPermission(SubscriptionPermission {
                        all_participants,
                    }),
                );
                let _ = reply.send(result);
            }
            Request::MuteTrack {
                track_sid,
                muted,
                reply,
            } => {
                if self.room.local_track(&track_sid).is_none() {
                    let _ = reply.send(Err(Error::InvalidState(format!(
                        "no local track {}",
                        track_sid
                    ))));
                    return;
                }
                if let MergeOutcome::Applied(track) = self.room.apply_track_event(TrackEvent::Muted {
                    track_sid: track_sid.clone(),
                    muted,
                }) {
                    shared.publish_room(self.room.snapshot());
                    shared.emit(SessionEvent::TrackMuted(track));
                }
                let result = send(
                    channel,
                    SignalRequest::Mute(MuteTrackRequest {
                        sid: track_sid,
                        muted,
                    }),
                );
                let _ = reply.send(result);
            }
        }
    }

    /// Reconnect under the backoff policy
    ///
    /// On success the fresh join response replaces the room and the
    /// difference to the room before the drop is emitted as events.
    #[instrument(skip(self, shared), fields(room = %self.config.room))]
    async fn reconnect(
        &mut self,
        shared: &Shared,
        immediate: bool,
    ) -> std::result::Result<TransportChannel, Ended> {
        let previous = self.room.snapshot();
        let resume_sid = previous.local.sid.clone();

        self.in_flight = None;
        self.coordinator
            .reset(resume_sid.clone(), DEFAULT_REMOTE_ID.to_string());
        shared.set_role(self.coordinator.role());

        let policy = self.config.reconnect.clone();
        let mut attempt = 0u32;

        loop {
            if !policy.should_retry(attempt) {
                error!(attempts = attempt, "Reconnect attempts exhausted");
                return Err(Ended {
                    reason: DisconnectReason::ReconnectExhausted,
                    ack: None,
                });
            }

            let delay = if immediate && attempt == 0 {
                Duration::ZERO
            } else {
                policy.calculate_backoff(attempt)
            };
            attempt += 1;
            shared.set_state(SessionState::Reconnecting);
            shared.set_reconnect_attempts(attempt);
            info!(attempt, ?delay, "Reconnecting");
            shared.emit(SessionEvent::Reconnecting { attempt, delay });

            self.interruptible(tokio::time::sleep(delay)).await?;
            shared.set_state(SessionState::Connecting);

            let config = self.config.clone();
            let connector = self.connector.clone();
            let token = self.token.clone();
            let sid = resume_sid.clone();
            let result = self
                .interruptible(async move {
                    join::open_and_join(&config, connector.as_ref(), &token, Some(&sid)).await
                })
                .await?;

            match result {
                Ok((channel, response)) => {
                    self.rejoined(shared, &previous, &response);
                    return Ok(channel);
                }
                Err(Error::Auth(message)) => {
                    error!("Reconnect rejected: {}", message);
                    return Err(Ended {
                        reason: DisconnectReason::AuthFailed,
                        ack: None,
                    });
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, "Reconnect attempt failed: {}", e);
                }
                Err(e) => {
                    error!("Reconnect failed: {}", e);
                    return Err(Ended {
                        reason: DisconnectReason::JoinFailure,
                        ack: None,
                    });
                }
            }
        }
    }

    fn rejoined(&mut self, shared: &Shared, previous: &RoomSnapshot, response: &JoinResponse) {
        let mut room = RoomState::from_join(response, self.config.auto_subscribe);
        room.inherit(previous);
        let snapshot = room.snapshot();
        let events = previous.diff(&snapshot);

        self.room = room;
        self.coordinator
            .reset(response.participant.sid.clone(), remote_id(response));
        self.keepalive = Keepalive::new(&self.config, response);

        let mut stale = 0;
        while self.candidates.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "Dropped local candidates gathered before reconnect");
        }

        info!(reconciled = events.len(), "Reconnected");
        shared.publish_room(snapshot);
        shared.set_role(self.coordinator.role());
        events.into_iter().for_each(|event| shared.emit(event));
        shared.emit(SessionEvent::Reconnected);
        shared.set_reconnect_attempts(0);
        shared.set_state(SessionState::Joined);
    }

    /// Await `fut` while answering commands; a close request aborts it
    async fn interruptible<F: Future>(&mut self, fut: F) -> std::result::Result<F::Output, Ended> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                output = &mut fut => return Ok(output),
                command = self.commands.recv() => match command {
                    None => {
                        return Err(Ended {
                            reason: DisconnectReason::ClientInitiated,
                            ack: None,
                        })
                    }
                    Some(Command::Close(ack)) => {
                        info!("Close requested while reconnecting");
                        return Err(Ended {
                            reason: DisconnectReason::ClientInitiated,
                            ack: Some(ack),
                        });
                    }
                    Some(Command::Request(request)) => request.reject(),
                },
            }
        }
    }
}

fn send(channel: &TransportChannel, request: SignalRequest) -> Result<()> {
    let kind = request.kind();
    let frame = protocol::encode_request(&request)?;
    match channel.send(frame) {
        Ok(()) => {
            debug!(kind, "Sent signal");
            Ok(())
        }
        Err(e) => {
            warn!(kind, "Failed to send signal: {}", e);
            Err(e)
        }
    }
}

fn remote_id(response: &JoinResponse) -> String {
    if response.server_info.node_id.is_empty() {
        DEFAULT_REMOTE_ID.to_string()
    } else {
        response.server_info.node_id.clone()
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

async fn next_completion(slot: &mut Option<BoxFuture<'static, Completion>>) -> Completion {
    match slot {
        Some(call) => call.await,
        None => std::future::pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_from_join() {
        let config = SignalingConfig::default();
        let response = JoinResponse {
            ping_interval: 5,
            ping_timeout: 15,
            ..Default::default()
        };
        let keepalive = Keepalive::new(&config, &response);
        assert_eq!(keepalive.interval, Some(Duration::from_secs(5)));
        assert_eq!(keepalive.timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_keepalive_overrides_and_disable() {
        let mut config = SignalingConfig::default();
        let response = JoinResponse::default();
        assert_eq!(Keepalive::new(&config, &response).interval, None);

        config.ping_interval_ms = 200;
        let keepalive = Keepalive::new(&config, &response);
        assert_eq!(keepalive.interval, Some(Duration::from_millis(200)));
        assert_eq!(keepalive.timeout, Duration::from_millis(400));
    }

    #[test]
    fn test_remote_id_fallback() {
        let mut response = JoinResponse::default();
        assert_eq!(remote_id(&response), "server");
        response.server_info.node_id = "ND_1".to_string();
        assert_eq!(remote_id(&response), "ND_1");
    }
}
