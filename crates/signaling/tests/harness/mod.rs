//! Signaling Session Test Harness
//!
//! Provides infrastructure for integration testing of signaling sessions:
//! - Scripted signaling server over the in-memory transport
//! - Recording `PeerConnection` fake
//! - Builders for join responses, participants and tracks
//! - Event assertion helpers
//!
//! Basic usage pattern:
//!
//! 1. Create a `TestServer`
//! 2. Call `server.connect(join_response(..))` to get a joined session
//! 3. Drive the server side with `ServerConn::send` / `next_request`
//! 4. Assert on `SessionHandle::events()` and `SessionHandle::room()`

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use room_signaling::protocol::{
    JoinRequest, JoinResponse, ParticipantInfo, ParticipantInfoState, RoomInfo, SdpType,
    ServerInfo, SignalRequest, SignalResponse, TrackInfo, TrackType,
};
use room_signaling::transport::{MemoryConnector, MemoryListener, MemoryServerConn};
use room_signaling::{
    EventStream, IceCandidateInit, PeerConnection, ReconnectPolicy, Result, SessionDescription,
    SessionEvent, SessionHandle, SignalingConfig,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for any single wait in a test
pub const WAIT: Duration = Duration::from_secs(5);

pub const LOCAL_SID: &str = "PA_local";
pub const LOCAL_IDENTITY: &str = "alice";
pub const TOKEN: &str = "token-1";
pub const ROOM: &str = "standup";

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Peer connection call seen by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    CreateOffer,
    CreateAnswer(String),
    SetRemoteDescription(SdpType, String),
    AddIceCandidate(String),
}

/// `PeerConnection` that records calls and answers with canned SDP
///
/// Offers are numbered `offer-1`, `offer-2`, ...; answers echo the offer
/// as `answer-to:<offer sdp>`.
#[derive(Debug, Default)]
pub struct FakePeer {
    calls: Mutex<Vec<PeerCall>>,
    offers: AtomicU32,
    fail_remote_description: Mutex<bool>,
}

impl FakePeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().clone()
    }

    /// Make `set_remote_description` fail until reset
    pub fn fail_remote_description(&self, fail: bool) {
        *self.fail_remote_description.lock() = fail;
    }

    /// Wait until at least `n` calls were recorded
    pub async fn wait_for_calls(&self, n: usize) -> Vec<PeerCall> {
        tokio::time::timeout(WAIT, async {
            loop {
                let calls = self.calls();
                if calls.len() >= n {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {} peer calls, got {:?}", n, self.calls()))
    }

    fn record(&self, call: PeerCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(PeerCall::CreateOffer);
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::offer(format!("offer-{}", n)))
    }

    async fn create_answer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.record(PeerCall::CreateAnswer(offer.sdp.clone()));
        Ok(SessionDescription::answer(format!("answer-to:{}", offer.sdp)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record(PeerCall::SetRemoteDescription(
            description.sdp_type,
            description.sdp,
        ));
        if *self.fail_remote_description.lock() {
            return Err(room_signaling::Error::PeerConnection(
                "rejected remote description".to_string(),
            ));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        self.record(PeerCall::AddIceCandidate(candidate.candidate));
        Ok(())
    }
}

/// Scripted signaling server on the in-memory transport
pub struct TestServer {
    pub connector: MemoryConnector,
    listener: MemoryListener,
}

impl TestServer {
    pub fn new() -> Self {
        let (connector, listener) = MemoryConnector::new();
        Self {
            connector,
            listener,
        }
    }

    /// Config pointing at the memory transport with fast, deterministic retries
    pub fn config(&self) -> SignalingConfig {
        SignalingConfig::new("ws://memory.test", TOKEN, ROOM)
            .with_join_timeout(Duration::from_secs(2))
            .with_reconnect_policy(ReconnectPolicy {
                max_attempts: 3,
                backoff_initial_ms: 10,
                backoff_max_ms: 50,
                backoff_multiplier: 2.0,
                jitter: false,
            })
    }

    /// Wait for the next client connection
    pub async fn accept(&mut self) -> ServerConn {
        let conn = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped");
        ServerConn { conn }
    }

    /// Join a session with `config`, answering the join with `response`
    pub async fn connect_with_config(
        &mut self,
        config: SignalingConfig,
        response: JoinResponse,
    ) -> (SessionHandle, ServerConn, Arc<FakePeer>) {
        let peer = FakePeer::new();
        let connector = Arc::new(self.connector.clone());

        let (session, conn) = tokio::join!(
            SessionHandle::connect_with(config, connector, peer.clone()),
            async {
                let mut conn = self.accept().await;
                let join = conn.expect_join().await;
                assert!(!join.reconnect);
                conn.send(SignalResponse::Join(response));
                conn
            }
        );

        (session.expect("connect failed"), conn, peer)
    }

    pub async fn connect(
        &mut self,
        response: JoinResponse,
    ) -> (SessionHandle, ServerConn, Arc<FakePeer>) {
        let config = self.config();
        self.connect_with_config(config, response).await
    }
}

/// Server end of one client connection
pub struct ServerConn {
    pub conn: MemoryServerConn,
}

impl ServerConn {
    pub fn query(&self, key: &str) -> Option<String> {
        self.conn.query(key)
    }

    pub fn send(&self, response: SignalResponse) {
        self.conn
            .send_response(&response)
            .expect("client end closed");
    }

    pub fn send_raw(&self, frame: &[u8]) {
        self.conn
            .send_frame(frame.to_vec())
            .expect("client end closed");
    }

    /// Next request other than keepalive pings
    pub async fn next_request(&mut self) -> SignalRequest {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.conn.recv_request().await {
                    Some(Ok(SignalRequest::Ping(_))) => continue,
                    Some(Ok(request)) => return request,
                    Some(Err(e)) => panic!("client sent an undecodable frame: {}", e),
                    None => panic!("client closed the connection"),
                }
            }
        })
        .await
        .expect("timed out waiting for a request")
    }

    /// Next request including pings; `None` once the client closed
    pub async fn recv(&mut self) -> Option<SignalRequest> {
        tokio::time::timeout(WAIT, self.conn.recv_request())
            .await
            .expect("timed out waiting for a request")
            .map(|request| request.expect("undecodable frame"))
    }

    pub async fn expect_join(&mut self) -> JoinRequest {
        match self.next_request().await {
            SignalRequest::Join(join) => join,
            other => panic!("expected join, got {:?}", other),
        }
    }

    /// Wait until the client closes its end
    pub async fn expect_closed(&mut self) {
        tokio::time::timeout(WAIT, async {
            while self.conn.recv_frame().await.is_some() {}
        })
        .await
        .expect("client did not close the connection");
    }

    pub fn disconnect(self) {
        self.conn.disconnect(Some("network lost"));
    }
}

pub fn join_response(others: Vec<ParticipantInfo>) -> JoinResponse {
    JoinResponse {
        room: RoomInfo {
            sid: "RM_1".to_string(),
            name: ROOM.to_string(),
            ..Default::default()
        },
        participant: participant(LOCAL_SID, LOCAL_IDENTITY, 1),
        other_participants: others,
        server_info: ServerInfo {
            version: "1.0.0".to_string(),
            node_id: "ND_server".to_string(),
            ..Default::default()
        },
        ping_interval: 0,
        ping_timeout: 0,
        ..Default::default()
    }
}

pub fn participant(sid: &str, identity: &str, version: u32) -> ParticipantInfo {
    ParticipantInfo {
        sid: sid.to_string(),
        identity: identity.to_string(),
        state: ParticipantInfoState::Active,
        joined_at: 1_700_000_000,
        name: identity.to_string(),
        version,
        ..Default::default()
    }
}

pub fn track(sid: &str, kind: TrackType) -> TrackInfo {
    TrackInfo {
        sid: sid.to_string(),
        kind,
        name: sid.to_lowercase(),
        ..Default::default()
    }
}

/// Next event, failing the test after `WAIT`
pub async fn next_event(events: &mut EventStream) -> SessionEvent {
    tokio::time::timeout(WAIT, events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

/// Skip events until one matches `pred`
pub async fn event_matching(
    events: &mut EventStream,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Assert no event arrives within `window`
pub async fn expect_quiet(events: &mut EventStream, window: Duration) {
    if let Ok(event) = tokio::time::timeout(window, events.next()).await {
        panic!("unexpected event: {:?}", event);
    }
}
