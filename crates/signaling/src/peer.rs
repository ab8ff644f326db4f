//! `PeerConnection` backed by webrtc-rs
//!
//! Enabled with the `webrtc-peer` feature. Local ICE candidates gathered
//! before [`WebRtcPeer::attach`] are buffered and flushed on attach.

use crate::negotiation::PeerConnection;
use crate::protocol::{IceCandidateInit, IceServer, SdpType, SessionDescription, SignalTarget};
use crate::session::CandidateSink;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

enum CandidateRoute {
    Buffering(Vec<IceCandidateInit>),
    Attached(CandidateSink),
}

/// WebRTC peer connection adapter
pub struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    target: SignalTarget,
    route: Arc<Mutex<CandidateRoute>>,
}

impl WebRtcPeer {
    /// Create a peer connection with default codecs and interceptors
    #[instrument(skip(ice_servers), fields(servers = ice_servers.len()))]
    pub async fn new(ice_servers: &[IceServer]) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| peer_error("Failed to register codecs", e))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine)
                .map_err(|e| peer_error("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone(),
                    credential: server.credential.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| peer_error("Failed to create peer connection", e))?,
        );

        info!("Created peer connection");
        Ok(Self::from_peer_connection(peer_connection, SignalTarget::Publisher))
    }

    /// Wrap an existing peer connection
    ///
    /// Gathered candidates are sent with `target`.
    pub fn from_peer_connection(
        peer_connection: Arc<RTCPeerConnection>,
        target: SignalTarget,
    ) -> Self {
        let route = Arc::new(Mutex::new(CandidateRoute::Buffering(Vec::new())));

        let gathered = Arc::clone(&route);
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let gathered = Arc::clone(&gathered);
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                let init = match candidate.to_json() {
                    Ok(init) => init,
                    Err(e) => {
                        warn!("Failed to serialize local candidate: {}", e);
                        return;
                    }
                };
                let candidate = IceCandidateInit {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                };

                match &mut *gathered.lock() {
                    CandidateRoute::Buffering(pending) => pending.push(candidate),
                    CandidateRoute::Attached(sink) => {
                        if let Err(e) = sink.send(candidate, target) {
                            debug!("Dropping local candidate: {}", e);
                        }
                    }
                }
            })
        }));

        Self {
            peer_connection,
            target,
            route,
        }
    }

    /// Route gathered candidates to a session
    pub fn attach(&self, sink: CandidateSink) {
        let mut route = self.route.lock();
        if let CandidateRoute::Buffering(pending) = &mut *route {
            let flushed = pending.len();
            for candidate in pending.drain(..) {
                if let Err(e) = sink.send(candidate, self.target) {
                    debug!("Dropping local candidate: {}", e);
                }
            }
            debug!(flushed, "Attached candidate sink");
        }
        *route = CandidateRoute::Attached(sink);
    }

    /// Underlying webrtc-rs peer connection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    async fn local_description(&self) -> Result<SessionDescription> {
        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::PeerConnection("no local description".to_string()))?;

        Ok(SessionDescription {
            sdp_type: match local.sdp_type {
                RTCSdpType::Offer => SdpType::Offer,
                _ => SdpType::Answer,
            },
            sdp: local.sdp,
        })
    }

    async fn rollback_local_offer(&self) -> Result<()> {
        if self.peer_connection.signaling_state() != RTCSignalingState::HaveLocalOffer {
            return Ok(());
        }
        debug!("Rolling back local offer");
        let mut rollback = RTCSessionDescription::default();
        rollback.sdp_type = RTCSdpType::Rollback;
        self.peer_connection
            .set_local_description(rollback)
            .await
            .map_err(|e| peer_error("Failed to roll back local offer", e))
    }
}

impl std::fmt::Debug for WebRtcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcPeer")
            .field("target", &self.target)
            .field("signaling_state", &self.peer_connection.signaling_state())
            .finish()
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| peer_error("Failed to create offer", e))?;
        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| peer_error("Failed to set local description", e))?;
        self.local_description().await
    }

    async fn create_answer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.rollback_local_offer().await?;

        let offer = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| peer_error("Failed to parse offer", e))?;
        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| peer_error("Failed to set remote description", e))?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| peer_error("Failed to create answer", e))?;
        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| peer_error("Failed to set local description", e))?;
        self.local_description().await
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| peer_error("Failed to parse remote description", e))?;

        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| peer_error("Failed to set remote description", e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| peer_error("Failed to add ICE candidate", e))
    }
}

fn peer_error(context: &str, e: webrtc::Error) -> Error {
    Error::PeerConnection(format!("{}: {}", context, e))
}
