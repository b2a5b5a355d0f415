//! WebRTC-Backed Peer Links

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::IceServerConfig;
use crate::media::capture::LocalTrack;
use crate::media::link::{LinkError, LinkHooks, LinkState, PeerConnector, PeerLink, RemoteAudio};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};

/// Opens WebRTC peer connections configured with the room's ICE servers.
pub struct RtcConnector {
    ice_servers: Vec<IceServerConfig>,
}

impl RtcConnector {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Self {
        Self { ice_servers }
    }

    fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect()
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn open(&self, hooks: LinkHooks) -> Result<Arc<dyn PeerLink>, LinkError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| LinkError::Transport(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| LinkError::Transport(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers: self.rtc_ice_servers(),
                ..Default::default()
            })
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))?;
        let pc = Arc::new(pc);

        let LinkHooks {
            on_candidate,
            on_track,
            on_state,
        } = hooks;
        let on_candidate: Arc<dyn Fn(IceCandidate) + Send + Sync> = Arc::from(on_candidate);
        let on_track: Arc<dyn Fn(RemoteAudio) + Send + Sync> = Arc::from(on_track);
        let on_state: Arc<dyn Fn(LinkState) + Send + Sync> = Arc::from(on_state);

        pc.on_ice_candidate(Box::new(move |candidate| {
            let on_candidate = Arc::clone(&on_candidate);
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => on_candidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    }),
                    Err(e) => debug!("unserializable candidate dropped: {e}"),
                }
            })
        }));

        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let on_track = Arc::clone(&on_track);
                Box::pin(async move {
                    let (packet_tx, packet_rx) = mpsc::unbounded_channel();
                    on_track(RemoteAudio {
                        track_id: track.id(),
                        packets: packet_rx,
                    });
                    tokio::spawn(read_remote_track(track, packet_tx));
                })
            },
        ));

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            on_state(map_link_state(state));
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcLink { pc }))
    }
}

fn map_link_state(state: RTCPeerConnectionState) -> LinkState {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => LinkState::New,
        RTCPeerConnectionState::Connecting => LinkState::Connecting,
        RTCPeerConnectionState::Connected => LinkState::Connected,
        RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
        RTCPeerConnectionState::Failed => LinkState::Failed,
        RTCPeerConnectionState::Closed => LinkState::Closed,
    }
}

/// Pump RTP from a remote track into the consumer channel until the
/// track ends or the consumer goes away.
async fn read_remote_track(
    track: Arc<TrackRemote>,
    packet_tx: mpsc::UnboundedSender<webrtc::rtp::packet::Packet>,
) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                if packet_tx.send(packet).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("remote track {} ended: {e}", track.id());
                break;
            }
        }
    }
}

/// A live WebRTC peer connection.
struct RtcLink {
    pc: Arc<RTCPeerConnection>,
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, LinkError> {
    let result = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    result.map_err(|e| LinkError::Negotiation(e.to_string()))
}

#[async_trait]
impl PeerLink for RtcLink {
    async fn attach_track(&self, track: &LocalTrack) -> Result<(), LinkError> {
        let sender = self
            .pc
            .add_track(track.rtc_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))?;

        // Drain RTCP for this sender so the interceptors keep running.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, LinkError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| LinkError::Negotiation(e.to_string()))?;
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: offer.sdp,
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, LinkError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| LinkError::Negotiation(e.to_string()))?;
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: answer.sdp,
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), LinkError> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| LinkError::Negotiation(e.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), LinkError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| LinkError::Negotiation(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), LinkError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                ..Default::default()
            })
            .await
            .map_err(|e| LinkError::Negotiation(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("peer connection close failed: {e}");
        }
    }
}
