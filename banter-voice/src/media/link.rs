//! Peer-Connection Capability
//!
//! The mesh drives peer links through this seam: SDP generation and
//! commitment, track attachment, trickle ICE and link-state
//! observation. Production links are WebRTC peer connections
//! ([`crate::media::webrtc`]); tests substitute in-memory links.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::rtp::packet::Packet;

use crate::media::capture::LocalTrack;
use crate::signaling::{IceCandidate, SessionDescription};

/// Link-related errors.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("transport failed: {0}")]
    Transport(String),

    #[error("link closed")]
    Closed,
}

/// Connectivity of a single peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Inbound audio from one remote track, delivered as RTP packets.
pub struct RemoteAudio {
    pub track_id: String,
    pub packets: mpsc::UnboundedReceiver<Packet>,
}

impl std::fmt::Debug for RemoteAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAudio")
            .field("track_id", &self.track_id)
            .finish()
    }
}

/// Callbacks wired into a link at creation time.
pub struct LinkHooks {
    /// A local ICE candidate was discovered.
    pub on_candidate: Box<dyn Fn(IceCandidate) + Send + Sync>,
    /// A remote track started delivering audio.
    pub on_track: Box<dyn Fn(RemoteAudio) + Send + Sync>,
    /// The link's connectivity changed.
    pub on_state: Box<dyn Fn(LinkState) + Send + Sync>,
}

/// One negotiable media link to a remote peer.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Attach a local track as an outgoing source.
    async fn attach_track(&self, track: &LocalTrack) -> Result<(), LinkError>;

    /// Generate a local offer. Does not commit it.
    async fn create_offer(&self) -> Result<SessionDescription, LinkError>;

    /// Generate a local answer to the committed remote offer.
    async fn create_answer(&self) -> Result<SessionDescription, LinkError>;

    /// Commit a locally generated description.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), LinkError>;

    /// Commit the remote side's description.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), LinkError>;

    /// Add a trickled remote candidate.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), LinkError>;

    /// Tear the link down. Idempotent.
    async fn close(&self);
}

/// Opens new peer links.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn open(&self, hooks: LinkHooks) -> Result<Arc<dyn PeerLink>, LinkError>;
}
