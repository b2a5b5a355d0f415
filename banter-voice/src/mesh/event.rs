//! Mesh Event Stream
//!
//! Locally discovered candidates, link lifecycle, and every recovered
//! fault flow through one channel. Nothing fails unobserved.

use crate::media::link::LinkState;
use crate::signaling::{IceCandidate, PeerId};

/// Events emitted by the mesh.
#[derive(Debug)]
pub enum MeshEvent {
    /// A local ICE candidate is ready to be signaled to `peer_id`.
    CandidateReady {
        peer_id: PeerId,
        candidate: IceCandidate,
    },
    /// First audio arrived from a remote track of this peer.
    TrackStarted { peer_id: PeerId },
    /// The link's connectivity changed.
    LinkState { peer_id: PeerId, state: LinkState },
    /// The peer entry was torn down.
    PeerClosed { peer_id: PeerId },
    /// A recovered fault. The operation that hit it may still report
    /// success when the failure is tolerated by design.
    Error {
        peer_id: Option<PeerId>,
        message: String,
    },
}
