//! Per-Peer Connection Entries

use std::sync::Arc;

use crate::media::link::PeerLink;
use crate::media::playback::AudioSink;
use crate::signaling::PeerId;

/// Negotiation phase of one remote peer. A closed peer has no entry:
/// removal from the table is the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    /// We sent the offer and are waiting on the remote answer.
    Offering,
    /// The remote offered and we are producing the answer.
    Answering,
    /// Both descriptions are committed.
    Connected,
}

/// One remote participant: the link carrying media and the playback
/// target rendering it. Entries are owned exclusively by the mesh table
/// and never handed out by reference.
pub struct Peer {
    pub(crate) id: PeerId,
    /// Monotonic creation stamp. Asynchronous continuations capture it
    /// at start and must find it unchanged before mutating the entry.
    pub(crate) generation: u64,
    pub(crate) phase: PeerPhase,
    pub(crate) link: Arc<dyn PeerLink>,
    pub(crate) sink: Arc<dyn AudioSink>,
}

impl Peer {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> PeerPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
