//! Voice Mesh
//!
//! Direct audio links to every other participant, negotiated over
//! signaling and owned by one aggregate.

mod event;
mod peer;
mod voice_mesh;

pub use event::MeshEvent;
pub use peer::{Peer, PeerPhase};
pub use voice_mesh::{MeshError, VoiceMesh};
