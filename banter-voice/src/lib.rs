//! Banter Voice - Core Library
//!
//! This library provides the voice mesh for Banter voice rooms: direct
//! audio links between every pair of participants, negotiated through a
//! thin signaling relay that never touches media.

pub mod config;
pub mod latency;
pub mod media;
pub mod mesh;
pub mod room;
pub mod signaling;

// Re-exports for convenience
pub use config::VoiceConfig;
pub use mesh::{MeshError, MeshEvent, VoiceMesh};
pub use room::{RoomCoordinator, RoomEvent, RoomHandle};
pub use signaling::{ClientEnvelope, ServerEnvelope, SignalingClient};
