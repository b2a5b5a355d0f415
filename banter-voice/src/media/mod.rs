//! Media Capabilities
//!
//! Seams for capture, peer links and playback. WebRTC supplies the
//! production links; the host application supplies capture input and
//! consumes routed playback packets.

pub mod capture;
pub mod link;
pub mod playback;
pub mod webrtc;

#[cfg(test)]
pub(crate) mod mock;

pub use capture::{CaptureDevice, CaptureError, LocalStream, LocalTrack, PushCapture};
pub use link::{LinkError, LinkHooks, LinkState, PeerConnector, PeerLink, RemoteAudio};
pub use playback::{AudioSink, AudioSinkFactory, PacketRouter};
pub use self::webrtc::RtcConnector;
