//! Remote Audio Playback Targets
//!
//! Every peer entry owns one sink. Deafening mutes the sink without
//! stopping the inbound track: packets keep arriving and are dropped on
//! the floor, so undeafening resumes instantly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::rtp::packet::Packet;

use crate::media::link::RemoteAudio;
use crate::signaling::PeerId;

/// A playback target for one peer's audio.
pub trait AudioSink: Send + Sync {
    /// Start rendering a remote track.
    fn play(&self, audio: RemoteAudio);

    /// Muted sinks keep draining but render nothing.
    fn set_muted(&self, muted: bool);

    /// Stop rendering and drop buffered audio.
    fn detach(&self);
}

/// Creates the sink for each new peer.
pub trait AudioSinkFactory: Send + Sync {
    fn create(&self, peer_id: &PeerId) -> Arc<dyn AudioSink>;
}

/// Routes received packets to the host application's playout layer,
/// tagged with the peer they came from.
pub struct PacketRouter {
    out: mpsc::UnboundedSender<(PeerId, Packet)>,
}

impl PacketRouter {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(PeerId, Packet)>) {
        let (out, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { out }), rx)
    }
}

impl AudioSinkFactory for PacketRouter {
    fn create(&self, peer_id: &PeerId) -> Arc<dyn AudioSink> {
        Arc::new(RouterSink {
            peer_id: peer_id.clone(),
            out: self.out.clone(),
            muted: Arc::new(AtomicBool::new(false)),
            detached: Arc::new(AtomicBool::new(false)),
            pumps: Mutex::new(Vec::new()),
        })
    }
}

/// Sink forwarding packets over the router channel.
struct RouterSink {
    peer_id: PeerId,
    out: mpsc::UnboundedSender<(PeerId, Packet)>,
    muted: Arc<AtomicBool>,
    detached: Arc<AtomicBool>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl AudioSink for RouterSink {
    fn play(&self, mut audio: RemoteAudio) {
        let out = self.out.clone();
        let peer_id = self.peer_id.clone();
        let muted = Arc::clone(&self.muted);
        let detached = Arc::clone(&self.detached);

        let pump = tokio::spawn(async move {
            while let Some(packet) = audio.packets.recv().await {
                if detached.load(Ordering::SeqCst) {
                    break;
                }
                if muted.load(Ordering::SeqCst) {
                    continue;
                }
                if out.send((peer_id.clone(), packet)).is_err() {
                    break;
                }
            }
        });
        self.pumps.lock().push(pump);
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
    }
}
