//! In-memory media capabilities for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::media::capture::{CaptureDevice, CaptureError, LocalStream, LocalTrack};
use crate::media::link::{LinkError, LinkHooks, PeerConnector, PeerLink, RemoteAudio};
use crate::media::playback::{AudioSink, AudioSinkFactory};
use crate::signaling::{IceCandidate, PeerId, SdpKind, SessionDescription};

/// Capture device that counts acquisitions and can deny permission.
pub(crate) struct TestCapture {
    pub(crate) denied: bool,
    pub(crate) acquisitions: AtomicUsize,
}

impl TestCapture {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            denied: false,
            acquisitions: AtomicUsize::new(0),
        })
    }

    pub(crate) fn denying() -> Arc<Self> {
        Arc::new(Self {
            denied: true,
            acquisitions: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CaptureDevice for TestCapture {
    async fn acquire(&self) -> Result<LocalStream, CaptureError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.denied {
            return Err(CaptureError::PermissionDenied);
        }
        Ok(LocalStream::new(vec![Arc::new(LocalTrack::new("mic"))]))
    }
}

/// Everything a test link records.
#[derive(Default)]
pub(crate) struct LinkLog {
    pub(crate) local_description: Mutex<Option<SessionDescription>>,
    pub(crate) remote_description: Mutex<Option<SessionDescription>>,
    pub(crate) candidates: Mutex<Vec<IceCandidate>>,
    pub(crate) attached_tracks: Mutex<Vec<String>>,
    pub(crate) closed: AtomicBool,
}

pub(crate) struct TestLink {
    name: String,
    log: Arc<LinkLog>,
    /// When set, `create_offer` waits for one notification first.
    offer_gate: Option<Arc<Notify>>,
}

#[async_trait]
impl PeerLink for TestLink {
    async fn attach_track(&self, track: &LocalTrack) -> Result<(), LinkError> {
        self.log.attached_tracks.lock().push(track.id().to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, LinkError> {
        if let Some(gate) = &self.offer_gate {
            gate.notified().await;
        }
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: format!("offer-from-{}", self.name),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, LinkError> {
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: format!("answer-from-{}", self.name),
        })
    }

    // Description commits succeed even on a closed link so tests reach
    // the mesh's own generation guard instead of tripping over the
    // transport first.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), LinkError> {
        *self.log.local_description.lock() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), LinkError> {
        *self.log.remote_description.lock() = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), LinkError> {
        if self.log.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        self.log.candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.log.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out [`TestLink`]s and keeping their logs and hooks
/// so tests can inspect state and fire link callbacks.
#[derive(Default)]
pub(crate) struct TestConnector {
    pub(crate) links: Mutex<Vec<(Arc<LinkLog>, Arc<LinkHooks>)>>,
    pub(crate) offer_gate: Mutex<Option<Arc<Notify>>>,
    counter: AtomicUsize,
}

impl TestConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent `create_offer` wait on the returned gate.
    pub(crate) fn gate_offers(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.offer_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) fn link(&self, index: usize) -> (Arc<LinkLog>, Arc<LinkHooks>) {
        let links = self.links.lock();
        let (log, hooks) = &links[index];
        (Arc::clone(log), Arc::clone(hooks))
    }

    pub(crate) fn link_count(&self) -> usize {
        self.links.lock().len()
    }
}

#[async_trait]
impl PeerConnector for TestConnector {
    async fn open(&self, hooks: LinkHooks) -> Result<Arc<dyn PeerLink>, LinkError> {
        let log = Arc::new(LinkLog::default());
        let index = self.counter.fetch_add(1, Ordering::SeqCst);
        let link = TestLink {
            name: format!("link{index}"),
            log: Arc::clone(&log),
            offer_gate: self.offer_gate.lock().clone(),
        };
        self.links.lock().push((log, Arc::new(hooks)));
        Ok(Arc::new(link))
    }
}

/// Sink recording play/mute/detach calls.
pub(crate) struct TestSink {
    pub(crate) muted: AtomicBool,
    pub(crate) detached: AtomicBool,
    pub(crate) plays: AtomicUsize,
}

impl AudioSink for TestSink {
    fn play(&self, _audio: RemoteAudio) {
        self.plays.fetch_add(1, Ordering::SeqCst);
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct TestSinks {
    pub(crate) created: Mutex<Vec<(PeerId, Arc<TestSink>)>>,
}

impl TestSinks {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn sink_for(&self, peer_id: &str) -> Option<Arc<TestSink>> {
        self.created
            .lock()
            .iter()
            .find(|(id, _)| id == peer_id)
            .map(|(_, sink)| Arc::clone(sink))
    }
}

impl AudioSinkFactory for TestSinks {
    fn create(&self, peer_id: &PeerId) -> Arc<dyn AudioSink> {
        let sink = Arc::new(TestSink {
            muted: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            plays: AtomicUsize::new(0),
        });
        self.created.lock().push((peer_id.clone(), Arc::clone(&sink)));
        sink
    }
}
