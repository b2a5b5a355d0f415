//! Local Audio Capture
//!
//! Capture devices live behind a seam: the mesh needs one `acquire`
//! that may prompt for microphone permission. The resulting stream owns
//! the outgoing tracks shared by every peer connection; track `enabled`
//! flags gate sample writes, which is how mute silences the mesh
//! without touching negotiations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Capture-related errors.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The user denied microphone access. This is the one failure that
    /// must reach the caller of the join flow.
    #[error("capture permission denied")]
    PermissionDenied,

    #[error("no capture device available: {0}")]
    DeviceUnavailable(String),

    #[error("capture failed: {0}")]
    Failed(String),
}

/// One outgoing audio track.
pub struct LocalTrack {
    id: String,
    enabled: AtomicBool,
    rtc: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    /// Create an opus track with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            id.clone(),
            "banter-voice".to_owned(),
        ));
        Self {
            id,
            enabled: AtomicBool::new(true),
            rtc,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// The sendable track attached to each peer connection.
    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtc)
    }

    /// Write one encoded sample. Disabled tracks swallow writes, so a
    /// muted mesh sends nothing while negotiations stay untouched.
    pub async fn write_sample(&self, sample: &Sample) -> Result<(), CaptureError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.rtc
            .write_sample(sample)
            .await
            .map_err(|e| CaptureError::Failed(e.to_string()))
    }
}

/// The local microphone stream, shared read-only across every peer.
#[derive(Clone)]
pub struct LocalStream {
    tracks: Vec<Arc<LocalTrack>>,
    stopped: Arc<AtomicBool>,
}

impl LocalStream {
    pub fn new(tracks: Vec<Arc<LocalTrack>>) -> Self {
        Self {
            tracks,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    /// Enable or disable every track at once.
    pub fn set_enabled_all(&self, enabled: bool) {
        for track in &self.tracks {
            track.set_enabled(enabled);
        }
    }

    /// Stop capture: disable every track and mark the stream released.
    pub fn stop(&self) {
        self.set_enabled_all(false);
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Media-capture capability. Implementations may prompt the user for
/// permission on acquisition; the mesh guarantees a single call per
/// session.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn acquire(&self) -> Result<LocalStream, CaptureError>;
}

/// Capture device fed by the host application's audio pipeline.
///
/// `acquire` creates the opus track; encoded samples pushed through
/// [`PushCapture::push`] go nowhere until then, and while the track is
/// disabled.
#[derive(Default)]
pub struct PushCapture {
    track: parking_lot::Mutex<Option<Arc<LocalTrack>>>,
}

impl PushCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one encoded sample into the outgoing track.
    pub async fn push(&self, sample: Sample) -> Result<(), CaptureError> {
        let track = self.track.lock().clone();
        match track {
            Some(track) => track.write_sample(&sample).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CaptureDevice for PushCapture {
    async fn acquire(&self) -> Result<LocalStream, CaptureError> {
        let track = Arc::clone(
            self.track
                .lock()
                .get_or_insert_with(|| Arc::new(LocalTrack::new("microphone"))),
        );
        Ok(LocalStream::new(vec![track]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_toggles_every_track() {
        let stream = LocalStream::new(vec![
            Arc::new(LocalTrack::new("a")),
            Arc::new(LocalTrack::new("b")),
        ]);
        assert!(stream.tracks().iter().all(|t| t.is_enabled()));

        stream.set_enabled_all(false);
        assert!(stream.tracks().iter().all(|t| !t.is_enabled()));

        stream.set_enabled_all(true);
        assert!(stream.tracks().iter().all(|t| t.is_enabled()));
    }

    #[test]
    fn test_stop_disables_and_marks_released() {
        let stream = LocalStream::new(vec![Arc::new(LocalTrack::new("a"))]);
        stream.stop();
        assert!(stream.is_stopped());
        assert!(!stream.tracks()[0].is_enabled());
    }

    #[tokio::test]
    async fn test_push_capture_reuses_its_track() {
        let capture = PushCapture::new();
        let first = capture.acquire().await.unwrap();
        let second = capture.acquire().await.unwrap();
        assert_eq!(first.tracks()[0].id(), second.tracks()[0].id());
        assert!(Arc::ptr_eq(&first.tracks()[0], &second.tracks()[0]));
    }
}
