//! Voice Mesh
//!
//! Owns the local capture stream and the table of peer connections and
//! drives per-peer negotiation. The table is mutated only through mesh
//! methods. Asynchronous steps capture the peer's generation before
//! suspending and re-validate it when they resume, so teardown racing
//! an in-flight negotiation can never resurrect a closed peer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::media::capture::{CaptureDevice, CaptureError, LocalStream};
use crate::media::link::{LinkError, LinkHooks, PeerConnector, PeerLink, RemoteAudio};
use crate::media::playback::AudioSinkFactory;
use crate::mesh::event::MeshEvent;
use crate::mesh::peer::{Peer, PeerPhase};
use crate::signaling::{IceCandidate, PeerId, SessionDescription};

/// Mesh-related errors.
#[derive(Debug, Error)]
pub enum MeshError {
    /// A second connection entry for an id already present. Rejected
    /// rather than silently leaking the live one.
    #[error("peer {0} already exists")]
    PeerExists(PeerId),

    /// The peer was torn down while a negotiation step was in flight;
    /// the step's result has been discarded.
    #[error("peer {0} is gone")]
    PeerGone(PeerId),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

struct MeshState {
    peers: HashMap<PeerId, Peer>,
    local: Option<LocalStream>,
    next_generation: u64,
    is_muted: bool,
    is_deafened: bool,
}

/// The local end of a voice room's media plane.
pub struct VoiceMesh {
    state: Arc<Mutex<MeshState>>,
    /// Serializes first acquisition so there is a single permission prompt.
    acquire_lock: tokio::sync::Mutex<()>,
    capture: Arc<dyn CaptureDevice>,
    connector: Arc<dyn PeerConnector>,
    sinks: Arc<dyn AudioSinkFactory>,
    events: mpsc::UnboundedSender<MeshEvent>,
}

impl VoiceMesh {
    /// Create a mesh and the receiving end of its event stream.
    pub fn new(
        capture: Arc<dyn CaptureDevice>,
        connector: Arc<dyn PeerConnector>,
        sinks: Arc<dyn AudioSinkFactory>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MeshEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let mesh = Arc::new(Self {
            state: Arc::new(Mutex::new(MeshState {
                peers: HashMap::new(),
                local: None,
                next_generation: 0,
                is_muted: false,
                is_deafened: false,
            })),
            acquire_lock: tokio::sync::Mutex::new(()),
            capture,
            connector,
            sinks,
            events,
        });
        (mesh, event_rx)
    }

    /// Acquire the local capture stream, prompting at most once per
    /// session; later calls return the cached stream.
    pub async fn local_stream(&self) -> Result<LocalStream, CaptureError> {
        if let Some(stream) = self.state.lock().local.clone() {
            return Ok(stream);
        }
        let _guard = self.acquire_lock.lock().await;
        // A concurrent caller may have finished the acquisition while we
        // waited on the lock.
        if let Some(stream) = self.state.lock().local.clone() {
            return Ok(stream);
        }
        let stream = self.capture.acquire().await?;
        let mut state = self.state.lock();
        stream.set_enabled_all(!state.is_muted);
        state.local = Some(stream.clone());
        Ok(stream)
    }

    /// Create the connection entry for `remote` and produce the offer
    /// to send it. Fails if an entry already exists.
    pub async fn make_offer(&self, remote: &PeerId) -> Result<SessionDescription, MeshError> {
        let (link, generation) = self.create_peer(remote, PeerPhase::Offering).await?;
        let offer = link
            .create_offer()
            .await
            .map_err(|e| self.fail(remote, "create offer", e))?;
        link.set_local_description(offer.clone())
            .await
            .map_err(|e| self.fail(remote, "commit local offer", e))?;
        self.commit_if_current(remote, generation, PeerPhase::Offering)?;
        debug!(peer = %remote, "offer ready");
        Ok(offer)
    }

    /// Answer a remote offer, creating the peer entry if this is the
    /// first signaling contact from that id.
    pub async fn handle_offer(
        &self,
        remote: &PeerId,
        offer: SessionDescription,
    ) -> Result<SessionDescription, MeshError> {
        let (link, generation) = match self.existing_link(remote) {
            Some(existing) => existing,
            None => self.create_peer(remote, PeerPhase::Answering).await?,
        };
        link.set_remote_description(offer)
            .await
            .map_err(|e| self.fail(remote, "commit remote offer", e))?;
        let answer = link
            .create_answer()
            .await
            .map_err(|e| self.fail(remote, "create answer", e))?;
        link.set_local_description(answer.clone())
            .await
            .map_err(|e| self.fail(remote, "commit local answer", e))?;
        self.commit_if_current(remote, generation, PeerPhase::Connected)?;
        debug!(peer = %remote, "answer ready");
        Ok(answer)
    }

    /// Commit the remote answer on an existing peer. Unknown ids are
    /// tolerated: signaling may still be in flight for a peer already
    /// torn down.
    pub async fn handle_answer(
        &self,
        remote: &PeerId,
        answer: SessionDescription,
    ) -> Result<(), MeshError> {
        let Some((link, generation)) = self.existing_link(remote) else {
            debug!(peer = %remote, "answer for unknown peer ignored");
            return Ok(());
        };
        link.set_remote_description(answer)
            .await
            .map_err(|e| self.fail(remote, "commit remote answer", e))?;
        match self.commit_if_current(remote, generation, PeerPhase::Connected) {
            // Torn down mid-commit: nothing to resurrect.
            Err(MeshError::PeerGone(_)) => Ok(()),
            other => other,
        }
    }

    /// Add a trickled remote candidate. Unknown ids are a no-op;
    /// add failures are reported on the event stream and discarded.
    pub async fn handle_ice(&self, remote: &PeerId, candidate: IceCandidate) -> Result<(), MeshError> {
        let Some((link, _generation)) = self.existing_link(remote) else {
            debug!(peer = %remote, "candidate for unknown peer ignored");
            return Ok(());
        };
        if let Err(e) = link.add_ice_candidate(candidate).await {
            let _ = self.fail(remote, "add candidate", e);
        }
        Ok(())
    }

    /// Toggle outgoing audio for every current and future peer. Local
    /// only: nothing is advertised over signaling.
    pub fn set_muted(&self, muted: bool) {
        let mut state = self.state.lock();
        state.is_muted = muted;
        if let Some(stream) = &state.local {
            stream.set_enabled_all(!muted);
        }
    }

    /// Mute local playback of every peer. Inbound tracks keep flowing.
    pub fn set_deafened(&self, deafened: bool) {
        let mut state = self.state.lock();
        state.is_deafened = deafened;
        for peer in state.peers.values() {
            peer.sink.set_muted(deafened);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.state.lock().is_muted
    }

    pub fn is_deafened(&self) -> bool {
        self.state.lock().is_deafened
    }

    /// Ids of every live peer entry.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.state.lock().peers.keys().cloned().collect()
    }

    pub fn peer_phase(&self, remote: &PeerId) -> Option<PeerPhase> {
        self.state.lock().peers.get(remote).map(|p| p.phase)
    }

    /// Tear down one peer entry (peer left, link failed).
    pub async fn drop_peer(&self, remote: &PeerId) {
        let peer = self.state.lock().peers.remove(remote);
        if let Some(peer) = peer {
            peer.sink.detach();
            peer.link.close().await;
            let _ = self.events.send(MeshEvent::PeerClosed { peer_id: peer.id });
            debug!(peer = %remote, "peer torn down");
        }
    }

    /// Close every peer, stop capture, clear all owned state. Safe to
    /// call any number of times; a second call finds nothing to do.
    pub async fn leave(&self) {
        let (peers, stream) = {
            let mut state = self.state.lock();
            let peers: Vec<Peer> = state.peers.drain().map(|(_, peer)| peer).collect();
            state.is_muted = false;
            state.is_deafened = false;
            (peers, state.local.take())
        };
        for peer in peers {
            peer.sink.detach();
            peer.link.close().await;
            let _ = self.events.send(MeshEvent::PeerClosed { peer_id: peer.id });
        }
        if let Some(stream) = stream {
            stream.stop();
            info!("local capture released");
        }
    }

    /// Allocate the entry for `remote`: open a link, attach every local
    /// track, wire the callbacks, insert into the table.
    async fn create_peer(
        &self,
        remote: &PeerId,
        phase: PeerPhase,
    ) -> Result<(Arc<dyn PeerLink>, u64), MeshError> {
        // Refuse duplicates up front; re-checked at insert because link
        // setup suspends.
        let generation = {
            let mut state = self.state.lock();
            if state.peers.contains_key(remote) {
                return Err(MeshError::PeerExists(remote.clone()));
            }
            state.next_generation += 1;
            state.next_generation
        };

        let stream = self.local_stream().await?;
        let hooks = self.link_hooks(remote.clone(), generation);
        let link = self.connector.open(hooks).await?;
        for track in stream.tracks() {
            if let Err(e) = link.attach_track(track).await {
                link.close().await;
                return Err(self.fail(remote, "attach track", e));
            }
        }

        let sink = self.sinks.create(remote);
        let lost_race = {
            let mut state = self.state.lock();
            if state.peers.contains_key(remote) {
                true
            } else {
                sink.set_muted(state.is_deafened);
                state.peers.insert(
                    remote.clone(),
                    Peer {
                        id: remote.clone(),
                        generation,
                        phase,
                        link: Arc::clone(&link),
                        sink,
                    },
                );
                false
            }
        };
        if lost_race {
            link.close().await;
            return Err(MeshError::PeerExists(remote.clone()));
        }
        debug!(peer = %remote, generation, "peer created");
        Ok((link, generation))
    }

    /// Callbacks for one link. Each captures the generation it was
    /// created under and goes quiet once the entry is gone or replaced.
    fn link_hooks(&self, peer_id: PeerId, generation: u64) -> LinkHooks {
        let on_candidate = {
            let state = Arc::clone(&self.state);
            let events = self.events.clone();
            let peer_id = peer_id.clone();
            Box::new(move |candidate: IceCandidate| {
                if !is_current(&state, &peer_id, generation) {
                    debug!(peer = %peer_id, "stale candidate dropped");
                    return;
                }
                let _ = events.send(MeshEvent::CandidateReady {
                    peer_id: peer_id.clone(),
                    candidate,
                });
            }) as Box<dyn Fn(IceCandidate) + Send + Sync>
        };

        let on_track = {
            let state = Arc::clone(&self.state);
            let events = self.events.clone();
            let peer_id = peer_id.clone();
            Box::new(move |audio: RemoteAudio| {
                let sink = {
                    let state = state.lock();
                    state
                        .peers
                        .get(&peer_id)
                        .filter(|peer| peer.generation == generation)
                        .map(|peer| Arc::clone(&peer.sink))
                };
                match sink {
                    Some(sink) => {
                        sink.play(audio);
                        let _ = events.send(MeshEvent::TrackStarted {
                            peer_id: peer_id.clone(),
                        });
                    }
                    None => debug!(peer = %peer_id, "track for closed peer dropped"),
                }
            }) as Box<dyn Fn(RemoteAudio) + Send + Sync>
        };

        let on_state = {
            let state = Arc::clone(&self.state);
            let events = self.events.clone();
            Box::new(move |link_state| {
                if !is_current(&state, &peer_id, generation) {
                    return;
                }
                let _ = events.send(MeshEvent::LinkState {
                    peer_id: peer_id.clone(),
                    state: link_state,
                });
            }) as Box<dyn Fn(crate::media::link::LinkState) + Send + Sync>
        };

        LinkHooks {
            on_candidate,
            on_track,
            on_state,
        }
    }

    fn existing_link(&self, remote: &PeerId) -> Option<(Arc<dyn PeerLink>, u64)> {
        let state = self.state.lock();
        state
            .peers
            .get(remote)
            .map(|peer| (Arc::clone(&peer.link), peer.generation))
    }

    /// Re-validate after a suspension point: the entry must still exist
    /// with the generation captured at the start of the operation.
    fn commit_if_current(
        &self,
        remote: &PeerId,
        generation: u64,
        phase: PeerPhase,
    ) -> Result<(), MeshError> {
        let mut state = self.state.lock();
        match state.peers.get_mut(remote) {
            Some(peer) if peer.generation == generation => {
                peer.phase = phase;
                Ok(())
            }
            _ => Err(MeshError::PeerGone(remote.clone())),
        }
    }

    /// Report a link fault on the event stream and convert it.
    fn fail(&self, remote: &PeerId, what: &str, error: LinkError) -> MeshError {
        let _ = self.events.send(MeshEvent::Error {
            peer_id: Some(remote.clone()),
            message: format!("{what}: {error}"),
        });
        error.into()
    }
}

fn is_current(state: &Mutex<MeshState>, peer_id: &PeerId, generation: u64) -> bool {
    state
        .lock()
        .peers
        .get(peer_id)
        .map(|peer| peer.generation == generation)
        .unwrap_or(false)
}
