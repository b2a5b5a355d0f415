//! Room Coordination
//!
//! Reacts to roster events from the relay and drives the mesh: offers
//! to new arrivals, teardown on departures, targeted signal dispatch.
//! Higher layers observe the room through the event stream and steer it
//! through the handle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::VoiceConfig;
use crate::latency::LatencyTracker;
use crate::media::capture::{CaptureDevice, CaptureError};
use crate::media::link::{LinkState, PeerConnector};
use crate::media::playback::{AudioSinkFactory, PacketRouter};
use crate::media::webrtc::RtcConnector;
use crate::mesh::{MeshError, MeshEvent, VoiceMesh};
use crate::signaling::{
    BroadcastPayload, ClientEnvelope, PeerId, ServerEnvelope, SignalData, SignalError,
    SignalingClient,
};

/// Room-related errors.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error(transparent)]
    Signaling(#[from] SignalError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("room task closed")]
    Closed,
}

/// Commands sent to a running room.
#[derive(Debug)]
pub enum RoomCommand {
    SetMuted(bool),
    SetDeafened(bool),
    Leave,
}

/// Events emitted by a running room.
#[derive(Debug)]
pub enum RoomEvent {
    /// The relay acknowledged our join.
    Joined { room: String },
    PeerJoined { peer_id: PeerId },
    PeerLeft { peer_id: PeerId },
    /// Snapshot of the displayed roster after a change.
    RosterChanged { peers: Vec<PeerId> },
    /// Audio from this peer started flowing.
    TrackStarted { peer_id: PeerId },
    /// Fresh RTT measurement for a peer.
    LatencyUpdated { peer_id: PeerId, rtt_ms: u64 },
    /// A recovered mesh fault.
    MeshError {
        peer_id: Option<PeerId>,
        message: String,
    },
    /// An `error` envelope from the relay. User-visible.
    RelayError { message: String },
    /// The room was left and all media torn down.
    Left,
}

/// Handle to steer a running room.
#[derive(Clone)]
pub struct RoomHandle {
    command_tx: mpsc::UnboundedSender<RoomCommand>,
    pub local_peer_id: PeerId,
}

impl RoomHandle {
    pub fn set_muted(&self, muted: bool) -> Result<(), RoomError> {
        self.command_tx
            .send(RoomCommand::SetMuted(muted))
            .map_err(|_| RoomError::Closed)
    }

    pub fn set_deafened(&self, deafened: bool) -> Result<(), RoomError> {
        self.command_tx
            .send(RoomCommand::SetDeafened(deafened))
            .map_err(|_| RoomError::Closed)
    }

    pub fn leave(&self) -> Result<(), RoomError> {
        self.command_tx
            .send(RoomCommand::Leave)
            .map_err(|_| RoomError::Closed)
    }
}

/// Drives one voice room - runs in a background task.
pub struct RoomCoordinator {
    room: String,
    local_id: PeerId,
    mesh: Arc<VoiceMesh>,
    signaling: Arc<SignalingClient>,
    roster: HashSet<PeerId>,
    latency: LatencyTracker,
    events: mpsc::UnboundedSender<RoomEvent>,
}

impl RoomCoordinator {
    /// Join a voice room with the production media stack: WebRTC links
    /// and a packet router whose receiving end is returned for the
    /// playout layer.
    pub async fn join(
        config: &VoiceConfig,
        room: &str,
        peer_id: Option<PeerId>,
        capture: Arc<dyn CaptureDevice>,
    ) -> Result<
        (
            RoomHandle,
            mpsc::UnboundedReceiver<RoomEvent>,
            mpsc::UnboundedReceiver<(PeerId, webrtc::rtp::packet::Packet)>,
        ),
        RoomError,
    > {
        let connector = Arc::new(RtcConnector::new(config.effective_ice_servers()));
        let (router, packets) = PacketRouter::new();
        let (handle, events) =
            Self::join_with_capabilities(config, room, peer_id, capture, connector, router).await?;
        Ok((handle, events, packets))
    }

    /// Join a voice room with explicit media capabilities.
    ///
    /// Capture permission is resolved first, so a denial surfaces here
    /// instead of disappearing into the background task.
    pub async fn join_with_capabilities(
        config: &VoiceConfig,
        room: &str,
        peer_id: Option<PeerId>,
        capture: Arc<dyn CaptureDevice>,
        connector: Arc<dyn PeerConnector>,
        sinks: Arc<dyn AudioSinkFactory>,
    ) -> Result<(RoomHandle, mpsc::UnboundedReceiver<RoomEvent>), RoomError> {
        let local_id = peer_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let (mesh, mesh_rx) = VoiceMesh::new(capture, connector, sinks);
        mesh.local_stream().await?;

        let signaling = Arc::new(
            SignalingClient::connect(&config.relay_url, config.reconnect.clone()).await?,
        );
        let signal_rx = signaling.subscribe();
        signaling.send(ClientEnvelope::Join {
            room: room.to_string(),
            peer_id: local_id.clone(),
        })?;

        info!(room, peer = %local_id, "joining voice room");
        Ok(Self::start(
            room.to_string(),
            local_id,
            mesh,
            mesh_rx,
            signaling,
            signal_rx,
            config.ping_interval,
        ))
    }

    /// Spawn the coordination loop around an established signaling
    /// session.
    fn start(
        room: String,
        local_id: PeerId,
        mesh: Arc<VoiceMesh>,
        mesh_rx: mpsc::UnboundedReceiver<MeshEvent>,
        signaling: Arc<SignalingClient>,
        signal_rx: broadcast::Receiver<ServerEnvelope>,
        ping_interval: Duration,
    ) -> (RoomHandle, mpsc::UnboundedReceiver<RoomEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let coordinator = Self {
            room,
            local_id: local_id.clone(),
            mesh,
            signaling,
            roster: HashSet::new(),
            latency: LatencyTracker::new(),
            events: event_tx,
        };
        tokio::spawn(coordinator.run(signal_rx, mesh_rx, command_rx, ping_interval));

        (
            RoomHandle {
                command_tx,
                local_peer_id: local_id,
            },
            event_rx,
        )
    }

    async fn run(
        mut self,
        mut signal_rx: broadcast::Receiver<ServerEnvelope>,
        mut mesh_rx: mpsc::UnboundedReceiver<MeshEvent>,
        mut command_rx: mpsc::UnboundedReceiver<RoomCommand>,
        ping_interval: Duration,
    ) {
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + ping_interval,
            ping_interval,
        );
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                envelope = signal_rx.recv() => match envelope {
                    Ok(envelope) => self.handle_envelope(envelope).await,
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!(count, "relay envelopes dropped, subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(event) = mesh_rx.recv() => self.handle_mesh_event(event).await,
                Some(command) = command_rx.recv() => match command {
                    RoomCommand::SetMuted(muted) => self.mesh.set_muted(muted),
                    RoomCommand::SetDeafened(deafened) => self.mesh.set_deafened(deafened),
                    RoomCommand::Leave => {
                        self.shutdown().await;
                        break;
                    }
                },
                _ = ping.tick() => self.send_ping(),
            }
        }
        debug!(room = %self.room, "room coordinator ended");
    }

    async fn handle_envelope(&mut self, envelope: ServerEnvelope) {
        match envelope {
            ServerEnvelope::Joined { room } => {
                let _ = self.events.send(RoomEvent::Joined { room });
            }

            ServerEnvelope::PeerJoined { peer_id } => {
                if peer_id == self.local_id {
                    return;
                }
                info!(peer = %peer_id, "peer joined the room");
                self.roster.insert(peer_id.clone());
                let _ = self.events.send(RoomEvent::PeerJoined {
                    peer_id: peer_id.clone(),
                });
                self.emit_roster();
                self.spawn_offer(peer_id);
            }

            ServerEnvelope::PeerLeft { peer_id } => {
                info!(peer = %peer_id, "peer left the room");
                self.roster.remove(&peer_id);
                self.latency.forget_peer(&peer_id);
                let _ = self.events.send(RoomEvent::PeerLeft {
                    peer_id: peer_id.clone(),
                });
                self.emit_roster();
                let mesh = Arc::clone(&self.mesh);
                tokio::spawn(async move {
                    mesh.drop_peer(&peer_id).await;
                });
            }

            ServerEnvelope::Signal { from, to, data } => {
                // Not addressed to us: no state may change.
                if to != self.local_id {
                    return;
                }
                self.dispatch_signal(from, data);
            }

            ServerEnvelope::Broadcast { from, data } => self.handle_broadcast(from, data),

            ServerEnvelope::Error { message } => {
                warn!(%message, "relay reported an error");
                let _ = self.events.send(RoomEvent::RelayError { message });
            }
        }
    }

    /// Offer to a newly joined peer. Runs as its own task so a slow
    /// negotiation never blocks envelope handling; the generation guard
    /// inside the mesh keeps a racing teardown safe.
    fn spawn_offer(&self, peer_id: PeerId) {
        let mesh = Arc::clone(&self.mesh);
        let signaling = Arc::clone(&self.signaling);
        let room = self.room.clone();
        let local_id = self.local_id.clone();
        tokio::spawn(async move {
            match mesh.make_offer(&peer_id).await {
                Ok(offer) => {
                    let _ = signaling.send(ClientEnvelope::Signal {
                        room,
                        from: local_id,
                        to: peer_id,
                        data: SignalData::Offer { offer },
                    });
                }
                Err(MeshError::PeerGone(_)) => {
                    debug!(peer = %peer_id, "offer discarded, peer gone")
                }
                Err(e) => debug!(peer = %peer_id, "offer failed: {e}"),
            }
        });
    }

    fn dispatch_signal(&self, from: PeerId, data: SignalData) {
        let mesh = Arc::clone(&self.mesh);
        let signaling = Arc::clone(&self.signaling);
        let room = self.room.clone();
        let local_id = self.local_id.clone();
        tokio::spawn(async move {
            match data {
                SignalData::Offer { offer } => match mesh.handle_offer(&from, offer).await {
                    Ok(answer) => {
                        let _ = signaling.send(ClientEnvelope::Signal {
                            room,
                            from: local_id,
                            to: from,
                            data: SignalData::Answer { answer },
                        });
                    }
                    Err(MeshError::PeerGone(_)) => {
                        debug!(peer = %from, "answer discarded, peer gone")
                    }
                    Err(e) => debug!(peer = %from, "answering failed: {e}"),
                },
                SignalData::Answer { answer } => {
                    if let Err(e) = mesh.handle_answer(&from, answer).await {
                        debug!(peer = %from, "answer rejected: {e}");
                    }
                }
                SignalData::Candidate { candidate } => {
                    let _ = mesh.handle_ice(&from, candidate).await;
                }
            }
        });
    }

    async fn handle_mesh_event(&mut self, event: MeshEvent) {
        match event {
            MeshEvent::CandidateReady { peer_id, candidate } => {
                let result = self.signaling.send(ClientEnvelope::Signal {
                    room: self.room.clone(),
                    from: self.local_id.clone(),
                    to: peer_id,
                    data: SignalData::Candidate { candidate },
                });
                if result.is_err() {
                    debug!("candidate dropped, relay closed");
                }
            }
            MeshEvent::TrackStarted { peer_id } => {
                let _ = self.events.send(RoomEvent::TrackStarted { peer_id });
            }
            MeshEvent::LinkState { peer_id, state } => {
                self.handle_link_state(peer_id, state).await;
            }
            MeshEvent::PeerClosed { .. } => {}
            MeshEvent::Error { peer_id, message } => {
                let _ = self.events.send(RoomEvent::MeshError { peer_id, message });
            }
        }
    }

    /// Dead links are not left marked connected: tear down and, if the
    /// peer is still in the room, renegotiate from scratch.
    async fn handle_link_state(&mut self, peer_id: PeerId, state: LinkState) {
        match state {
            LinkState::Failed => {
                warn!(peer = %peer_id, "link failed");
                self.mesh.drop_peer(&peer_id).await;
                if self.roster.contains(&peer_id) {
                    info!(peer = %peer_id, "reoffering after link failure");
                    self.spawn_offer(peer_id);
                }
            }
            LinkState::Disconnected => debug!(peer = %peer_id, "link disconnected"),
            _ => {}
        }
    }

    fn handle_broadcast(&mut self, from: PeerId, data: serde_json::Value) {
        if from == self.local_id {
            return;
        }
        // Unparseable application payloads are ignored.
        let Ok(payload) = serde_json::from_value::<BroadcastPayload>(data) else {
            return;
        };
        match payload {
            BroadcastPayload::Ping { sent_at_ms } => {
                self.send_broadcast(BroadcastPayload::Pong {
                    ping_sent_at_ms: sent_at_ms,
                });
            }
            BroadcastPayload::Pong { ping_sent_at_ms } => {
                if let Some(rtt_ms) = self.latency.handle_pong(&from, ping_sent_at_ms) {
                    let _ = self.events.send(RoomEvent::LatencyUpdated {
                        peer_id: from,
                        rtt_ms,
                    });
                }
            }
        }
    }

    fn send_ping(&mut self) {
        if self.roster.is_empty() {
            return;
        }
        let sent_at_ms = self.latency.create_ping();
        self.send_broadcast(BroadcastPayload::Ping { sent_at_ms });
    }

    fn send_broadcast(&self, payload: BroadcastPayload) {
        let Ok(data) = serde_json::to_value(&payload) else {
            return;
        };
        let _ = self.signaling.send(ClientEnvelope::Broadcast {
            room: self.room.clone(),
            from: self.local_id.clone(),
            data,
        });
    }

    fn emit_roster(&self) {
        let mut peers: Vec<PeerId> = self.roster.iter().cloned().collect();
        peers.sort();
        let _ = self.events.send(RoomEvent::RosterChanged { peers });
    }

    async fn shutdown(&mut self) {
        self.mesh.leave().await;
        let _ = self.signaling.send(ClientEnvelope::Leave {
            room: self.room.clone(),
            peer_id: self.local_id.clone(),
        });
        self.signaling.close();
        self.roster.clear();
        self.latency.clear();
        let _ = self.events.send(RoomEvent::Left);
        info!(room = %self.room, "left voice room");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::mock::{TestCapture, TestConnector, TestSinks};
    use crate::signaling::{SdpKind, SessionDescription};
    use std::time::Duration;
    use tokio::time::timeout;

    struct Rig {
        handle: RoomHandle,
        events: mpsc::UnboundedReceiver<RoomEvent>,
        outbound: mpsc::UnboundedReceiver<ClientEnvelope>,
        inbound: broadcast::Sender<ServerEnvelope>,
        mesh: Arc<VoiceMesh>,
        connector: Arc<TestConnector>,
    }

    fn rig_with_ping(ping_interval: Duration) -> Rig {
        let capture = TestCapture::new();
        let connector = TestConnector::new();
        let sinks = TestSinks::new();
        let (mesh, mesh_rx) = VoiceMesh::new(
            capture as _,
            Arc::clone(&connector) as _,
            sinks as _,
        );
        let (client, outbound, inbound) = SignalingClient::loopback();
        let signaling = Arc::new(client);
        let signal_rx = signaling.subscribe();
        let (handle, events) = RoomCoordinator::start(
            "ops".to_string(),
            "me".to_string(),
            Arc::clone(&mesh),
            mesh_rx,
            signaling,
            signal_rx,
            ping_interval,
        );
        Rig {
            handle,
            events,
            outbound,
            inbound,
            mesh,
            connector,
        }
    }

    fn rig() -> Rig {
        rig_with_ping(Duration::from_secs(60))
    }

    async fn next_outbound(rx: &mut mpsc::UnboundedReceiver<ClientEnvelope>) -> ClientEnvelope {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for outbound envelope")
            .expect("outbound channel closed")
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<RoomEvent>) -> RoomEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for room event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_offers_every_new_peer_regardless_of_completion_order() {
        let mut r = rig();
        let gate = r.connector.gate_offers();

        r.inbound
            .send(ServerEnvelope::PeerJoined {
                peer_id: "p1".to_string(),
            })
            .unwrap();
        r.inbound
            .send(ServerEnvelope::PeerJoined {
                peer_id: "p2".to_string(),
            })
            .unwrap();

        // Both negotiations are pending behind the gate. Release one
        // permit at a time until both offers have gone out, whatever
        // order they complete in.
        assert!(matches!(next_event(&mut r.events).await, RoomEvent::PeerJoined { .. }));
        let mut offered_to = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while offered_to.len() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "offers never completed");
            gate.notify_one();
            match timeout(Duration::from_millis(50), r.outbound.recv()).await {
                Ok(Some(ClientEnvelope::Signal {
                    room,
                    from,
                    to,
                    data: SignalData::Offer { .. },
                })) => {
                    assert_eq!(room, "ops");
                    assert_eq!(from, "me");
                    offered_to.push(to);
                }
                Ok(Some(other)) => panic!("unexpected envelope: {other:?}"),
                Ok(None) => panic!("outbound channel closed"),
                Err(_) => {}
            }
        }
        offered_to.sort();
        assert_eq!(offered_to, ["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_answers_offers_addressed_to_us() {
        let mut r = rig();
        r.inbound
            .send(ServerEnvelope::Signal {
                from: "p1".to_string(),
                to: "me".to_string(),
                data: SignalData::Offer {
                    offer: SessionDescription {
                        kind: SdpKind::Offer,
                        sdp: "v=0 p1".to_string(),
                    },
                },
            })
            .unwrap();

        match next_outbound(&mut r.outbound).await {
            ClientEnvelope::Signal {
                to,
                data: SignalData::Answer { answer },
                ..
            } => {
                assert_eq!(to, "p1");
                assert_eq!(answer.kind, SdpKind::Answer);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert_eq!(r.mesh.peer_ids(), ["p1"]);
    }

    #[tokio::test]
    async fn test_signals_for_other_recipients_change_nothing() {
        let mut r = rig();
        r.inbound
            .send(ServerEnvelope::Signal {
                from: "p1".to_string(),
                to: "someone-else".to_string(),
                data: SignalData::Offer {
                    offer: SessionDescription {
                        kind: SdpKind::Offer,
                        sdp: "v=0".to_string(),
                    },
                },
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(r.mesh.peer_ids().is_empty());
        assert_eq!(r.connector.link_count(), 0);
        assert!(r.outbound.try_recv().is_err());
        assert!(r.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_peer_left_updates_roster_and_tears_down() {
        let mut r = rig();
        r.inbound
            .send(ServerEnvelope::PeerJoined {
                peer_id: "p1".to_string(),
            })
            .unwrap();
        // Wait for the offer so the peer entry exists.
        let _ = next_outbound(&mut r.outbound).await;

        r.inbound
            .send(ServerEnvelope::PeerLeft {
                peer_id: "p1".to_string(),
            })
            .unwrap();

        let mut saw_left = false;
        let mut saw_empty_roster = false;
        for _ in 0..4 {
            match next_event(&mut r.events).await {
                RoomEvent::PeerLeft { peer_id } => {
                    assert_eq!(peer_id, "p1");
                    saw_left = true;
                }
                RoomEvent::RosterChanged { peers } if peers.is_empty() => {
                    saw_empty_roster = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_left && saw_empty_roster);

        // The mesh entry goes away shortly after.
        for _ in 0..50 {
            if r.mesh.peer_ids().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(r.mesh.peer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_relay_errors_become_events() {
        let mut r = rig();
        r.inbound
            .send(ServerEnvelope::Error {
                message: "room full".to_string(),
            })
            .unwrap();
        assert!(matches!(
            next_event(&mut r.events).await,
            RoomEvent::RelayError { message } if message == "room full"
        ));
    }

    #[tokio::test]
    async fn test_leave_command_announces_and_clears() {
        let mut r = rig();
        r.inbound
            .send(ServerEnvelope::PeerJoined {
                peer_id: "p1".to_string(),
            })
            .unwrap();
        let _ = next_outbound(&mut r.outbound).await;

        r.handle.leave().unwrap();

        loop {
            match next_outbound(&mut r.outbound).await {
                ClientEnvelope::Leave { room, peer_id } => {
                    assert_eq!(room, "ops");
                    assert_eq!(peer_id, "me");
                    break;
                }
                // Candidates or broadcasts queued earlier may precede it.
                _ => continue,
            }
        }
        loop {
            if matches!(next_event(&mut r.events).await, RoomEvent::Left) {
                break;
            }
        }
        assert!(r.mesh.peer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_ping_pong_produces_latency_events() {
        let mut r = rig_with_ping(Duration::from_millis(50));
        r.inbound
            .send(ServerEnvelope::PeerJoined {
                peer_id: "p1".to_string(),
            })
            .unwrap();
        let _ = next_outbound(&mut r.outbound).await; // the offer

        // The coordinator pings on its interval once the roster is
        // non-empty.
        let sent_at_ms = loop {
            match next_outbound(&mut r.outbound).await {
                ClientEnvelope::Broadcast { data, .. } => {
                    let payload: BroadcastPayload = serde_json::from_value(data).unwrap();
                    match payload {
                        BroadcastPayload::Ping { sent_at_ms } => break sent_at_ms,
                        BroadcastPayload::Pong { .. } => continue,
                    }
                }
                _ => continue,
            }
        };

        r.inbound
            .send(ServerEnvelope::Broadcast {
                from: "p1".to_string(),
                data: serde_json::to_value(BroadcastPayload::Pong {
                    ping_sent_at_ms: sent_at_ms,
                })
                .unwrap(),
            })
            .unwrap();

        loop {
            if let RoomEvent::LatencyUpdated { peer_id, .. } = next_event(&mut r.events).await {
                assert_eq!(peer_id, "p1");
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_answers_ping_broadcasts_from_peers() {
        let mut r = rig();
        r.inbound
            .send(ServerEnvelope::Broadcast {
                from: "p1".to_string(),
                data: serde_json::to_value(BroadcastPayload::Ping { sent_at_ms: 123 }).unwrap(),
            })
            .unwrap();

        match next_outbound(&mut r.outbound).await {
            ClientEnvelope::Broadcast { from, data, .. } => {
                assert_eq!(from, "me");
                let payload: BroadcastPayload = serde_json::from_value(data).unwrap();
                assert!(matches!(
                    payload,
                    BroadcastPayload::Pong { ping_sent_at_ms: 123 }
                ));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_link_triggers_reoffer() {
        let mut r = rig();
        r.inbound
            .send(ServerEnvelope::PeerJoined {
                peer_id: "p1".to_string(),
            })
            .unwrap();
        let _ = next_outbound(&mut r.outbound).await;

        // The link reports failure; the peer is still in the roster.
        let (_, hooks) = r.connector.link(0);
        (hooks.on_state)(LinkState::Failed);

        // A fresh offer goes out for the same peer.
        match next_outbound(&mut r.outbound).await {
            ClientEnvelope::Signal {
                to,
                data: SignalData::Offer { .. },
                ..
            } => assert_eq!(to, "p1"),
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert_eq!(r.connector.link_count(), 2);
    }
}
