//! Room Registry and Envelope Routing
//!
//! One WebSocket connection per peer, one join per connection. The
//! relay looks only at envelope headers; `signal` and `broadcast`
//! payloads are forwarded untouched.

use std::collections::HashMap;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use banter_voice::signaling::{ClientEnvelope, ServerEnvelope};

use crate::metrics::Metrics;

/// Outbound queue of one connected peer.
type PeerSender = mpsc::UnboundedSender<ServerEnvelope>;

pub type SharedMetrics = Arc<RwLock<Metrics>>;
type SharedRooms = Arc<RwLock<Rooms>>;

/// All rooms, keyed by name; each room maps peer id to its queue.
#[derive(Default)]
struct Rooms {
    rooms: HashMap<String, HashMap<String, PeerSender>>,
}

impl Rooms {
    /// Add a peer. Fails if the id is already taken in that room.
    fn join(&mut self, room: &str, peer_id: &str, sender: PeerSender) -> bool {
        let members = self.rooms.entry(room.to_string()).or_default();
        if members.contains_key(peer_id) {
            return false;
        }
        members.insert(peer_id.to_string(), sender);
        true
    }

    /// Remove a peer; empty rooms are dropped.
    fn leave(&mut self, room: &str, peer_id: &str) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(peer_id).is_some();
        if members.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }

    /// Forward to a single member. Unknown targets are dropped.
    fn send_to(&self, room: &str, peer_id: &str, envelope: ServerEnvelope) {
        if let Some(sender) = self.rooms.get(room).and_then(|members| members.get(peer_id)) {
            let _ = sender.send(envelope);
        } else {
            debug!(%room, peer = %peer_id, "envelope for absent peer dropped");
        }
    }

    /// Fan out to every member except `except`.
    fn broadcast(&self, room: &str, except: &str, envelope: &ServerEnvelope) {
        if let Some(members) = self.rooms.get(room) {
            for (peer_id, sender) in members {
                if peer_id != except {
                    let _ = sender.send(envelope.clone());
                }
            }
        }
    }
}

/// Bind the listen address and serve forever.
pub async fn run(listen_addr: &str, metrics: SharedMetrics) -> Result<(), Box<dyn Error>> {
    let listener = TcpListener::bind(listen_addr).await?;
    serve(listener, metrics).await
}

/// Accept loop over an already-bound listener. Tests bind port zero and
/// call this directly.
pub async fn serve(listener: TcpListener, metrics: SharedMetrics) -> Result<(), Box<dyn Error>> {
    info!("relay listening on {}", listener.local_addr()?);
    let rooms: SharedRooms = Arc::new(RwLock::new(Rooms::default()));

    loop {
        let (stream, addr) = listener.accept().await?;
        let rooms = Arc::clone(&rooms);
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, rooms, metrics).await {
                debug!(%addr, "connection ended: {e}");
            }
        });
    }
}

/// Log a metrics summary on a fixed cadence.
pub fn spawn_metrics_log(metrics: SharedMetrics, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let m = metrics.read();
            info!(
                uptime_secs = m.uptime_secs(),
                connections = m.connections,
                peak = m.peak_connections,
                joined_peers = m.joined_peers,
                forwarded = m.envelopes_forwarded,
                "relay status"
            );
        }
    })
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: SharedRooms,
    metrics: SharedMetrics,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    debug!(%addr, "connection accepted");
    metrics.write().connection_opened();

    let (mut sink, mut source) = ws.split();
    let (sender, mut outbound_rx) = mpsc::unbounded_channel::<ServerEnvelope>();

    // Writer side: drain the queue onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let Ok(text) = serde_json::to_string(&envelope) else {
                continue;
            };
            if sink.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    // The room and peer id this connection joined as.
    let mut membership: Option<(String, String)> = None;

    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%addr, "socket error: {e}");
                break;
            }
        };
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        // Malformed client JSON is ignored outright.
        let Ok(envelope) = serde_json::from_str::<ClientEnvelope>(text.as_str()) else {
            debug!(%addr, "unparseable envelope dropped");
            continue;
        };
        handle_envelope(envelope, &sender, &mut membership, &rooms, &metrics);
    }

    // Disconnect doubles as an implicit leave.
    if let Some((room, peer_id)) = membership.take() {
        let removed = rooms.write().leave(&room, &peer_id);
        if removed {
            metrics.write().peer_left();
            rooms.read().broadcast(
                &room,
                &peer_id,
                &ServerEnvelope::PeerLeft {
                    peer_id: peer_id.clone(),
                },
            );
            info!(%room, peer = %peer_id, "disconnected");
        }
    }
    metrics.write().connection_closed();
    writer.abort();
    Ok(())
}

fn handle_envelope(
    envelope: ClientEnvelope,
    sender: &PeerSender,
    membership: &mut Option<(String, String)>,
    rooms: &SharedRooms,
    metrics: &SharedMetrics,
) {
    match envelope {
        ClientEnvelope::Join { room, peer_id } => {
            if membership.is_some() {
                let _ = sender.send(ServerEnvelope::Error {
                    message: "already joined a room on this connection".to_string(),
                });
                return;
            }
            if !rooms.write().join(&room, &peer_id, sender.clone()) {
                warn!(%room, peer = %peer_id, "peer id already taken");
                let _ = sender.send(ServerEnvelope::Error {
                    message: format!("peer id {peer_id} already in room {room}"),
                });
                return;
            }
            *membership = Some((room.clone(), peer_id.clone()));
            metrics.write().peer_joined();
            info!(%room, peer = %peer_id, "joined");

            let _ = sender.send(ServerEnvelope::Joined { room: room.clone() });
            // Existing members learn about the newcomer; the newcomer
            // learns about them from their incoming offers.
            rooms
                .read()
                .broadcast(
                    &room,
                    &peer_id,
                    &ServerEnvelope::PeerJoined {
                        peer_id: peer_id.clone(),
                    },
                );
        }

        ClientEnvelope::Signal {
            room,
            from,
            to,
            data,
        } => {
            // Spoofed or pre-join traffic is dropped.
            if !is_member(membership, &room, &from) {
                return;
            }
            metrics.write().envelope_forwarded();
            let target = to.clone();
            rooms
                .read()
                .send_to(&room, &target, ServerEnvelope::Signal { from, to, data });
        }

        ClientEnvelope::Broadcast { room, from, data } => {
            if !is_member(membership, &room, &from) {
                return;
            }
            metrics.write().envelope_forwarded();
            let sender_id = from.clone();
            rooms.read().broadcast(
                &room,
                &sender_id,
                &ServerEnvelope::Broadcast { from, data },
            );
        }

        ClientEnvelope::Leave { room, peer_id } => {
            if !is_member(membership, &room, &peer_id) {
                return;
            }
            *membership = None;
            if rooms.write().leave(&room, &peer_id) {
                metrics.write().peer_left();
                rooms.read().broadcast(
                    &room,
                    &peer_id,
                    &ServerEnvelope::PeerLeft {
                        peer_id: peer_id.clone(),
                    },
                );
                info!(%room, peer = %peer_id, "left");
            }
        }
    }
}

fn is_member(membership: &Option<(String, String)>, room: &str, peer: &str) -> bool {
    matches!(membership, Some((r, p)) if r == room && p == peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> (PeerSender, mpsc::UnboundedReceiver<ServerEnvelope>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_join_rejects_duplicate_ids() {
        let mut rooms = Rooms::default();
        let (a, _a_rx) = peer();
        let (b, _b_rx) = peer();

        assert!(rooms.join("ops", "alice", a));
        assert!(!rooms.join("ops", "alice", b.clone()));
        // Same id in another room is fine.
        assert!(rooms.join("general", "alice", b));
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let mut rooms = Rooms::default();
        let (a, mut a_rx) = peer();
        let (b, mut b_rx) = peer();
        rooms.join("ops", "alice", a);
        rooms.join("ops", "bob", b);

        rooms.broadcast(
            "ops",
            "alice",
            &ServerEnvelope::PeerJoined {
                peer_id: "carol".to_string(),
            },
        );
        assert!(a_rx.try_recv().is_err());
        assert!(matches!(
            b_rx.try_recv().unwrap(),
            ServerEnvelope::PeerJoined { peer_id } if peer_id == "carol"
        ));
    }

    #[test]
    fn test_send_to_unknown_target_is_dropped() {
        let mut rooms = Rooms::default();
        let (a, mut a_rx) = peer();
        rooms.join("ops", "alice", a);

        rooms.send_to(
            "ops",
            "nobody",
            ServerEnvelope::Joined {
                room: "ops".to_string(),
            },
        );
        assert!(a_rx.try_recv().is_err());
    }

    #[test]
    fn test_leave_drops_empty_rooms() {
        let mut rooms = Rooms::default();
        let (a, _a_rx) = peer();
        rooms.join("ops", "alice", a);

        assert!(rooms.leave("ops", "alice"));
        assert!(rooms.rooms.is_empty());
        assert!(!rooms.leave("ops", "alice"));
    }
}
