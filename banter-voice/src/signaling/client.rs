//! Relay Connection
//!
//! One WebSocket per mesh session carrying JSON envelopes. Outbound
//! sends are best-effort and at-most-once; inbound envelopes fan out
//! to every subscriber. A lost connection is re-dialed with exponential
//! backoff and the session's join is replayed.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::signaling::protocol::{ClientEnvelope, ServerEnvelope};

/// Buffered inbound envelopes per subscriber before lag drops the oldest.
const SUBSCRIBER_BUFFER: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Signaling transport errors.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("relay connect failed: {0}")]
    Connect(String),

    #[error("relay connection closed")]
    Closed,
}

/// Client side of the relay connection.
pub struct SignalingClient {
    outbound: mpsc::UnboundedSender<ClientEnvelope>,
    inbound: broadcast::Sender<ServerEnvelope>,
    last_join: Arc<Mutex<Option<ClientEnvelope>>>,
    cancel: watch::Sender<bool>,
}

impl SignalingClient {
    /// Dial the relay and spawn the connection task.
    pub async fn connect(url: &str, reconnect: ReconnectConfig) -> Result<Self, SignalError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| SignalError::Connect(e.to_string()))?;
        info!(%url, "relay connected");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        let (cancel, cancel_rx) = watch::channel(false);
        let last_join = Arc::new(Mutex::new(None));

        let task = ConnectionTask {
            url: url.to_string(),
            reconnect,
            inbound: inbound.clone(),
            last_join: Arc::clone(&last_join),
        };
        tokio::spawn(task.run(stream, outbound_rx, cancel_rx));

        Ok(Self {
            outbound,
            inbound,
            last_join,
            cancel,
        })
    }

    /// Register a consumer of inbound envelopes. Any number of
    /// consumers may subscribe; each receives every envelope.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEnvelope> {
        self.inbound.subscribe()
    }

    /// Queue an envelope for transmission. Best-effort: whatever is in
    /// flight when the connection drops is lost, never retransmitted.
    pub fn send(&self, envelope: ClientEnvelope) -> Result<(), SignalError> {
        if matches!(envelope, ClientEnvelope::Join { .. }) {
            *self.last_join.lock() = Some(envelope.clone());
        }
        self.outbound.send(envelope).map_err(|_| SignalError::Closed)
    }

    /// Drop the relay connection after flushing queued envelopes.
    pub fn close(&self) {
        let _ = self.cancel.send(true);
    }
}

#[cfg(test)]
impl SignalingClient {
    /// Loopback client for coordinator tests: inbound envelopes are
    /// injected through the returned sender, outbound envelopes
    /// observed on the returned receiver. No socket involved.
    pub(crate) fn loopback() -> (
        Self,
        mpsc::UnboundedReceiver<ClientEnvelope>,
        broadcast::Sender<ServerEnvelope>,
    ) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        let (cancel, _) = watch::channel(false);
        let client = Self {
            outbound,
            inbound: inbound.clone(),
            last_join: Arc::new(Mutex::new(None)),
            cancel,
        };
        (client, outbound_rx, inbound)
    }
}

enum Drive {
    /// `close()` was called or the client was dropped.
    Cancelled,
    /// All senders are gone and the queue is drained.
    SenderGone,
    /// The socket failed; redial.
    ConnectionLost,
}

struct ConnectionTask {
    url: String,
    reconnect: ReconnectConfig,
    inbound: broadcast::Sender<ServerEnvelope>,
    last_join: Arc<Mutex<Option<ClientEnvelope>>>,
}

impl ConnectionTask {
    async fn run(
        self,
        stream: WsStream,
        mut outbound_rx: mpsc::UnboundedReceiver<ClientEnvelope>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        let mut current = Some(stream);
        loop {
            let stream = match current.take() {
                Some(stream) => stream,
                None => match self.redial(&mut cancel_rx).await {
                    Some(stream) => stream,
                    None => break,
                },
            };
            match self.drive(stream, &mut outbound_rx, &mut cancel_rx).await {
                Drive::Cancelled | Drive::SenderGone => break,
                Drive::ConnectionLost => warn!("relay connection lost, reconnecting"),
            }
        }
        debug!("relay connection task ended");
    }

    /// Serve one live socket until it dies or the session ends.
    async fn drive(
        &self,
        stream: WsStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<ClientEnvelope>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Drive {
        let (mut sink, mut source) = stream.split();

        // A fresh socket knows nothing about the session: replay the join.
        let replay = self.last_join.lock().clone();
        if let Some(join) = replay {
            if send_envelope(&mut sink, &join).await.is_err() {
                return Drive::ConnectionLost;
            }
        }

        loop {
            tokio::select! {
                _ = cancel_rx.changed() => {
                    self.flush(&mut sink, outbound_rx).await;
                    let _ = sink.send(Message::Close(None)).await;
                    return Drive::Cancelled;
                }
                outgoing = outbound_rx.recv() => match outgoing {
                    Some(envelope) => {
                        if send_envelope(&mut sink, &envelope).await.is_err() {
                            return Drive::ConnectionLost;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return Drive::SenderGone;
                    }
                },
                incoming = source.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Drive::ConnectionLost,
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Hand one inbound frame to the subscribers. Malformed frames must
    /// not take the handler chain down; they vanish with a debug line.
    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ServerEnvelope>(text) {
            Ok(envelope) => {
                let _ = self.inbound.send(envelope);
            }
            Err(e) => debug!("malformed relay frame dropped: {e}"),
        }
    }

    /// Send everything already queued before tearing the socket down.
    async fn flush(&self, sink: &mut WsSink, outbound_rx: &mut mpsc::UnboundedReceiver<ClientEnvelope>) {
        while let Ok(envelope) = outbound_rx.try_recv() {
            if send_envelope(sink, &envelope).await.is_err() {
                break;
            }
        }
    }

    /// Exponential backoff with jitter until the relay answers again.
    async fn redial(&self, cancel_rx: &mut watch::Receiver<bool>) -> Option<WsStream> {
        let mut delay = self.reconnect.initial_delay;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.reconnect.max_attempts != 0 && attempt > self.reconnect.max_attempts {
                warn!("giving up on relay after {} attempts", attempt - 1);
                return None;
            }

            let jitter = Duration::from_millis(
                rand::thread_rng().gen_range(0..=(delay.as_millis() as u64 / 4).max(1)),
            );
            tokio::select! {
                _ = cancel_rx.changed() => return None,
                _ = tokio::time::sleep(delay + jitter) => {}
            }

            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    info!(url = %self.url, attempt, "relay reconnected");
                    return Some(stream);
                }
                Err(e) => {
                    debug!(attempt, "redial failed: {e}");
                    delay = (delay * 2).min(self.reconnect.max_delay);
                }
            }
        }
    }
}

async fn send_envelope(sink: &mut WsSink, envelope: &ClientEnvelope) -> Result<(), ()> {
    match serde_json::to_string(envelope) {
        Ok(text) => sink.send(Message::text(text)).await.map_err(|_| ()),
        Err(e) => {
            // Cannot happen for our own envelope types; drop, not crash.
            warn!("unserializable envelope dropped: {e}");
            Ok(())
        }
    }
}
