//! Latency tracking for mesh peers
//!
//! Measures round-trip time (RTT) to every peer using ping/pong
//! broadcasts and provides estimated one-way latency as the per-peer
//! connection-quality signal.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::signaling::PeerId;

/// Number of RTT samples to keep for averaging
const RTT_SAMPLE_COUNT: usize = 5;

/// Default latency estimate when no measurements exist (conservative for local network)
const DEFAULT_LATENCY_MS: u64 = 10;

/// How long a ping stays answerable
const PING_TTL: Duration = Duration::from_secs(10);

/// A single outstanding ping. Every peer in the room may answer it.
struct PendingPing {
    sent_at: Instant,
}

/// RTT history for a single peer
struct PeerLatency {
    /// Recent RTT samples in milliseconds
    samples: Vec<u64>,
    /// Cached average RTT
    avg_rtt_ms: u64,
}

impl PeerLatency {
    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(RTT_SAMPLE_COUNT),
            avg_rtt_ms: DEFAULT_LATENCY_MS * 2, // RTT = 2 * one-way
        }
    }

    fn add_sample(&mut self, rtt_ms: u64) {
        if self.samples.len() >= RTT_SAMPLE_COUNT {
            self.samples.remove(0);
        }
        self.samples.push(rtt_ms);
        self.recalculate_average();
    }

    fn recalculate_average(&mut self) {
        if self.samples.is_empty() {
            self.avg_rtt_ms = DEFAULT_LATENCY_MS * 2;
            return;
        }
        let sum: u64 = self.samples.iter().sum();
        self.avg_rtt_ms = sum / self.samples.len() as u64;
    }

    /// Get estimated one-way latency (RTT / 2)
    fn one_way_latency_ms(&self) -> u64 {
        self.avg_rtt_ms / 2
    }
}

/// Tracks latency to the peers of a room
#[derive(Default)]
pub struct LatencyTracker {
    /// Outstanding pings, keyed by their timestamp_ms
    pending_pings: HashMap<u64, PendingPing>,
    /// Latency data per peer
    peer_latencies: HashMap<PeerId, PeerLatency>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all state (when leaving the room)
    pub fn clear(&mut self) {
        self.pending_pings.clear();
        self.peer_latencies.clear();
    }

    /// Drop history for a peer that left
    pub fn forget_peer(&mut self, peer_id: &str) {
        self.peer_latencies.remove(peer_id);
    }

    /// Create a ping to send. Returns the timestamp to include in the Ping payload.
    pub fn create_ping(&mut self) -> u64 {
        let now = Instant::now();
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        self.pending_pings
            .insert(timestamp_ms, PendingPing { sent_at: now });

        // Clean up expired pings
        self.pending_pings
            .retain(|_, p| p.sent_at.elapsed() < PING_TTL);

        timestamp_ms
    }

    /// Handle a pong response. Returns the measured RTT if the ping is
    /// still outstanding. The ping entry stays alive so every peer in
    /// the room can answer the same probe.
    pub fn handle_pong(&mut self, from_peer: &str, original_timestamp_ms: u64) -> Option<u64> {
        let pending = self.pending_pings.get(&original_timestamp_ms)?;
        let rtt_ms = pending.sent_at.elapsed().as_millis() as u64;

        let peer_latency = self
            .peer_latencies
            .entry(from_peer.to_string())
            .or_insert_with(PeerLatency::new);
        peer_latency.add_sample(rtt_ms);

        tracing::debug!(
            "Latency to {}: RTT={}ms, avg={}ms, one-way={}ms",
            from_peer,
            rtt_ms,
            peer_latency.avg_rtt_ms,
            peer_latency.one_way_latency_ms()
        );

        Some(rtt_ms)
    }

    /// Get estimated one-way latency to a specific peer.
    /// Returns DEFAULT_LATENCY_MS if no measurements exist.
    pub fn peer_latency_ms(&self, peer_id: &str) -> u64 {
        self.peer_latencies
            .get(peer_id)
            .map(|p| p.one_way_latency_ms())
            .unwrap_or(DEFAULT_LATENCY_MS)
    }

    /// One-way estimates for every measured peer
    pub fn latencies(&self) -> Vec<(PeerId, u64)> {
        self.peer_latencies
            .iter()
            .map(|(peer_id, latency)| (peer_id.clone(), latency.one_way_latency_ms()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_tracker_basics() {
        let mut tracker = LatencyTracker::new();

        // No measurements yet - should return default
        assert_eq!(tracker.peer_latency_ms("peer1"), DEFAULT_LATENCY_MS);

        // Simulate a ping/pong with 50ms RTT
        let ts = tracker.create_ping();
        std::thread::sleep(Duration::from_millis(50));
        let rtt = tracker.handle_pong("peer1", ts);

        assert!(rtt.is_some());
        let measured_rtt = rtt.unwrap();
        assert!(measured_rtt >= 50); // At least 50ms

        // One-way should be roughly half
        let one_way = tracker.peer_latency_ms("peer1");
        assert!(one_way >= 25);
    }

    #[test]
    fn test_one_ping_answers_many_peers() {
        let mut tracker = LatencyTracker::new();
        let ts = tracker.create_ping();

        assert!(tracker.handle_pong("peer1", ts).is_some());
        assert!(tracker.handle_pong("peer2", ts).is_some());
        assert_eq!(tracker.latencies().len(), 2);

        // A pong for a ping never sent is ignored
        assert!(tracker.handle_pong("peer3", ts + 1).is_none());
    }

    #[test]
    fn test_averaging() {
        let mut tracker = LatencyTracker::new();

        let peer_latency = tracker
            .peer_latencies
            .entry("peer1".to_string())
            .or_insert_with(PeerLatency::new);

        peer_latency.add_sample(100);
        peer_latency.add_sample(200);
        peer_latency.add_sample(150);

        // Average should be (100+200+150)/3 = 150, one-way = 75
        assert_eq!(peer_latency.avg_rtt_ms, 150);
        assert_eq!(peer_latency.one_way_latency_ms(), 75);
    }

    #[test]
    fn test_forget_peer_drops_history() {
        let mut tracker = LatencyTracker::new();
        let ts = tracker.create_ping();
        tracker.handle_pong("peer1", ts);

        tracker.forget_peer("peer1");
        assert_eq!(tracker.peer_latency_ms("peer1"), DEFAULT_LATENCY_MS);
    }
}
