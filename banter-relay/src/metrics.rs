//! Metrics tracking for the relay server

use chrono::{DateTime, Local};

/// Server metrics
pub struct Metrics {
    /// Server start time
    pub start_time: DateTime<Local>,

    /// Current number of open connections
    pub connections: usize,

    /// Total connections since start
    pub total_connections: u64,

    /// Peak simultaneous connections
    pub peak_connections: usize,

    /// Peers currently joined to a room
    pub joined_peers: usize,

    /// Total joins since start
    pub total_joins: u64,

    /// Signal and broadcast envelopes forwarded since start
    pub envelopes_forwarded: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Local::now(),
            connections: 0,
            total_connections: 0,
            peak_connections: 0,
            joined_peers: 0,
            total_joins: 0,
            envelopes_forwarded: 0,
        }
    }

    pub fn connection_opened(&mut self) {
        self.connections += 1;
        self.total_connections += 1;
        if self.connections > self.peak_connections {
            self.peak_connections = self.connections;
        }
    }

    pub fn connection_closed(&mut self) {
        self.connections = self.connections.saturating_sub(1);
    }

    pub fn peer_joined(&mut self) {
        self.joined_peers += 1;
        self.total_joins += 1;
    }

    pub fn peer_left(&mut self) {
        self.joined_peers = self.joined_peers.saturating_sub(1);
    }

    pub fn envelope_forwarded(&mut self) {
        self.envelopes_forwarded += 1;
    }

    /// Uptime in whole seconds
    pub fn uptime_secs(&self) -> i64 {
        (Local::now() - self.start_time).num_seconds()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counters() {
        let mut m = Metrics::new();
        m.connection_opened();
        m.connection_opened();
        m.connection_closed();
        assert_eq!(m.connections, 1);
        assert_eq!(m.total_connections, 2);
        assert_eq!(m.peak_connections, 2);

        // Closing more than opened never underflows
        m.connection_closed();
        m.connection_closed();
        assert_eq!(m.connections, 0);
    }

    #[test]
    fn test_peer_counters() {
        let mut m = Metrics::new();
        m.peer_joined();
        m.peer_joined();
        m.peer_left();
        assert_eq!(m.joined_peers, 1);
        assert_eq!(m.total_joins, 2);
    }
}
