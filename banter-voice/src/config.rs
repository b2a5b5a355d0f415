//! Voice Subsystem Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default relay endpoint (a locally running banter-relay).
const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:9090";

/// Public STUN server used when no ICE servers are configured.
const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// How often peers are pinged for latency samples.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// One ICE server entry handed to every peer connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Reconnect discipline for the relay connection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first redial attempt.
    pub initial_delay: Duration,
    /// Upper bound for the doubling delay.
    pub max_delay: Duration,
    /// Redial attempts before giving up. Zero retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

/// Voice mesh configuration.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Relay endpoint, e.g. "wss://voice.example.net/signal".
    pub relay_url: String,
    /// ICE servers for NAT traversal.
    /// If empty, a public STUN server is used.
    pub ice_servers: Vec<IceServerConfig>,
    /// Relay reconnect behaviour.
    pub reconnect: ReconnectConfig,
    /// Cadence of latency probes while in a room.
    pub ping_interval: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ice_servers: Vec::new(),
            reconnect: ReconnectConfig::default(),
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

impl VoiceConfig {
    /// Get the effective ICE servers (configured or default STUN).
    pub fn effective_ice_servers(&self) -> Vec<IceServerConfig> {
        if self.ice_servers.is_empty() {
            vec![IceServerConfig {
                urls: vec![DEFAULT_STUN_URL.to_string()],
                username: None,
                credential: None,
            }]
        } else {
            self.ice_servers.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ice_servers() {
        let config = VoiceConfig::default();
        let servers = config.effective_ice_servers();
        assert_eq!(servers.len(), 1);
        assert!(servers[0].urls[0].starts_with("stun:"));

        let config = VoiceConfig {
            ice_servers: vec![IceServerConfig {
                urls: vec!["turn:turn.example.net".to_string()],
                username: Some("u".to_string()),
                credential: Some("c".to_string()),
            }],
            ..VoiceConfig::default()
        };
        let servers = config.effective_ice_servers();
        assert_eq!(servers[0].urls[0], "turn:turn.example.net");
    }
}
