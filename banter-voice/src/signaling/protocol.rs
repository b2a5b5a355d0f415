//! Signaling Protocol Envelopes
//!
//! JSON-framed messages exchanged with the relay, discriminated by a
//! `type` field. The relay forwards `signal` and `broadcast` payloads
//! opaquely; media never passes through it.

use serde::{Deserialize, Serialize};

/// Opaque participant identifier within a room.
pub type PeerId = String;

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description produced or committed during offer/answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

/// A trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// Payload of a `signal` envelope: exactly one negotiation artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalData {
    Offer { offer: SessionDescription },
    Answer { answer: SessionDescription },
    Candidate { candidate: IceCandidate },
}

/// Envelopes sent client -> relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Join {
        room: String,
        peer_id: PeerId,
    },
    Signal {
        room: String,
        from: PeerId,
        to: PeerId,
        data: SignalData,
    },
    Broadcast {
        room: String,
        from: PeerId,
        data: serde_json::Value,
    },
    Leave {
        room: String,
        peer_id: PeerId,
    },
}

/// Envelopes sent relay -> client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    PeerJoined {
        peer_id: PeerId,
    },
    PeerLeft {
        peer_id: PeerId,
    },
    Signal {
        from: PeerId,
        to: PeerId,
        data: SignalData,
    },
    Broadcast {
        from: PeerId,
        data: serde_json::Value,
    },
    Joined {
        room: String,
    },
    Error {
        message: String,
    },
}

/// Application payloads carried inside `broadcast` envelopes.
///
/// The relay never inspects these; peers that fail to parse one drop it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BroadcastPayload {
    /// Latency probe.
    Ping { sent_at_ms: u64 },
    /// Reply to a latency probe, echoing its timestamp.
    Pong { ping_sent_at_ms: u64 },
}
