//! Banter Signaling Relay
//!
//! Forwards opaque envelopes between the members of a voice room. Media
//! never passes through the relay; it only carries negotiation traffic
//! and roster events.

pub mod metrics;
pub mod server;
