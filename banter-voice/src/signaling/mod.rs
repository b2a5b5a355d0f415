//! Signaling
//!
//! Typed envelopes over one relay connection. The relay forwards them
//! between room members and never touches media.

mod client;
mod protocol;

pub use client::{SignalError, SignalingClient};
pub use protocol::*;
