//! Room Coordination
//!
//! Glue between signaling roster events and the voice mesh.

mod coordinator;

pub use coordinator::{RoomCommand, RoomCoordinator, RoomError, RoomEvent, RoomHandle};
