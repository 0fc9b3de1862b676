//! Domain models for packet monitoring.
//!
//! This module contains the core domain types that are independent
//! of any infrastructure concerns (SRP, DIP).

mod events;
mod packet;

pub use events::{PacketUpdate, PACKET_UPDATE_EVENT};
pub use packet::{CapturedPacket, Protocol, SessionId};
