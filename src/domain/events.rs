//! Live events published for captured packets.

use serde::{Deserialize, Serialize};

use super::packet::{CapturedPacket, SessionId};

/// Event name under which packet updates are published.
pub const PACKET_UPDATE_EVENT: &str = "packet_update";

/// Payload of a `packet_update` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketUpdate {
    pub protocol: String,
    pub source_ip: String,
    pub dest_ip: String,
    pub size_bytes: usize,
    pub session_id: SessionId,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl PacketUpdate {
    pub fn from_packet(packet: &CapturedPacket) -> Self {
        let timestamp = packet.observed_at.timestamp_micros() as f64 / 1_000_000.0;
        Self {
            protocol: packet.protocol.label(),
            source_ip: packet.source.to_string(),
            dest_ip: packet.destination.to_string(),
            size_bytes: packet.size_bytes,
            session_id: packet.session_id,
            timestamp,
        }
    }
}
