//! Packet log persistence.
//!
//! This module defines the `PacketStore` trait (DIP) the sink writes
//! through, plus an in-memory and a file-backed implementation.

mod csv_store;
mod memory;

pub use csv_store::CsvStore;
pub use memory::MemoryStore;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CapturedPacket, SessionId};
use crate::error::StoreError;

/// Default number of recent packets returned by a stats query.
pub const DEFAULT_RECENT_LIMIT: usize = 20;
/// Upper bound on recent packets returned by a stats query.
pub const MAX_RECENT_LIMIT: usize = 100;

/// Trait for packet log backends.
///
/// Implementations are called from the capture thread, so each `record`
/// call must stand on its own: acquire whatever it needs, write, release.
pub trait PacketStore: Send + Sync {
    /// Persist one captured packet.
    fn record(&self, packet: &CapturedPacket) -> Result<(), StoreError>;

    /// Aggregate stats, optionally restricted to one session.
    fn query(&self, session: Option<SessionId>, limit: usize) -> Result<PacketStats, StoreError>;
}

/// One stored packet row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketLogEntry {
    pub id: u64,
    pub session_id: SessionId,
    pub protocol: String,
    pub source_ip: String,
    pub dest_ip: String,
    pub size_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

impl PacketLogEntry {
    pub fn from_packet(id: u64, packet: &CapturedPacket) -> Self {
        Self {
            id,
            session_id: packet.session_id,
            protocol: packet.protocol.label(),
            source_ip: packet.source.to_string(),
            dest_ip: packet.destination.to_string(),
            size_bytes: packet.size_bytes as u64,
            timestamp: packet.observed_at,
        }
    }
}

/// Aggregate packet statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketStats {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub protocol_breakdown: BTreeMap<String, u64>,
    /// Newest first
    pub recent_packets: Vec<PacketLogEntry>,
}

impl PacketStats {
    /// Aggregate `entries` after filtering them to `session`.
    pub fn aggregate<'a, I>(entries: I, session: Option<SessionId>, limit: usize) -> Self
    where
        I: IntoIterator<Item = &'a PacketLogEntry>,
    {
        let limit = clamp_limit(limit);
        let mut stats = PacketStats::default();
        let mut matching = Vec::new();

        for entry in entries {
            if session.is_some_and(|id| id != entry.session_id) {
                continue;
            }
            stats.total_packets += 1;
            stats.total_bytes += entry.size_bytes;
            *stats
                .protocol_breakdown
                .entry(entry.protocol.clone())
                .or_insert(0) += 1;
            matching.push(entry);
        }

        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        stats.recent_packets = matching.into_iter().take(limit).cloned().collect();
        stats
    }
}

/// Clamp a requested recent-packet count to `1..=MAX_RECENT_LIMIT`.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_RECENT_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn entry(id: u64, session: i64, protocol: &str, size: u64) -> PacketLogEntry {
        let base = Utc.with_ymd_and_hms(2026, 2, 18, 14, 30, 0).unwrap();
        PacketLogEntry {
            id,
            session_id: SessionId(session),
            protocol: protocol.to_string(),
            source_ip: "192.168.1.10".to_string(),
            dest_ip: "192.168.1.100".to_string(),
            size_bytes: size,
            timestamp: base + Duration::seconds(id as i64),
        }
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(20), 20);
        assert_eq!(clamp_limit(500), MAX_RECENT_LIMIT);
    }

    #[test]
    fn test_aggregate_all_sessions() {
        let entries = vec![
            entry(1, 1, "TCP", 100),
            entry(2, 1, "UDP", 50),
            entry(3, 2, "TCP", 10),
        ];
        let stats = PacketStats::aggregate(&entries, None, 20);

        assert_eq!(stats.total_packets, 3);
        assert_eq!(stats.total_bytes, 160);
        assert_eq!(stats.protocol_breakdown["TCP"], 2);
        assert_eq!(stats.protocol_breakdown["UDP"], 1);
        let ids: Vec<u64> = stats.recent_packets.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_aggregate_one_session_with_limit() {
        let entries = vec![
            entry(1, 1, "TCP", 100),
            entry(2, 2, "ICMP", 98),
            entry(3, 1, "47", 60),
            entry(4, 1, "TCP", 40),
        ];
        let stats = PacketStats::aggregate(&entries, Some(SessionId(1)), 2);

        assert_eq!(stats.total_packets, 3);
        assert_eq!(stats.total_bytes, 200);
        assert_eq!(stats.protocol_breakdown.get("ICMP"), None);
        assert_eq!(stats.protocol_breakdown["47"], 1);
        let ids: Vec<u64> = stats.recent_packets.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[test]
    fn test_aggregate_empty() {
        let stats = PacketStats::aggregate(&Vec::<PacketLogEntry>::new(), Some(SessionId(9)), 20);
        assert_eq!(stats, PacketStats::default());
    }
}
