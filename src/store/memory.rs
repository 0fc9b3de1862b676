//! In-memory packet log.

use std::sync::Mutex;

use super::{PacketLogEntry, PacketStats, PacketStore};
use crate::domain::{CapturedPacket, SessionId};
use crate::error::StoreError;

/// Packet log kept in a mutex-guarded vector. Lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<PacketLogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored row, oldest first.
    pub fn entries(&self) -> Vec<PacketLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PacketStore for MemoryStore {
    fn record(&self, packet: &CapturedPacket) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let id = entries.last().map_or(1, |last| last.id + 1);
        entries.push(PacketLogEntry::from_packet(id, packet));
        Ok(())
    }

    fn query(&self, session: Option<SessionId>, limit: usize) -> Result<PacketStats, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(PacketStats::aggregate(entries.iter(), session, limit))
    }
}
