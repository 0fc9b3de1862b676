//! Per-packet handler: classify, persist, publish.
//!
//! Both outputs are attempted for every IP frame, independently of each
//! other. Neither an error nor a panic in a collaborator reaches the
//! capture loop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::capture::RawFrame;
use crate::domain::{CapturedPacket, PacketUpdate, SessionId, PACKET_UPDATE_EVENT};
use crate::parser::FrameLayers;
use crate::publish::EventPublisher;
use crate::store::PacketStore;

/// Writes each captured packet to the store and the publisher.
#[derive(Clone)]
pub struct PacketSink {
    store: Arc<dyn PacketStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl PacketSink {
    pub fn new(store: Arc<dyn PacketStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Handle one frame that passed the capture filter.
    pub fn handle(&self, frame: &RawFrame, session_id: SessionId) {
        let Some(layers) = FrameLayers::parse(&frame.data) else {
            tracing::trace!("Skipping non-IP frame ({} bytes)", frame.data.len());
            return;
        };

        let packet = layers.to_packet(session_id, frame.observed_at);
        tracing::debug!(
            "Packet: {} {} -> {} ({} bytes)",
            packet.protocol,
            packet.source,
            packet.destination,
            packet.size_bytes
        );

        self.persist(&packet);
        self.publish(&packet);
    }

    fn persist(&self, packet: &CapturedPacket) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.store.record(packet))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Failed to log packet: {}", e),
            Err(_) => tracing::error!("Packet store panicked while logging packet"),
        }
    }

    fn publish(&self, packet: &CapturedPacket) {
        let update = PacketUpdate::from_packet(packet);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.publisher.publish(PACKET_UPDATE_EVENT, &update)
        }));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Failed to emit {}: {}", PACKET_UPDATE_EVENT, e),
            Err(_) => tracing::error!("Publisher panicked while emitting {}", PACKET_UPDATE_EVENT),
        }
    }
}
