//! castmon - packet monitor for text-to-TV casting sessions.
//!
//! Watches traffic between this host and the TV, classifies each packet,
//! appends it to a packet log and publishes a live `packet_update` event.

pub mod capture;
pub mod config;
pub mod domain;
pub mod error;
pub mod monitor;
pub mod parser;
pub mod publish;
pub mod sink;
pub mod store;

pub use capture::{CaptureFilter, FrameStream, PacketCapture, PnetCapture, RawFrame};
pub use config::Config;
pub use domain::{CapturedPacket, PacketUpdate, Protocol, SessionId, PACKET_UPDATE_EVENT};
pub use error::{CaptureError, ConfigError, PublishError, StoreError};
pub use monitor::{CancellationToken, CaptureOutcome, LoopExit, MonitorSettings, PacketMonitor};
pub use parser::FrameLayers;
pub use publish::{Broadcaster, EventPublisher, JsonLinePublisher, Subscription};
pub use sink::PacketSink;
pub use store::{CsvStore, MemoryStore, PacketLogEntry, PacketStats, PacketStore};
