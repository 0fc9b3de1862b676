//! Packet capture abstraction.
//!
//! This module defines the `PacketCapture` trait (DIP) and provides
//! a pnet-based implementation. The capture loop only sees the traits,
//! so tests can drive it with scripted frames and errors.

mod filter;
mod pnet_capture;
#[cfg(test)]
pub(crate) mod scripted;

pub use filter::CaptureFilter;
pub use pnet_capture::PnetCapture;

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::CaptureError;

/// A frame captured from the wire.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// The raw link-layer bytes
    pub data: Vec<u8>,
    /// When the frame was read
    pub observed_at: DateTime<Utc>,
}

impl RawFrame {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            observed_at: Utc::now(),
        }
    }
}

/// Trait for packet capture backends (Dependency Inversion Principle).
///
/// A backend opens a stream of frames that match a filter. Each call to
/// `open` is one invocation of the OS capture primitive; the capture loop
/// calls it again after a transient failure.
pub trait PacketCapture: Send + Sync {
    /// Open a filtered frame stream.
    ///
    /// `poll` bounds how long a single `next_frame` call may block, which
    /// bounds how long the loop takes to notice cancellation.
    fn open(
        &self,
        filter: &CaptureFilter,
        poll: Duration,
    ) -> Result<Box<dyn FrameStream>, CaptureError>;

    /// Get the name of the interface being captured.
    fn interface_name(&self) -> &str;
}

/// An open capture returning frames that passed the filter.
pub trait FrameStream: Send {
    /// Read the next matching frame.
    ///
    /// Returns `Ok(None)` when the poll slice elapsed without one.
    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError>;
}
