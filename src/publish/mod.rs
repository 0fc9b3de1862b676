//! Live event publishing.
//!
//! This module defines the `EventPublisher` trait (ISP, DIP) and provides
//! implementations for in-process subscribers and JSON line output.

mod broadcaster;
mod json_publisher;

pub use broadcaster::{Broadcaster, Subscription};
pub use json_publisher::JsonLinePublisher;

use crate::domain::PacketUpdate;
use crate::error::PublishError;

/// Trait for publishing packet events (Interface Segregation Principle).
///
/// Publishing is fire-and-forget: there is no acknowledgement and no
/// delivery guarantee. An error only describes this one attempt.
pub trait EventPublisher: Send + Sync {
    /// Publish `update` under `event`.
    fn publish(&self, event: &str, update: &PacketUpdate) -> Result<(), PublishError>;
}
