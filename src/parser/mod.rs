//! Frame parsing module.
//!
//! This module is responsible for turning raw captured bytes into
//! classified packet summaries (SRP).

mod frame_parser;

pub use frame_parser::FrameLayers;

#[cfg(test)]
pub(crate) use frame_parser::test_frames;
