//! JSON line event output.

use std::io::{self, Write};
use std::sync::Mutex;

use serde::Serialize;

use super::EventPublisher;
use crate::domain::PacketUpdate;
use crate::error::PublishError;

#[derive(Serialize)]
struct Envelope<'a> {
    event: &'a str,
    data: &'a PacketUpdate,
}

/// Writes one `{"event": ..., "data": {...}}` object per line.
pub struct JsonLinePublisher<W: Write + Send> {
    writer: Mutex<W>,
}

impl JsonLinePublisher<io::Stdout> {
    /// Publisher writing to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonLinePublisher<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> EventPublisher for JsonLinePublisher<W> {
    fn publish(&self, event: &str, update: &PacketUpdate) -> Result<(), PublishError> {
        let line = serde_json::to_string(&Envelope {
            event,
            data: update,
        })?;

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}
