//! Scripted capture backend for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::{CaptureFilter, FrameStream, PacketCapture, RawFrame};
use crate::error::CaptureError;

type ErrorFactory = Box<dyn Fn() -> CaptureError + Send + Sync>;

/// Replays queued open errors, read errors, stalls and frames.
#[derive(Default)]
pub(crate) struct ScriptedCapture {
    open_errors: Mutex<VecDeque<CaptureError>>,
    always_fail: Option<ErrorFactory>,
    read_errors: Arc<Mutex<VecDeque<CaptureError>>>,
    frames: Arc<Mutex<VecDeque<Vec<u8>>>>,
    stalls: Arc<Mutex<VecDeque<Duration>>>,
    stalls_started: Arc<AtomicUsize>,
    opens: AtomicUsize,
}

impl ScriptedCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `open` fails with an error built by `factory`.
    pub fn always_failing(factory: impl Fn() -> CaptureError + Send + Sync + 'static) -> Self {
        Self {
            always_fail: Some(Box::new(factory)),
            ..Self::default()
        }
    }

    /// The next `open` fails with `error`.
    pub fn fail_next_open(&self, error: CaptureError) {
        self.open_errors.lock().unwrap().push_back(error);
    }

    /// The next `next_frame` on an open stream fails with `error`.
    pub fn fail_next_read(&self, error: CaptureError) {
        self.read_errors.lock().unwrap().push_back(error);
    }

    /// The next `next_frame` blocks for `delay`, ignoring the poll slice.
    pub fn stall_next_read(&self, delay: Duration) {
        self.stalls.lock().unwrap().push_back(delay);
    }

    /// Number of stalled reads that have begun.
    pub fn stalls_started(&self) -> usize {
        self.stalls_started.load(Ordering::SeqCst)
    }

    pub fn push_frame(&self, frame: Vec<u8>) {
        self.frames.lock().unwrap().push_back(frame);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl PacketCapture for ScriptedCapture {
    fn open(
        &self,
        _filter: &CaptureFilter,
        poll: Duration,
    ) -> Result<Box<dyn FrameStream>, CaptureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if let Some(factory) = &self.always_fail {
            return Err(factory());
        }
        if let Some(error) = self.open_errors.lock().unwrap().pop_front() {
            return Err(error);
        }

        Ok(Box::new(ScriptedStream {
            read_errors: Arc::clone(&self.read_errors),
            frames: Arc::clone(&self.frames),
            stalls: Arc::clone(&self.stalls),
            stalls_started: Arc::clone(&self.stalls_started),
            poll: poll.min(Duration::from_millis(10)),
        }))
    }

    fn interface_name(&self) -> &str {
        "scripted0"
    }
}

struct ScriptedStream {
    read_errors: Arc<Mutex<VecDeque<CaptureError>>>,
    frames: Arc<Mutex<VecDeque<Vec<u8>>>>,
    stalls: Arc<Mutex<VecDeque<Duration>>>,
    stalls_started: Arc<AtomicUsize>,
    poll: Duration,
}

impl FrameStream for ScriptedStream {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        if let Some(error) = self.read_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        let stall = self.stalls.lock().unwrap().pop_front();
        if let Some(delay) = stall {
            self.stalls_started.fetch_add(1, Ordering::SeqCst);
            thread::sleep(delay);
            return Ok(None);
        }

        let frame = self.frames.lock().unwrap().pop_front();
        match frame {
            Some(data) => Ok(Some(RawFrame::new(data))),
            None => {
                thread::sleep(self.poll);
                Ok(None)
            }
        }
    }
}
