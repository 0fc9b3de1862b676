//! Packet monitor lifecycle.
//!
//! `PacketMonitor` owns at most one capture thread at a time. It is built
//! once at process start and handed to whoever needs start/stop, so there
//! is no process-wide global state.
//!
//! Every `start` mints a fresh `CancellationToken`. A token from an earlier
//! run can be cancelled at any time without touching the current loop.

mod cancel;
mod capture_loop;

pub use cancel::CancellationToken;
pub use capture_loop::{run_capture_loop, LoopExit};

use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::capture::{CaptureFilter, PacketCapture};
use crate::domain::SessionId;
use crate::sink::PacketSink;

/// Default bound on one blocking capture read.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default wait before reopening the capture after a transient error.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);
/// Default time `stop` waits for the capture thread.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How often `stop` checks whether the capture thread has exited.
const STOP_POLL: Duration = Duration::from_millis(10);

const THREAD_NAME: &str = "packet-monitor";

/// Timing knobs for the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub stop_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// How a capture thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The loop returned.
    Finished(LoopExit),
    /// The thread panicked.
    Panicked,
}

/// The running capture, if any.
struct ActiveCapture {
    handle: JoinHandle<LoopExit>,
    token: CancellationToken,
    session_id: SessionId,
}

impl ActiveCapture {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Join a thread that has already finished.
    fn reap(self) -> CaptureOutcome {
        match self.handle.join() {
            Ok(exit) => {
                tracing::debug!(
                    "Capture thread for session {} exited: {:?}",
                    self.session_id,
                    exit
                );
                CaptureOutcome::Finished(exit)
            }
            Err(_) => {
                tracing::error!("Capture thread for session {} panicked", self.session_id);
                CaptureOutcome::Panicked
            }
        }
    }
}

#[derive(Default)]
struct MonitorState {
    active: Option<ActiveCapture>,
    last_outcome: Option<CaptureOutcome>,
}

impl MonitorState {
    /// Join the recorded thread if it has finished.
    fn reap_finished(&mut self) {
        if self.active.as_ref().is_some_and(|active| !active.is_alive()) {
            if let Some(finished) = self.active.take() {
                self.last_outcome = Some(finished.reap());
            }
        }
    }
}

/// Starts and stops the background packet capture.
pub struct PacketMonitor {
    capture: Arc<dyn PacketCapture>,
    peer: IpAddr,
    settings: MonitorSettings,
    state: Mutex<MonitorState>,
}

impl PacketMonitor {
    pub fn new(capture: Arc<dyn PacketCapture>, peer: IpAddr, settings: MonitorSettings) -> Self {
        Self {
            capture,
            peer,
            settings,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn peer(&self) -> IpAddr {
        self.peer
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start capturing for `session_id`.
    ///
    /// Returns `false` without side effects if a capture thread is alive.
    pub fn start(&self, session_id: SessionId, sink: PacketSink) -> bool {
        let mut state = self.lock_state();

        if state.active.as_ref().is_some_and(ActiveCapture::is_alive) {
            tracing::warn!("Packet monitor already running - ignoring start request");
            return false;
        }
        state.reap_finished();

        let token = CancellationToken::new();
        let filter = CaptureFilter::new(self.peer);
        let capture = Arc::clone(&self.capture);
        let settings = self.settings;
        let thread_token = token.clone();

        let spawned = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                run_capture_loop(
                    capture.as_ref(),
                    &filter,
                    &sink,
                    session_id,
                    &thread_token,
                    &settings,
                )
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Failed to spawn packet monitor thread: {}", e);
                return false;
            }
        };

        state.active = Some(ActiveCapture {
            handle,
            token,
            session_id,
        });

        tracing::info!(
            "Packet monitor started (session_id={}, peer={})",
            session_id,
            self.peer
        );
        true
    }

    /// Cancel the capture and wait up to `timeout` for its thread to exit.
    ///
    /// Returns immediately if nothing is running. On timeout a warning is
    /// logged and the call returns anyway; the cancelled thread stays
    /// recorded until it exits, so no second loop can start beside it.
    pub fn stop(&self, timeout: Duration) {
        let token = {
            let mut state = self.lock_state();
            let current = state
                .active
                .as_ref()
                .map(|active| (active.is_alive(), active.token.clone()));
            match current {
                Some((true, token)) => token,
                Some((false, _)) => {
                    state.reap_finished();
                    tracing::debug!("Packet monitor already exited - nothing to stop");
                    return;
                }
                None => {
                    tracing::debug!("Packet monitor not running - nothing to stop");
                    return;
                }
            }
        };

        tracing::info!("Stopping packet monitor...");
        token.cancel();

        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.lock_state();
                let finished = match state.active.as_ref() {
                    Some(active) if active.token.same_as(&token) => !active.is_alive(),
                    // Reaped by a concurrent start or stop
                    _ => return,
                };
                if finished {
                    state.reap_finished();
                    tracing::info!("Packet monitor stopped cleanly");
                    return;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    "Packet monitor thread did not stop within {:.1}s",
                    timeout.as_secs_f64()
                );
                return;
            }
            thread::sleep(STOP_POLL.min(deadline - now));
        }
    }

    /// True while a capture thread is alive.
    pub fn is_running(&self) -> bool {
        self.lock_state()
            .active
            .as_ref()
            .is_some_and(ActiveCapture::is_alive)
    }

    /// Session the live capture thread is attributing packets to.
    pub fn active_session(&self) -> Option<SessionId> {
        self.lock_state()
            .active
            .as_ref()
            .filter(|active| active.is_alive())
            .map(|active| active.session_id)
    }

    /// How the most recent capture thread ended, once it has.
    pub fn last_outcome(&self) -> Option<CaptureOutcome> {
        let mut state = self.lock_state();
        state.reap_finished();
        state.last_outcome
    }

    /// Token of the most recent capture run, while it is recorded.
    pub fn active_token(&self) -> Option<CancellationToken> {
        self.lock_state()
            .active
            .as_ref()
            .map(|active| active.token.clone())
    }
}

impl Drop for PacketMonitor {
    fn drop(&mut self) {
        self.stop(self.settings.stop_timeout);
    }
}
