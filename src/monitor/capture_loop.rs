//! The capture loop run on the monitor thread.
//!
//! Opens the capture, hands each frame to the sink, and reopens after
//! transient failures until the token is cancelled. A missing capture
//! privilege ends the loop for good.

use crate::capture::{CaptureFilter, FrameStream, PacketCapture};
use crate::domain::SessionId;
use crate::error::CaptureError;
use crate::sink::PacketSink;

use super::cancel::CancellationToken;
use super::MonitorSettings;

/// Why the capture loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The token was cancelled.
    Cancelled,
    /// The capture primitive refused for lack of privilege.
    PermissionDenied,
}

/// Run until cancelled or a fatal capture error.
pub fn run_capture_loop(
    capture: &dyn PacketCapture,
    filter: &CaptureFilter,
    sink: &PacketSink,
    session_id: SessionId,
    token: &CancellationToken,
    settings: &MonitorSettings,
) -> LoopExit {
    tracing::info!(
        "Packet capture on {} for peer {}",
        capture.interface_name(),
        filter.peer()
    );

    let exit = loop {
        if token.is_cancelled() {
            break LoopExit::Cancelled;
        }

        tracing::debug!("Opening capture with filter {:?}", filter.expression());
        let result = capture
            .open(filter, settings.poll_interval)
            .and_then(|mut stream| pump(stream.as_mut(), sink, session_id, token));

        match result {
            Ok(()) => break LoopExit::Cancelled,
            Err(e) if e.is_fatal() => {
                tracing::error!("{} - packet capture disabled for this session", e);
                break LoopExit::PermissionDenied;
            }
            Err(_) if token.is_cancelled() => break LoopExit::Cancelled,
            Err(e) => {
                tracing::error!(
                    "Capture error: {} - retrying in {:.1}s",
                    e,
                    settings.retry_backoff.as_secs_f64()
                );
                if token.wait_timeout(settings.retry_backoff) {
                    break LoopExit::Cancelled;
                }
            }
        }
    };

    tracing::info!("Packet capture loop exited");
    exit
}

/// Feed frames to the sink until cancelled. Only returns `Ok` once cancelled.
fn pump(
    stream: &mut dyn FrameStream,
    sink: &PacketSink,
    session_id: SessionId,
    token: &CancellationToken,
) -> Result<(), CaptureError> {
    while !token.is_cancelled() {
        if let Some(frame) = stream.next_frame()? {
            sink.handle(&frame, session_id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::scripted::ScriptedCapture;
    use crate::parser::test_frames::ipv4_frame;
    use crate::publish::Broadcaster;
    use crate::store::MemoryStore;
    use pnet::packet::ip::IpNextHeaderProtocols;
    use std::io;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    const TV: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 50);
    const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

    fn settings() -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(10),
            retry_backoff: Duration::from_millis(20),
            stop_timeout: Duration::from_secs(3),
        }
    }

    fn sink(store: &Arc<MemoryStore>) -> PacketSink {
        PacketSink::new(store.clone(), Arc::new(Broadcaster::new()))
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn transient() -> CaptureError {
        CaptureError::Io(io::Error::new(io::ErrorKind::Other, "interface hiccup"))
    }

    #[test]
    fn test_permission_denied_stops_without_retry() {
        let capture = ScriptedCapture::always_failing(|| CaptureError::InsufficientPermissions);
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let filter = CaptureFilter::new(IpAddr::V4(TV));

        let exit = run_capture_loop(
            &capture,
            &filter,
            &sink(&store),
            SessionId(1),
            &token,
            &settings(),
        );

        assert_eq!(exit, LoopExit::PermissionDenied);
        assert_eq!(capture.opens(), 1);
    }

    #[test]
    fn test_permission_denied_on_read_is_fatal() {
        let capture = ScriptedCapture::new();
        capture.fail_next_read(CaptureError::InsufficientPermissions);
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let filter = CaptureFilter::new(IpAddr::V4(TV));

        let exit = run_capture_loop(
            &capture,
            &filter,
            &sink(&store),
            SessionId(1),
            &token,
            &settings(),
        );

        assert_eq!(exit, LoopExit::PermissionDenied);
        assert_eq!(capture.opens(), 1);
    }

    #[test]
    fn test_transient_open_error_is_retried() {
        let capture = Arc::new(ScriptedCapture::new());
        capture.fail_next_open(transient());
        capture.fail_next_open(transient());
        capture.push_frame(ipv4_frame(TV, HOST, IpNextHeaderProtocols::Tcp, 100));

        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let handle = {
            let capture = Arc::clone(&capture);
            let sink = sink(&store);
            let token = token.clone();
            thread::spawn(move || {
                let filter = CaptureFilter::new(IpAddr::V4(TV));
                run_capture_loop(
                    capture.as_ref(),
                    &filter,
                    &sink,
                    SessionId(1),
                    &token,
                    &settings(),
                )
            })
        };

        assert!(wait_until(|| store.len() == 1));
        assert_eq!(capture.opens(), 3);

        token.cancel();
        assert_eq!(handle.join().unwrap(), LoopExit::Cancelled);
    }

    #[test]
    fn test_transient_read_error_reopens() {
        let capture = Arc::new(ScriptedCapture::new());
        capture.fail_next_read(transient());

        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let handle = {
            let capture = Arc::clone(&capture);
            let sink = sink(&store);
            let token = token.clone();
            thread::spawn(move || {
                let filter = CaptureFilter::new(IpAddr::V4(TV));
                run_capture_loop(
                    capture.as_ref(),
                    &filter,
                    &sink,
                    SessionId(1),
                    &token,
                    &settings(),
                )
            })
        };

        assert!(wait_until(|| capture.opens() >= 2));
        token.cancel();
        assert_eq!(handle.join().unwrap(), LoopExit::Cancelled);
    }

    #[test]
    fn test_cancel_during_backoff_exits_promptly() {
        let capture = Arc::new(ScriptedCapture::always_failing(transient));
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let long_backoff = MonitorSettings {
            retry_backoff: Duration::from_secs(30),
            ..settings()
        };

        let handle = {
            let capture = Arc::clone(&capture);
            let sink = sink(&store);
            let token = token.clone();
            thread::spawn(move || {
                let filter = CaptureFilter::new(IpAddr::V4(TV));
                run_capture_loop(
                    capture.as_ref(),
                    &filter,
                    &sink,
                    SessionId(1),
                    &token,
                    &long_backoff,
                )
            })
        };

        assert!(wait_until(|| capture.opens() >= 1));
        let cancelled_at = Instant::now();
        token.cancel();

        assert_eq!(handle.join().unwrap(), LoopExit::Cancelled);
        assert!(cancelled_at.elapsed() < Duration::from_secs(5));
        assert_eq!(capture.opens(), 1);
    }

    #[test]
    fn test_frames_are_handled_in_order() {
        let capture = Arc::new(ScriptedCapture::new());
        for size in [100, 200, 300] {
            capture.push_frame(ipv4_frame(TV, HOST, IpNextHeaderProtocols::Udp, size));
        }

        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let handle = {
            let capture = Arc::clone(&capture);
            let sink = sink(&store);
            let token = token.clone();
            thread::spawn(move || {
                let filter = CaptureFilter::new(IpAddr::V4(TV));
                run_capture_loop(
                    capture.as_ref(),
                    &filter,
                    &sink,
                    SessionId(4),
                    &token,
                    &settings(),
                )
            })
        };

        assert!(wait_until(|| store.len() == 3));
        token.cancel();
        handle.join().unwrap();

        let sizes: Vec<u64> = store.entries().iter().map(|e| e.size_bytes).collect();
        assert_eq!(sizes, vec![100, 200, 300]);
    }

    #[test]
    fn test_already_cancelled_never_opens() {
        let capture = ScriptedCapture::new();
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        token.cancel();
        let filter = CaptureFilter::new(IpAddr::V4(TV));

        let exit = run_capture_loop(
            &capture,
            &filter,
            &sink(&store),
            SessionId(1),
            &token,
            &settings(),
        );

        assert_eq!(exit, LoopExit::Cancelled);
        assert_eq!(capture.opens(), 0);
    }
}
