//! pnet-based packet capture implementation.

use std::io;
use std::time::{Duration, Instant};

use pnet::datalink::{self, Channel, Config, DataLinkReceiver, NetworkInterface};

use super::{CaptureFilter, FrameStream, PacketCapture, RawFrame};
use crate::error::CaptureError;

/// Packet capture using the pnet library.
///
/// pnet has no kernel filter support, so the `host` filter is evaluated
/// on each frame before it leaves the stream.
pub struct PnetCapture {
    interface: NetworkInterface,
}

impl PnetCapture {
    /// Create a new capture on the specified interface.
    pub fn new(interface_name: &str) -> Result<Self, CaptureError> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == interface_name)
            .ok_or_else(|| CaptureError::InterfaceNotFound(interface_name.to_string()))?;

        Ok(Self { interface })
    }

    /// Create a capture on the first suitable interface.
    ///
    /// Looks for an interface that is up and not a loopback.
    pub fn on_default_interface() -> Result<Self, CaptureError> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.is_up() && !iface.is_loopback() && !iface.ips.is_empty())
            .ok_or_else(|| {
                CaptureError::InterfaceNotFound("no suitable interface found".to_string())
            })?;

        Ok(Self { interface })
    }

    /// Pick the named interface, or the default one when no name is given.
    pub fn from_config(interface_name: Option<&str>) -> Result<Self, CaptureError> {
        match interface_name {
            Some(name) => Self::new(name),
            None => Self::on_default_interface(),
        }
    }

    /// List all available network interfaces.
    pub fn list_interfaces() -> Vec<String> {
        datalink::interfaces()
            .into_iter()
            .map(|iface| {
                let status = if iface.is_up() { "UP" } else { "DOWN" };
                let ips: Vec<_> = iface.ips.iter().map(|ip| ip.to_string()).collect();
                let ips = if ips.is_empty() {
                    "no IP".to_string()
                } else {
                    ips.join(", ")
                };
                format!("{}: {} [{}]", iface.name, status, ips)
            })
            .collect()
    }
}

impl PacketCapture for PnetCapture {
    fn open(
        &self,
        filter: &CaptureFilter,
        poll: Duration,
    ) -> Result<Box<dyn FrameStream>, CaptureError> {
        let config = Config {
            read_timeout: Some(poll),
            ..Config::default()
        };

        let rx = match datalink::channel(&self.interface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => rx,
            Ok(_) => {
                return Err(CaptureError::ChannelCreation(
                    "unsupported channel type".to_string(),
                ))
            }
            Err(e) if is_permission_error(&e) => {
                return Err(CaptureError::InsufficientPermissions);
            }
            Err(e) => return Err(CaptureError::ChannelCreation(e.to_string())),
        };

        tracing::debug!(
            "Opened capture on {} with filter {:?}",
            self.interface.name,
            filter.expression()
        );

        Ok(Box::new(PnetFrameStream {
            rx,
            filter: *filter,
            poll,
        }))
    }

    fn interface_name(&self) -> &str {
        &self.interface.name
    }
}

/// Stream of frames that passed the peer filter.
struct PnetFrameStream {
    rx: Box<dyn DataLinkReceiver>,
    filter: CaptureFilter,
    poll: Duration,
}

impl FrameStream for PnetFrameStream {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        // Unrelated traffic must not keep us away from the cancel check
        // for longer than one poll slice.
        let deadline = Instant::now() + self.poll;

        loop {
            match self.rx.next() {
                Ok(data) => {
                    if self.filter.matches(data) {
                        return Ok(Some(RawFrame::new(data.to_vec())));
                    }
                }
                Err(e) => match e.kind() {
                    io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::Interrupted => return Ok(None),
                    _ if is_permission_error(&e) => {
                        return Err(CaptureError::InsufficientPermissions)
                    }
                    _ => return Err(CaptureError::Io(e)),
                },
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }
}

fn is_permission_error(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    let msg = e.to_string();
    msg.contains("permission") || msg.contains("Operation not permitted")
}
