//! Captured packet summaries.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a casting session, assigned by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SessionId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Transport protocol of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    /// Any other IP protocol, kept as its raw protocol number.
    Other(u8),
}

impl Protocol {
    /// The label stored and published for this protocol.
    pub fn label(&self) -> String {
        self.to_string()
    }

    /// Parse a stored label back into a protocol.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "TCP" => Some(Self::Tcp),
            "UDP" => Some(Self::Udp),
            "ICMP" => Some(Self::Icmp),
            other => other.parse().ok().map(Self::Other),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
            Self::Icmp => write!(f, "ICMP"),
            Self::Other(number) => write!(f, "{number}"),
        }
    }
}

/// One classified frame, attributed to a session.
///
/// Never held by the monitor: it is built in the sink, written through
/// to the store and the publisher, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPacket {
    pub protocol: Protocol,
    pub source: IpAddr,
    pub destination: IpAddr,
    /// Length of the whole captured frame
    pub size_bytes: usize,
    pub observed_at: DateTime<Utc>,
    pub session_id: SessionId,
}
