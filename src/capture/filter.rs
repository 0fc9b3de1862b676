//! Capture filter scoped to one peer address.
//!
//! The filter selects every frame that has the peer as its source or
//! destination: `host <peer>`, whatever the other end is.

use std::fmt;
use std::net::IpAddr;

use pnet::packet::arp::ArpPacket;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::Packet;

/// BPF-style `host` filter for a single peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFilter {
    peer: IpAddr,
}

impl CaptureFilter {
    pub fn new(peer: IpAddr) -> Self {
        Self { peer }
    }

    pub fn peer(&self) -> IpAddr {
        self.peer
    }

    /// The filter as a BPF expression.
    pub fn expression(&self) -> String {
        format!("host {}", self.peer)
    }

    /// Evaluate the expression against a raw Ethernet frame.
    ///
    /// Like a kernel `host` filter this also accepts ARP frames whose
    /// sender or target protocol address is the peer.
    pub fn matches(&self, frame: &[u8]) -> bool {
        let Some(ethernet) = EthernetPacket::new(frame) else {
            return false;
        };

        match (ethernet.get_ethertype(), self.peer) {
            (EtherTypes::Ipv4, IpAddr::V4(peer)) => Ipv4Packet::new(ethernet.payload())
                .map(|ip| ip.get_source() == peer || ip.get_destination() == peer)
                .unwrap_or(false),
            (EtherTypes::Ipv6, IpAddr::V6(peer)) => Ipv6Packet::new(ethernet.payload())
                .map(|ip| ip.get_source() == peer || ip.get_destination() == peer)
                .unwrap_or(false),
            (EtherTypes::Arp, IpAddr::V4(peer)) => ArpPacket::new(ethernet.payload())
                .map(|arp| {
                    arp.get_sender_proto_addr() == peer || arp.get_target_proto_addr() == peer
                })
                .unwrap_or(false),
            _ => false,
        }
    }
}

impl fmt::Display for CaptureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host {}", self.peer)
    }
}
