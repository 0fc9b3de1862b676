//! Frame classification.
//!
//! Turns a raw Ethernet frame into the transport label, addresses and size
//! that get logged for it. Anything that is not IPv4 or IPv6 (ARP and
//! friends) yields `None` and is skipped by the caller.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;

use crate::domain::{CapturedPacket, Protocol, SessionId};

/// Minimum IPv4 header length in bytes (IHL of 5)
const MIN_IPV4_HEADER: usize = 20;
/// Fixed IPv6 header length in bytes
const IPV6_HEADER: usize = 40;

/// The network and transport layers found in one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayers {
    pub source: IpAddr,
    pub destination: IpAddr,
    /// IPv4 protocol field or IPv6 next header
    pub protocol_number: u8,
    pub tcp: bool,
    pub udp: bool,
    pub icmp: bool,
    /// Length of the whole frame
    pub size: usize,
}

impl FrameLayers {
    /// Parse an Ethernet frame. Returns `None` for non-IP or malformed frames.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let ethernet = EthernetPacket::new(data)?;

        match ethernet.get_ethertype() {
            EtherTypes::Ipv4 => Self::parse_ipv4(ethernet.payload(), data.len()),
            EtherTypes::Ipv6 => Self::parse_ipv6(ethernet.payload(), data.len()),
            _ => None,
        }
    }

    fn parse_ipv4(bytes: &[u8], size: usize) -> Option<Self> {
        let ipv4 = Ipv4Packet::new(bytes)?;
        if ipv4.get_version() != 4 {
            return None;
        }

        let header_len = ipv4.get_header_length() as usize * 4;
        if header_len < MIN_IPV4_HEADER || header_len > bytes.len() {
            return None;
        }

        // Ethernet pads short frames, so trust total_length when it fits
        let total_len = ipv4.get_total_length() as usize;
        let end = if total_len >= header_len && total_len <= bytes.len() {
            total_len
        } else {
            bytes.len()
        };

        let protocol = ipv4.get_next_level_protocol();
        let (tcp, udp, icmp) = transport_markers(protocol, &bytes[header_len..end]);

        Some(Self {
            source: IpAddr::V4(ipv4.get_source()),
            destination: IpAddr::V4(ipv4.get_destination()),
            protocol_number: protocol.0,
            tcp,
            udp,
            icmp,
            size,
        })
    }

    fn parse_ipv6(bytes: &[u8], size: usize) -> Option<Self> {
        let ipv6 = Ipv6Packet::new(bytes)?;
        if ipv6.get_version() != 6 {
            return None;
        }

        let (protocol, transport) =
            skip_extension_headers(ipv6.get_next_header(), &bytes[IPV6_HEADER..]);
        let (tcp, udp, icmp) = transport_markers(protocol, transport);

        Some(Self {
            source: IpAddr::V6(ipv6.get_source()),
            destination: IpAddr::V6(ipv6.get_destination()),
            protocol_number: protocol.0,
            tcp,
            udp,
            icmp,
            size,
        })
    }

    /// Pick the transport label. TCP wins over UDP, UDP over ICMP.
    pub fn classify(&self) -> Protocol {
        if self.tcp {
            Protocol::Tcp
        } else if self.udp {
            Protocol::Udp
        } else if self.icmp {
            Protocol::Icmp
        } else {
            Protocol::Other(self.protocol_number)
        }
    }

    /// Build the packet summary attributed to `session_id`.
    pub fn to_packet(&self, session_id: SessionId, observed_at: DateTime<Utc>) -> CapturedPacket {
        CapturedPacket {
            protocol: self.classify(),
            source: self.source,
            destination: self.destination,
            size_bytes: self.size,
            observed_at,
            session_id,
        }
    }
}

/// Follow the IPv6 extension header chain to the upper-layer protocol.
///
/// Returns the last next-header value and what follows it. A chain that
/// runs past the end of the frame leaves an empty transport slice.
fn skip_extension_headers(
    mut next_header: IpNextHeaderProtocol,
    data: &[u8],
) -> (IpNextHeaderProtocol, &[u8]) {
    let mut offset = 0;

    loop {
        let header_len = match next_header {
            IpNextHeaderProtocols::Hopopt
            | IpNextHeaderProtocols::Ipv6Route
            | IpNextHeaderProtocols::Ipv6Opts => {
                let Some(&[next, len]) = data.get(offset..offset + 2) else {
                    break;
                };
                next_header = IpNextHeaderProtocol(next);
                (len as usize + 1) * 8
            }
            IpNextHeaderProtocols::Ipv6Frag => {
                let Some(&next) = data.get(offset) else {
                    break;
                };
                next_header = IpNextHeaderProtocol(next);
                8
            }
            IpNextHeaderProtocols::Ah => {
                let Some(&[next, len]) = data.get(offset..offset + 2) else {
                    break;
                };
                next_header = IpNextHeaderProtocol(next);
                (len as usize + 2) * 4
            }
            // ESP hides everything after it; anything else is the transport
            _ => break,
        };
        offset += header_len;
    }

    (next_header, data.get(offset..).unwrap_or_default())
}

/// A transport marker is only set when its header actually parses.
fn transport_markers(protocol: IpNextHeaderProtocol, payload: &[u8]) -> (bool, bool, bool) {
    let tcp = protocol == IpNextHeaderProtocols::Tcp && TcpPacket::new(payload).is_some();
    let udp = protocol == IpNextHeaderProtocols::Udp && UdpPacket::new(payload).is_some();
    let icmp = (protocol == IpNextHeaderProtocols::Icmp && IcmpPacket::new(payload).is_some())
        || (protocol == IpNextHeaderProtocols::Icmpv6 && Icmpv6Packet::new(payload).is_some());
    (tcp, udp, icmp)
}
