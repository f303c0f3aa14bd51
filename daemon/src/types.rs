//! Userspace-only types
//!
//! The operator-facing pieces that sit around the correlation core: the
//! recognized transport protocols, the optional observation filter and the
//! emitted per-flow observation.

use std::fmt;
use std::net::IpAddr;

use crate::packet::PacketMetadata;

/// Transport protocols the correlation engine recognizes
///
/// Anything else coming out of the classifier is dropped silently; non
/// TCP/UDP traffic is an expected case, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Map an IP protocol number to a recognized protocol
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            6 => Some(Protocol::Tcp),
            17 => Some(Protocol::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Optional restriction on which flows are observed
///
/// With neither field set every flow passes. A set address matches when it
/// equals the packet's source or destination; a set port when it equals the
/// source or destination port. When both are set, both must match.
#[derive(Clone, Copy, Debug, Default)]
pub struct UserFilter {
    addr: Option<IpAddr>,
    port: Option<u16>,
}

impl UserFilter {
    pub fn new(addr: Option<IpAddr>, port: Option<u16>) -> Self {
        // Normalize a mapped form like ::ffff:1.1.1.1 so it compares equal
        // to the canonical form of captured addresses
        Self {
            addr: addr.map(|a| a.to_canonical()),
            port,
        }
    }

    pub fn addr(&self) -> Option<IpAddr> {
        self.addr
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Whether the packet passes the filter
    pub fn matches(&self, pkt: &PacketMetadata) -> bool {
        let addr_ok = match self.addr {
            None => true,
            Some(addr) => pkt.src_canonical() == addr || pkt.dst_canonical() == addr,
        };
        let port_ok = match self.port {
            None => true,
            Some(port) => pkt.src_port == port || pkt.dst_port == port,
        };
        addr_ok && port_ok
    }
}

/// One completed flow: a single latency sample
///
/// The 4-tuple is reported in response direction: the completion leg's
/// dst/src, swapped back.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowObservation {
    pub protocol: Protocol,
    pub src: IpAddr,
    pub src_port: u16,
    pub dst: IpAddr,
    pub dst_port: u16,
    pub ttl: u8,
    pub latency_ms: f64,
}

impl fmt::Display for FlowObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}) flow | src: {}:{} | dst: {}:{} | TTL: {} | latency: {:.3} ms",
            self.protocol, self.src, self.src_port, self.dst, self.dst_port, self.ttl, self.latency_ms
        )
    }
}
