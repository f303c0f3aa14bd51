//! Shared data structures between the classifier and userspace
//!
//! These structures must be repr(C) to ensure consistent memory layout
//! between the eBPF classifier and userspace code.

use crate::constants;

/// One packet-metadata record as emitted by the traffic classifier
///
/// Multi-byte integer fields keep the byte order the classifier wrote
/// them with: ports are big-endian (copied straight off the wire), the
/// timestamp is little-endian (written with `bpf_ktime_get_ns` in host
/// order). Userspace decodes through byte offsets rather than casting,
/// but this mirror pins the contract at compile time.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PacketRecord {
    /// Source address, 16-byte form (IPv4 arrives IPv4-mapped)
    pub src_addr: [u8; 16],
    /// Destination address, 16-byte form
    pub dst_addr: [u8; 16],
    /// Source port (network byte order)
    pub src_port: u16,
    /// Destination port (network byte order)
    pub dst_port: u16,
    /// IP protocol number
    pub protocol: u8,
    /// IP TTL / hop limit
    pub ttl: u8,
    /// TCP SYN flag (1 = set)
    pub syn: u8,
    /// TCP ACK flag (1 = set)
    pub ack: u8,
    /// Capture timestamp, nanoseconds since an arbitrary monotonic epoch
    pub timestamp: u64,
}

// Compile-time layout checks against the documented record offsets.
// These will fail to compile if the layout drifts from the classifier's.
const _: () = {
    assert!(core::mem::size_of::<PacketRecord>() == constants::RECORD_LEN);
    assert!(core::mem::offset_of!(PacketRecord, src_addr) == constants::SRC_ADDR_RANGE.start);
    assert!(core::mem::offset_of!(PacketRecord, dst_addr) == constants::DST_ADDR_RANGE.start);
    assert!(core::mem::offset_of!(PacketRecord, src_port) == constants::SRC_PORT_RANGE.start);
    assert!(core::mem::offset_of!(PacketRecord, dst_port) == constants::DST_PORT_RANGE.start);
    assert!(core::mem::offset_of!(PacketRecord, protocol) == constants::PROTOCOL_OFFSET);
    assert!(core::mem::offset_of!(PacketRecord, ttl) == constants::TTL_OFFSET);
    assert!(core::mem::offset_of!(PacketRecord, syn) == constants::SYN_OFFSET);
    assert!(core::mem::offset_of!(PacketRecord, ack) == constants::ACK_OFFSET);
    assert!(core::mem::offset_of!(PacketRecord, timestamp) == constants::TIMESTAMP_RANGE.start);
};

// Implement Aya's Pod trait for userspace usage
#[cfg(feature = "userspace")]
mod userspace_impls {
    use super::*;

    // Pod trait implementation for reading from perf buffers in userspace
    unsafe impl aya::Pod for PacketRecord {}
}
