//! Packet metadata decoding and flow identity
//!
//! Decodes the fixed-layout records the classifier emits and derives the
//! direction-symmetric 64-bit flow key used to correlate the outbound and
//! inbound legs of one flow.

use std::hash::Hasher;
use std::net::{IpAddr, Ipv6Addr};

use fnv::FnvHasher;
use thiserror::Error;

use flowlat_common::constants::{
    ACK_OFFSET, DST_ADDR_RANGE, DST_PORT_RANGE, PROTOCOL_OFFSET, RECORD_LEN, SRC_ADDR_RANGE,
    SRC_PORT_RANGE, SYN_OFFSET, TIMESTAMP_RANGE, TTL_OFFSET,
};

/// Reasons a raw record fails to decode
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record too short: {0} bytes, need {expected}", expected = RECORD_LEN)]
    ShortRecord(usize),
    #[error("address bytes are not a valid 128-bit address")]
    BadAddress,
}

/// Metadata of one captured packet, immutable after decode
///
/// Addresses are kept in their 16-byte form — exactly the bytes the flow
/// key is computed over. IPv4 addresses arrive IPv4-mapped; use
/// [`PacketMetadata::src_canonical`] / [`PacketMetadata::dst_canonical`]
/// for display or filter matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketMetadata {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub ttl: u8,
    pub syn: bool,
    pub ack: bool,
    /// Capture time in nanoseconds since an arbitrary monotonic epoch
    pub timestamp: u64,
}

fn address(bytes: &[u8]) -> Result<Ipv6Addr, DecodeError> {
    let octets: [u8; 16] = bytes.try_into().map_err(|_| DecodeError::BadAddress)?;
    Ok(Ipv6Addr::from(octets))
}

fn fnv64(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

impl PacketMetadata {
    /// Decode one raw record at the documented byte offsets
    ///
    /// Pure function, no side effects. Ports are big-endian (copied off
    /// the wire); the timestamp is little-endian because the classifier
    /// writes it in host byte order while the rest of the record is
    /// network order. That asymmetry is part of the contract.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < RECORD_LEN {
            return Err(DecodeError::ShortRecord(buf.len()));
        }

        let src = address(&buf[SRC_ADDR_RANGE])?;
        let dst = address(&buf[DST_ADDR_RANGE])?;

        let src_port = u16::from_be_bytes(buf[SRC_PORT_RANGE].try_into().unwrap());
        let dst_port = u16::from_be_bytes(buf[DST_PORT_RANGE].try_into().unwrap());
        let timestamp = u64::from_le_bytes(buf[TIMESTAMP_RANGE].try_into().unwrap());

        Ok(Self {
            src,
            dst,
            src_port,
            dst_port,
            protocol: buf[PROTOCOL_OFFSET],
            ttl: buf[TTL_OFFSET],
            syn: buf[SYN_OFFSET] == 1,
            ack: buf[ACK_OFFSET] == 1,
            timestamp,
        })
    }

    /// Direction-symmetric flow key over the 5-tuple
    ///
    /// Each component (source address+port, destination address+port,
    /// protocol) is hashed independently with 64-bit FNV-1a and the three
    /// results are summed with wraparound. Summing instead of hashing the
    /// concatenation is what makes the key symmetric: swapping source and
    /// destination yields the identical total, so both legs of one flow
    /// collide to the same key. Any change to this algorithm changes which
    /// packets count as the same flow.
    pub fn flow_hash(&self) -> u64 {
        let mut src = [0u8; 18];
        src[..16].copy_from_slice(&self.src.octets());
        src[16..].copy_from_slice(&self.src_port.to_be_bytes());

        let mut dst = [0u8; 18];
        dst[..16].copy_from_slice(&self.dst.octets());
        dst[16..].copy_from_slice(&self.dst_port.to_be_bytes());

        let protocol = (self.protocol as u16).to_be_bytes();

        fnv64(&src)
            .wrapping_add(fnv64(&dst))
            .wrapping_add(fnv64(&protocol))
    }

    /// Source address with any IPv4 mapping removed
    pub fn src_canonical(&self) -> IpAddr {
        IpAddr::V6(self.src).to_canonical()
    }

    /// Destination address with any IPv4 mapping removed
    pub fn dst_canonical(&self) -> IpAddr {
        IpAddr::V6(self.dst).to_canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn mapped(addr: Ipv4Addr) -> Ipv6Addr {
        addr.to_ipv6_mapped()
    }

    fn metadata(
        src: Ipv6Addr,
        src_port: u16,
        dst: Ipv6Addr,
        dst_port: u16,
        protocol: u8,
    ) -> PacketMetadata {
        PacketMetadata {
            src,
            dst,
            src_port,
            dst_port,
            protocol,
            ttl: 64,
            syn: false,
            ack: false,
            timestamp: 0,
        }
    }

    /// Build a well-formed raw record by filling the documented offsets
    fn record(
        src: Ipv6Addr,
        src_port: u16,
        dst: Ipv6Addr,
        dst_port: u16,
        protocol: u8,
        ttl: u8,
        syn: bool,
        ack: bool,
        timestamp: u64,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; RECORD_LEN];
        buf[SRC_ADDR_RANGE].copy_from_slice(&src.octets());
        buf[DST_ADDR_RANGE].copy_from_slice(&dst.octets());
        buf[SRC_PORT_RANGE].copy_from_slice(&src_port.to_be_bytes());
        buf[DST_PORT_RANGE].copy_from_slice(&dst_port.to_be_bytes());
        buf[PROTOCOL_OFFSET] = protocol;
        buf[TTL_OFFSET] = ttl;
        buf[SYN_OFFSET] = syn as u8;
        buf[ACK_OFFSET] = ack as u8;
        buf[TIMESTAMP_RANGE].copy_from_slice(&timestamp.to_le_bytes());
        buf
    }

    #[test]
    fn hash_is_symmetric_for_reversed_tuple() {
        let outgoing = metadata(
            mapped(Ipv4Addr::new(192, 168, 0, 156)),
            53264,
            mapped(Ipv4Addr::new(1, 1, 1, 1)),
            53,
            17,
        );
        let incoming = metadata(
            mapped(Ipv4Addr::new(1, 1, 1, 1)),
            53,
            mapped(Ipv4Addr::new(192, 168, 0, 156)),
            53264,
            17,
        );

        assert_eq!(outgoing.flow_hash(), incoming.flow_hash());
    }

    #[test]
    fn hash_is_symmetric_for_ipv6() {
        let a: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let b: Ipv6Addr = "2001:db8::2".parse().unwrap();

        let outgoing = metadata(a, 40000, b, 443, 6);
        let incoming = metadata(b, 443, a, 40000, 6);

        assert_eq!(outgoing.flow_hash(), incoming.flow_hash());
    }

    #[test]
    fn hash_differs_across_protocols() {
        let a = mapped(Ipv4Addr::new(10, 0, 0, 1));
        let b = mapped(Ipv4Addr::new(10, 0, 0, 2));

        let tcp = metadata(a, 1234, b, 80, 6);
        let udp = metadata(a, 1234, b, 80, 17);

        assert_ne!(tcp.flow_hash(), udp.flow_hash());
    }

    #[test]
    fn decode_recovers_every_field() {
        let src = mapped(Ipv4Addr::new(192, 168, 0, 156));
        let dst = mapped(Ipv4Addr::new(1, 1, 1, 1));
        let buf = record(src, 53264, dst, 53, 6, 58, true, false, 123_456_789_000);

        let pkt = PacketMetadata::decode(&buf).unwrap();

        assert_eq!(pkt.src, src);
        assert_eq!(pkt.dst, dst);
        assert_eq!(pkt.src_port, 53264);
        assert_eq!(pkt.dst_port, 53);
        assert_eq!(pkt.protocol, 6);
        assert_eq!(pkt.ttl, 58);
        assert!(pkt.syn);
        assert!(!pkt.ack);
        assert_eq!(pkt.timestamp, 123_456_789_000);
    }

    #[test]
    fn decode_accepts_trailing_bytes() {
        let src = mapped(Ipv4Addr::new(10, 0, 0, 1));
        let dst = mapped(Ipv4Addr::new(10, 0, 0, 2));
        let mut buf = record(src, 1, dst, 2, 17, 64, false, false, 42);
        buf.extend_from_slice(&[0u8; 16]); // perf pads events up

        let pkt = PacketMetadata::decode(&buf).unwrap();
        assert_eq!(pkt.timestamp, 42);
    }

    #[test]
    fn decode_rejects_short_record() {
        let buf = vec![0u8; RECORD_LEN - 1];
        assert_eq!(
            PacketMetadata::decode(&buf),
            Err(DecodeError::ShortRecord(RECORD_LEN - 1))
        );
    }

    #[test]
    fn address_rejects_truncated_slice() {
        assert_eq!(address(&[0u8; 15]), Err(DecodeError::BadAddress));
    }

    #[test]
    fn timestamp_is_little_endian() {
        let src = mapped(Ipv4Addr::new(10, 0, 0, 1));
        let dst = mapped(Ipv4Addr::new(10, 0, 0, 2));
        let mut buf = record(src, 1, dst, 2, 6, 64, false, false, 0);
        buf[TIMESTAMP_RANGE].copy_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0]);

        let pkt = PacketMetadata::decode(&buf).unwrap();
        assert_eq!(pkt.timestamp, 1);
    }

    #[test]
    fn ports_are_big_endian() {
        let src = mapped(Ipv4Addr::new(10, 0, 0, 1));
        let dst = mapped(Ipv4Addr::new(10, 0, 0, 2));
        let mut buf = record(src, 0, dst, 0, 6, 64, false, false, 0);
        buf[SRC_PORT_RANGE].copy_from_slice(&[0x01, 0x00]);

        let pkt = PacketMetadata::decode(&buf).unwrap();
        assert_eq!(pkt.src_port, 256);
    }

    #[test]
    fn record_struct_mirror_matches_decoder() {
        use flowlat_common::PacketRecord;

        let src = mapped(Ipv4Addr::new(192, 168, 0, 156));
        let dst = mapped(Ipv4Addr::new(1, 1, 1, 1));
        let record = PacketRecord {
            src_addr: src.octets(),
            dst_addr: dst.octets(),
            src_port: 53264u16.to_be(),
            dst_port: 53u16.to_be(),
            protocol: 17,
            ttl: 58,
            syn: 0,
            ack: 0,
            timestamp: 123_456_789u64.to_le(),
        };

        // the repr(C) mirror and the offset decoder must agree byte for byte
        let bytes: [u8; RECORD_LEN] = unsafe { core::mem::transmute(record) };
        let pkt = PacketMetadata::decode(&bytes).unwrap();

        assert_eq!(pkt.src, src);
        assert_eq!(pkt.dst, dst);
        assert_eq!(pkt.src_port, 53264);
        assert_eq!(pkt.dst_port, 53);
        assert_eq!(pkt.protocol, 17);
        assert_eq!(pkt.ttl, 58);
        assert_eq!(pkt.timestamp, 123_456_789);
    }

    #[test]
    fn canonical_unmaps_ipv4() {
        let pkt = metadata(
            mapped(Ipv4Addr::new(1, 1, 1, 1)),
            53,
            mapped(Ipv4Addr::new(192, 168, 0, 156)),
            53264,
            17,
        );

        assert_eq!(pkt.src_canonical(), IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)));
        assert_eq!(
            pkt.dst_canonical(),
            IpAddr::V4(Ipv4Addr::new(192, 168, 0, 156))
        );
    }
}
