//! Flow correlation engine
//!
//! Pure dispatch over the flow table: decides per packet whether it opens a
//! flow, completes one (yielding a latency observation), or is dropped.
//! Performs at most one table mutation per invocation and never blocks.

use crate::flowtable::FlowTable;
use crate::packet::PacketMetadata;
use crate::types::{FlowObservation, Protocol};

/// Feed one decoded packet through the correlation policy
///
/// Opening legs (TCP SYN, or the first UDP packet of a pair) are recorded
/// in the table. Completion legs (TCP ACK, or the second UDP packet for
/// the same key) emit an observation and clear the entry. Anything else —
/// unrecognized protocols, mid-stream TCP with no open flow, a TCP packet
/// that is neither a fresh SYN nor an ACK — is dropped silently; the flow,
/// if open, stays open until matched or pruned.
pub fn observe(pkt: &PacketMetadata, table: &FlowTable) -> Option<FlowObservation> {
    let protocol = Protocol::from_number(pkt.protocol)?;
    let key = pkt.flow_hash();

    let Some(opened_at) = table.get(key) else {
        if (protocol == Protocol::Tcp && pkt.syn) || protocol == Protocol::Udp {
            table.insert(key, pkt.timestamp);
        }
        return None;
    };

    let completing = (protocol == Protocol::Tcp && pkt.ack) || protocol == Protocol::Udp;
    if !completing {
        return None;
    }

    // Report the tuple in response direction: dst/src of the completion
    // leg swapped back.
    let observation = FlowObservation {
        protocol,
        src: pkt.dst_canonical(),
        src_port: pkt.dst_port,
        dst: pkt.src_canonical(),
        dst_port: pkt.src_port,
        ttl: pkt.ttl,
        latency_ms: (pkt.timestamp as f64 - opened_at as f64) / 1e6,
    };
    table.remove(key);

    Some(observation)
}
