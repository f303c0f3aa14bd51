//! Shared constants for the flowlat probe
//!
//! The record layout constants are bit-exact against the classifier's
//! `packet_t` struct and must not change independently of it.

// ============================================================================
// Record layout (byte offsets into one emitted record)
// ============================================================================

/// Fixed length of one metadata record
pub const RECORD_LEN: usize = 48;

/// Source address, 16-byte form (IPv4 arrives IPv4-mapped)
pub const SRC_ADDR_RANGE: core::ops::Range<usize> = 0..16;

/// Destination address, 16-byte form
pub const DST_ADDR_RANGE: core::ops::Range<usize> = 16..32;

/// Source port, big-endian
pub const SRC_PORT_RANGE: core::ops::Range<usize> = 32..34;

/// Destination port, big-endian
pub const DST_PORT_RANGE: core::ops::Range<usize> = 34..36;

/// IP protocol number
pub const PROTOCOL_OFFSET: usize = 36;

/// IP TTL / hop limit
pub const TTL_OFFSET: usize = 37;

/// TCP SYN flag (1 = set)
pub const SYN_OFFSET: usize = 38;

/// TCP ACK flag (1 = set)
pub const ACK_OFFSET: usize = 39;

/// Capture timestamp, little-endian nanoseconds since an arbitrary
/// monotonic epoch. The classifier writes it with `bpf_ktime_get_ns` in
/// host byte order while the rest of the record is network order.
pub const TIMESTAMP_RANGE: core::ops::Range<usize> = 40..48;

// ============================================================================
// Flow table behavior
// ============================================================================

/// Age after which an unmatched open flow is discarded
pub const FLOW_STALE_MS: u64 = 10_000;

/// Cadence of the staleness sweep, in seconds
pub const SWEEP_INTERVAL_SECS: u64 = 10;

// ============================================================================
// Object names inside the classifier ELF
// ============================================================================

/// Perf event array the classifier emits records into
pub const EVENTS_MAP: &str = "EVENTS";

/// Name of the tc classifier program
pub const CLASSIFIER_PROG: &str = "flowlat";
