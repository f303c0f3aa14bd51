//! Shared wire contract for the flowlat probe
//!
//! This crate pins the byte layout of the metadata records the traffic
//! classifier emits into the `EVENTS` perf array, plus the behavioral
//! constants both sides agree on. It is `no_std` so the classifier build
//! can depend on it as well.

#![no_std]

pub mod constants;
pub mod types;

// Re-export commonly used types
pub use constants::*;
pub use types::PacketRecord;
