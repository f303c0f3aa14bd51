//! flowlat userspace library
//!
//! Provides the components of the per-flow latency probe: record decoding,
//! flow correlation, classifier lifecycle management and the event pipeline.

pub mod engine;
pub mod events;
pub mod flowtable;
pub mod loader;
pub mod packet;
pub mod types;

pub use engine::observe;
pub use flowtable::FlowTable;
pub use loader::Probe;
pub use packet::{DecodeError, PacketMetadata};
pub use types::{FlowObservation, Protocol, UserFilter};
