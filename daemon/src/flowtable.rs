//! Flow table
//!
//! Concurrency-safe map from flow key to first-seen timestamp. Entries are
//! created for opening legs, consumed by completion legs and swept out by
//! the periodic prune when they never complete.

use dashmap::DashMap;
use log::debug;
use nix::time::{clock_gettime, ClockId};

use flowlat_common::constants::FLOW_STALE_MS;

/// Nanoseconds since boot on the monotonic clock
///
/// Same epoch as the classifier's `bpf_ktime_get_ns`, so stored capture
/// timestamps are directly comparable.
pub fn monotonic_now() -> u64 {
    // CLOCK_MONOTONIC cannot fail with a valid clock id
    clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map(|ts| ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64)
        .unwrap_or(0)
}

/// Open flows pending their completion leg
///
/// All operations are safe to call concurrently, including with the sweep.
/// The table owns entry lifetime exclusively; callers only request
/// insert/get/remove. There is no size bound other than the staleness
/// sweep.
#[derive(Default)]
pub struct FlowTable {
    flows: DashMap<u64, u64>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the opening leg of a flow (unconditional upsert)
    pub fn insert(&self, hash: u64, timestamp: u64) {
        self.flows.insert(hash, timestamp);
    }

    /// First-seen timestamp for a flow, if the flow is open
    pub fn get(&self, hash: u64) -> Option<u64> {
        self.flows.get(&hash).map(|ts| *ts)
    }

    /// Drop a completed flow; absent keys are a no-op
    pub fn remove(&self, hash: u64) {
        if self.flows.remove(&hash).is_none() {
            debug!("hash {hash} is not in flow table");
        }
    }

    /// Sweep out entries older than the staleness threshold
    pub fn prune(&self) {
        self.prune_at(monotonic_now());
    }

    /// Sweep with an explicit notion of now, in nanoseconds
    pub fn prune_at(&self, now: u64) {
        self.flows.retain(|hash, timestamp| {
            let stale = now.saturating_sub(*timestamp) / 1_000_000 > FLOW_STALE_MS;
            if stale {
                debug!("pruning stale entry from flow table: {hash}");
            }
            !stale
        });
    }

    /// Snapshot count, for diagnostics only
    ///
    /// Not guaranteed consistent with concurrent mutation.
    pub fn entries(&self) -> usize {
        self.flows.len()
    }
}
