/*!
Per-phase / region-of-interest statistics snapshots (spec.md §6 "Stats
output").

Each component owns one of these structs and increments its counters as it
runs; formatting them for human consumption is explicitly out of scope
(spec.md §1) and left to a host report. `serde` derives here let a host
serialize a snapshot (to JSON, TOML, whatever) without this crate picking
a report format.
*/

use serde::{Deserialize, Serialize};

/// Counters kept by a [`crate::queue::QueueTriplet`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub wq_access: u64,
    pub wq_merged: u64,
    pub wq_full: u64,
    pub wq_to_cache: u64,
    pub wq_forward: u64,
    pub rq_access: u64,
    pub rq_merged: u64,
    pub rq_full: u64,
    pub rq_to_cache: u64,
    pub pq_access: u64,
    pub pq_merged: u64,
    pub pq_full: u64,
    pub pq_to_cache: u64,
}

/// Counters kept by a [`crate::dram::channel::DramChannel`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DramChannelStats {
    pub dbus_cycle_congested: u64,
    pub dbus_count_congested: u64,
    pub wq_row_buffer_hit: u64,
    pub wq_row_buffer_miss: u64,
    pub rq_row_buffer_hit: u64,
    pub rq_row_buffer_miss: u64,
    pub wq_full: u64,
}

impl DramChannelStats {
    pub fn average_congested_cycles(&self) -> Option<f64> {
        if self.dbus_count_congested == 0 {
            None
        } else {
            Some(self.dbus_cycle_congested as f64 / self.dbus_count_congested as f64)
        }
    }
}

/// Counters kept by a [`crate::cache::CacheLevel`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub prefetch_hits: u64,
    pub prefetch_issued: u64,
    pub writebacks: u64,
    pub evictions: u64,
    pub total_miss_latency: u64,
}

impl CacheStats {
    pub fn average_miss_latency(&self) -> Option<f64> {
        if self.misses == 0 {
            None
        } else {
            Some(self.total_miss_latency as f64 / self.misses as f64)
        }
    }
}

/// Counters kept by the [`crate::ptw::PageTableWalker`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PtwStats {
    pub walks_started: u64,
    pub reads_issued: u64,
    pub fills_completed: u64,
    pub total_miss_latency: u64,
}

impl PtwStats {
    pub fn average_miss_latency(&self) -> Option<f64> {
        if self.fills_completed == 0 {
            None
        } else {
            Some(self.total_miss_latency as f64 / self.fills_completed as f64)
        }
    }
}
