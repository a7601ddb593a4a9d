/*!
Simulator configuration.

Purpose
- Every numeric constant spec.md leaves as "supplied at construction" or
  "configuration" lives here as a `SimConfig` field with the default the
  original simulator used, instead of being hardcoded as a `const`.
- Loading follows the layered shape `knhk-config` uses in this corpus:
  built-in defaults, optionally overridden by a TOML file via
  [`SimConfig::from_toml`].

Units
- All latencies that model real device timing (`DramTimingConfig`) are
  specified in nanoseconds and converted to channel cycles with
  [`DramTimingConfig::to_cycles`] at controller-construction time, per
  spec.md §4.2: `ceil(t_ns * io_freq_mhz / 1000)`.
- All other latencies (`HIT_LATENCY`, PTW per-level latency, cache fill
  latency) are already expressed in the clock cycles of the component
  that uses them.
*/

use serde::{Deserialize, Serialize};

fn default_block_size() -> usize {
    64
}
fn default_page_size() -> usize {
    4096
}
fn default_pte_bytes() -> usize {
    8
}
fn default_hit_latency() -> u64 {
    4
}
fn default_fill_latency() -> u64 {
    1
}
fn default_queue_size() -> usize {
    32
}
fn default_match_offset_bits() -> bool {
    true
}
fn default_num_sets() -> usize {
    64
}
fn default_num_ways() -> usize {
    8
}

/// Per-cache-level configuration: queue sizes, tag array geometry, and the
/// latencies a [`crate::queue::QueueTriplet`] and [`crate::cache::CacheLevel`]
/// need to compute `event_cycle`s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    pub name: String,
    #[serde(default = "default_num_sets")]
    pub num_sets: usize,
    #[serde(default = "default_num_ways")]
    pub num_ways: usize,
    #[serde(default = "default_queue_size")]
    pub rq_size: usize,
    #[serde(default = "default_queue_size")]
    pub wq_size: usize,
    #[serde(default = "default_queue_size")]
    pub pq_size: usize,
    #[serde(default)]
    pub mshr_size: usize,
    #[serde(default = "default_hit_latency")]
    pub hit_latency: u64,
    #[serde(default = "default_fill_latency")]
    pub fill_latency: u64,
    /// Whether write coalescing/forwarding matches on the full block-offset
    /// (true) or ignores even that (zero shift bits), per spec.md §4.1.
    #[serde(default = "default_match_offset_bits")]
    pub match_offset_bits: bool,
    /// Whether this cache level issues translation requests to the PTW
    /// (i.e. backs a [`crate::queue::Translating`] queue triplet).
    #[serde(default)]
    pub translating: bool,
    /// The `fill_level` identifier this cache reports to upstream packets,
    /// used by the PTW to stamp `fwd_pkt.fill_level` on translation reads.
    #[serde(default)]
    pub fill_level: u32,
    /// Per-cycle tag-array port budgets, one per operate sub-phase
    /// (spec.md §4.4 cache operate order).
    #[serde(default = "default_max_port")]
    pub max_fill: usize,
    #[serde(default = "default_max_port")]
    pub max_read: usize,
    #[serde(default = "default_max_port")]
    pub max_writeback: usize,
    #[serde(default = "default_max_port")]
    pub max_prefetch: usize,
    /// Whether prefetch requests are generated against virtual addresses
    /// (skipping the page-crossing lookahead check).
    #[serde(default)]
    pub virtual_prefetch: bool,
}

fn default_max_port() -> usize {
    1
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "L1D".to_string(),
            num_sets: default_num_sets(),
            num_ways: default_num_ways(),
            rq_size: default_queue_size(),
            wq_size: default_queue_size(),
            pq_size: default_queue_size(),
            mshr_size: 16,
            hit_latency: default_hit_latency(),
            fill_latency: default_fill_latency(),
            match_offset_bits: default_match_offset_bits(),
            translating: false,
            fill_level: 0,
            max_fill: default_max_port(),
            max_read: default_max_port(),
            max_writeback: default_max_port(),
            max_prefetch: default_max_port(),
            virtual_prefetch: false,
        }
    }
}

fn default_channels() -> usize {
    1
}
fn default_ranks() -> usize {
    1
}
fn default_banks() -> usize {
    8
}
fn default_rows() -> usize {
    65536
}
fn default_columns() -> usize {
    128
}
fn default_channel_width() -> usize {
    8
}
fn default_dram_queue_size() -> usize {
    64
}
fn default_io_freq_mhz() -> u64 {
    3200
}
fn default_t_rp_ns() -> f64 {
    12.5
}
fn default_t_rcd_ns() -> f64 {
    12.5
}
fn default_t_cas_ns() -> f64 {
    12.5
}
fn default_turnaround_ns() -> f64 {
    7.5
}

/// DRAM geometry and device timings, converted to channel cycles at
/// [`crate::dram::DramController`] construction. Mirrors
/// `original_source/inc/dram_controller.h`'s `MEMORY_CONTROLLER` constructor
/// parameters (`freq_scale, io_freq, t_rp, t_rcd, t_cas, turnaround`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DramTimingConfig {
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_ranks")]
    pub ranks: usize,
    #[serde(default = "default_banks")]
    pub banks: usize,
    #[serde(default = "default_rows")]
    pub rows: usize,
    #[serde(default = "default_columns")]
    pub columns: usize,
    /// Data bus width per channel, in bytes.
    #[serde(default = "default_channel_width")]
    pub channel_width_bytes: usize,
    #[serde(default = "default_dram_queue_size")]
    pub wq_size: usize,
    #[serde(default = "default_dram_queue_size")]
    pub rq_size: usize,
    #[serde(default = "default_io_freq_mhz")]
    pub io_freq_mhz: u64,
    #[serde(default = "default_t_rp_ns")]
    pub t_rp_ns: f64,
    #[serde(default = "default_t_rcd_ns")]
    pub t_rcd_ns: f64,
    #[serde(default = "default_t_cas_ns")]
    pub t_cas_ns: f64,
    #[serde(default = "default_turnaround_ns")]
    pub turnaround_ns: f64,
}

impl Default for DramTimingConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            ranks: default_ranks(),
            banks: default_banks(),
            rows: default_rows(),
            columns: default_columns(),
            channel_width_bytes: default_channel_width(),
            wq_size: default_dram_queue_size(),
            rq_size: default_dram_queue_size(),
            io_freq_mhz: default_io_freq_mhz(),
            t_rp_ns: default_t_rp_ns(),
            t_rcd_ns: default_t_rcd_ns(),
            t_cas_ns: default_t_cas_ns(),
            turnaround_ns: default_turnaround_ns(),
        }
    }
}

impl DramTimingConfig {
    /// Convert a nanosecond timing to channel cycles: `ceil(t_ns * io_freq_mhz / 1000)`.
    pub fn ns_to_cycles(&self, t_ns: f64) -> u64 {
        (t_ns * self.io_freq_mhz as f64 / 1000.0).ceil() as u64
    }
}

fn default_mshr_size() -> usize {
    16
}
fn default_max_read() -> usize {
    1
}
fn default_max_fill() -> usize {
    1
}
fn default_levels() -> usize {
    4
}
fn default_walk_latency() -> u64 {
    50
}
fn default_pscl_sets() -> usize {
    1
}
fn default_pscl_ways() -> usize {
    4
}

/// Page-table walker configuration: levels, MSHR/RQ bounds, PSCL geometry
/// per non-leaf level, and the simulated per-level walk latency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PtwConfig {
    #[serde(default = "default_levels")]
    pub levels: usize,
    #[serde(default = "default_mshr_size")]
    pub mshr_size: usize,
    #[serde(default = "default_queue_size")]
    pub rq_size: usize,
    #[serde(default = "default_max_read")]
    pub max_read: usize,
    #[serde(default = "default_max_fill")]
    pub max_fill: usize,
    #[serde(default = "default_walk_latency")]
    pub walk_latency: u64,
    /// One entry per page-structure cache level (levels - 1 of them: every
    /// level except the leaf page table).
    #[serde(default = "default_pscl_geometry")]
    pub pscl_geometry: Vec<(usize, usize)>,
}

fn default_pscl_geometry() -> Vec<(usize, usize)> {
    vec![(default_pscl_sets(), default_pscl_ways()); default_levels() - 1]
}

impl Default for PtwConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            mshr_size: default_mshr_size(),
            rq_size: default_queue_size(),
            max_read: default_max_read(),
            max_fill: default_max_fill(),
            walk_latency: default_walk_latency(),
            pscl_geometry: default_pscl_geometry(),
        }
    }
}

/// Frequency-scaling configuration for the clocked orchestrator: each
/// component's `freq_scale` relative to the global clock, per spec.md §4.4
/// (`local_rate = global_rate / freq_scale`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClockConfig {
    #[serde(default = "default_freq_scale")]
    pub default_freq_scale: f64,
}

fn default_freq_scale() -> f64 {
    1.0
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            default_freq_scale: default_freq_scale(),
        }
    }
}

/// Top-level simulator configuration root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_pte_bytes")]
    pub pte_bytes: usize,
    #[serde(default)]
    pub caches: Vec<CacheConfig>,
    #[serde(default)]
    pub dram: DramTimingConfig,
    #[serde(default)]
    pub ptw: PtwConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    /// Number of cycles a packet may go without forward progress before the
    /// deadlock detector dumps queue/MSHR contents (spec.md §5).
    #[serde(default = "default_deadlock_cycles")]
    pub deadlock_cycles: u64,
}

fn default_deadlock_cycles() -> u64 {
    1_000_000
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            page_size: default_page_size(),
            pte_bytes: default_pte_bytes(),
            caches: Vec::new(),
            dram: DramTimingConfig::default(),
            ptw: PtwConfig::default(),
            clock: ClockConfig::default(),
            deadlock_cycles: default_deadlock_cycles(),
        }
    }
}

impl SimConfig {
    /// Load configuration from a TOML document, falling back to
    /// [`SimConfig::default`] for any field the document omits.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn log2_block_size(&self) -> u32 {
        self.block_size.trailing_zeros()
    }

    pub fn log2_page_size(&self) -> u32 {
        self.page_size.trailing_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = SimConfig::default();
        let text = toml::to_string(&cfg).expect("serialize");
        let parsed = SimConfig::from_toml(&text).expect("parse");
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg = SimConfig::from_toml("block_size = 128\n").expect("parse");
        assert_eq!(cfg.block_size, 128);
        assert_eq!(cfg.page_size, default_page_size());
        assert_eq!(cfg.dram.banks, default_banks());
    }

    #[test]
    fn ns_to_cycles_matches_spec_formula() {
        let dram = DramTimingConfig {
            io_freq_mhz: 3200,
            ..Default::default()
        };
        // ceil(12.5 * 3200 / 1000) == ceil(40.0) == 40
        assert_eq!(dram.ns_to_cycles(12.5), 40);
        // ceil(7.5 * 3200 / 1000) == ceil(24.0) == 24
        assert_eq!(dram.ns_to_cycles(7.5), 24);
    }
}
