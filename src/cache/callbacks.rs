/*!
The two pluggable-policy seams a cache level delegates to (spec.md §6
"Cache callbacks (external)"): replacement and prefetching. Both are
explicitly out of scope for the core (spec.md §1), so a [`CacheLevel`]
only needs trait objects here, not concrete policies.

Reference implementations behind the `reference_policies` feature exist
only so the integration tests have something concrete to drive; they are
not part of the core and are grounded directly in
`replacement/lru/lru.cc` and `prefetcher/ip_stride/ip_stride.cc`.

Design note: the source keeps per-cache policy state in a
process-wide `std::map<CACHE*, ...>` (spec.md §9 redesign note). Here each
policy owns its own state as a plain field, one instance per cache,
created at construction.
*/

use crate::packet::RequestType;

use super::block::CacheBlock;

/// A component a [`super::CacheLevel`] forwards `add_pq`/occupancy queries
/// to, so a prefetcher can issue prefetches without depending on the whole
/// cache type.
pub trait PrefetchIssuer {
    fn issue_prefetch(&mut self, address: u64, fill_level: u32) -> bool;
    fn mshr_occupancy(&self) -> usize;
    fn mshr_size(&self) -> usize;
}

pub trait ReplacementPolicy {
    fn initialize(&mut self, num_sets: usize, num_ways: usize);

    fn find_victim(
        &mut self,
        cpu: u8,
        instr_id: u64,
        set: usize,
        set_blocks: &[CacheBlock],
        ip: u64,
        address: u64,
        request_type: RequestType,
    ) -> usize;

    fn update_replacement_state(
        &mut self,
        cpu: u8,
        set: usize,
        way: usize,
        address: u64,
        ip: u64,
        victim_address: u64,
        request_type: RequestType,
        hit: bool,
        current_cycle: u64,
    );

    fn final_stats(&mut self) {}
}

pub trait Prefetcher {
    fn initialize(&mut self) {}

    fn cycle_operate(&mut self, issuer: &mut dyn PrefetchIssuer, log2_block_size: u32, log2_page_size: u32, virtual_prefetch: bool);

    fn cache_operate(&mut self, address: u64, ip: u64, cache_hit: bool, request_type: RequestType, metadata_in: u32, log2_block_size: u32) -> u32;

    fn cache_fill(&mut self, address: u64, set: usize, way: usize, prefetch: bool, evicted_address: u64, metadata_in: u32) -> u32 {
        let _ = (address, set, way, prefetch, evicted_address);
        metadata_in
    }

    fn final_stats(&mut self) {}
}

/// A no-op prefetcher, the default for any cache the host does not wire a
/// policy into.
#[derive(Debug, Default)]
pub struct NullPrefetcher;

impl Prefetcher for NullPrefetcher {
    fn cycle_operate(&mut self, _issuer: &mut dyn PrefetchIssuer, _log2_block_size: u32, _log2_page_size: u32, _virtual_prefetch: bool) {}
    fn cache_operate(&mut self, _address: u64, _ip: u64, _cache_hit: bool, _request_type: RequestType, metadata_in: u32, _log2_block_size: u32) -> u32 {
        metadata_in
    }
}

/// A replacement policy that always evicts way 0, the default for any
/// cache the host does not wire a policy into.
#[derive(Debug, Default)]
pub struct FirstWayReplacement;

impl ReplacementPolicy for FirstWayReplacement {
    fn initialize(&mut self, _num_sets: usize, _num_ways: usize) {}

    fn find_victim(&mut self, _cpu: u8, _instr_id: u64, _set: usize, _set_blocks: &[CacheBlock], _ip: u64, _address: u64, _request_type: RequestType) -> usize {
        0
    }

    fn update_replacement_state(
        &mut self,
        _cpu: u8,
        _set: usize,
        _way: usize,
        _address: u64,
        _ip: u64,
        _victim_address: u64,
        _request_type: RequestType,
        _hit: bool,
        _current_cycle: u64,
    ) {
    }
}

#[cfg(feature = "reference_policies")]
mod reference {
    use super::*;

    /// True-LRU by last-use cycle, grounded in `replacement/lru/lru.cc`.
    #[derive(Debug)]
    pub struct LruReplacement {
        last_used_cycle: Vec<u64>,
        num_ways: usize,
    }

    impl Default for LruReplacement {
        fn default() -> Self {
            Self { last_used_cycle: Vec::new(), num_ways: 0 }
        }
    }

    impl ReplacementPolicy for LruReplacement {
        fn initialize(&mut self, num_sets: usize, num_ways: usize) {
            self.last_used_cycle = vec![0; num_sets * num_ways];
            self.num_ways = num_ways;
        }

        fn find_victim(
            &mut self,
            _cpu: u8,
            _instr_id: u64,
            set: usize,
            _set_blocks: &[CacheBlock],
            _ip: u64,
            _address: u64,
            _request_type: RequestType,
        ) -> usize {
            let begin = set * self.num_ways;
            let end = begin + self.num_ways;
            self.last_used_cycle[begin..end]
                .iter()
                .enumerate()
                .min_by_key(|(_, &cycle)| cycle)
                .map(|(way, _)| way)
                .unwrap_or(0)
        }

        fn update_replacement_state(
            &mut self,
            _cpu: u8,
            set: usize,
            way: usize,
            _address: u64,
            _ip: u64,
            _victim_address: u64,
            request_type: RequestType,
            hit: bool,
            current_cycle: u64,
        ) {
            if !hit || request_type != RequestType::Writeback {
                self.last_used_cycle[set * self.num_ways + way] = current_cycle;
            }
        }
    }

    /// IP-indexed stride detector with a bounded lookahead run, grounded
    /// in `prefetcher/ip_stride/ip_stride.cc`.
    #[derive(Debug, Default)]
    pub struct IpStridePrefetcher {
        table: std::collections::HashMap<u64, TrackerEntry>,
        lookahead: Option<Lookahead>,
    }

    #[derive(Debug, Clone, Copy)]
    struct TrackerEntry {
        last_block_address: u64,
        last_stride: i64,
    }

    #[derive(Debug, Clone, Copy)]
    struct Lookahead {
        address: u64,
        stride: i64,
        degree: i32,
    }

    const PREFETCH_DEGREE: i32 = 3;

    impl Prefetcher for IpStridePrefetcher {
        fn cycle_operate(&mut self, issuer: &mut dyn PrefetchIssuer, log2_block_size: u32, log2_page_size: u32, virtual_prefetch: bool) {
            let Some(lookahead) = self.lookahead else { return };
            if lookahead.degree <= 0 {
                self.lookahead = None;
                return;
            }

            let pf_address = lookahead.address.wrapping_add((lookahead.stride << log2_block_size) as u64);
            let same_page = (pf_address >> log2_page_size) == (lookahead.address >> log2_page_size);
            if !(virtual_prefetch || same_page) {
                self.lookahead = None;
                return;
            }

            let fill_level = if issuer.mshr_occupancy() < issuer.mshr_size() / 2 { 0 } else { 1 };
            if issuer.issue_prefetch(pf_address, fill_level) {
                self.lookahead = Some(Lookahead { address: pf_address, stride: lookahead.stride, degree: lookahead.degree - 1 });
            }
        }

        fn cache_operate(&mut self, address: u64, ip: u64, _cache_hit: bool, _request_type: RequestType, metadata_in: u32, log2_block_size: u32) -> u32 {
            let block_address = address >> log2_block_size;
            let mut stride = 0i64;

            if let Some(found) = self.table.get(&ip) {
                stride = block_address as i64 - found.last_block_address as i64;
                if stride != 0 && stride == found.last_stride {
                    self.lookahead = Some(Lookahead { address: block_address << log2_block_size, stride, degree: PREFETCH_DEGREE });
                }
            }

            self.table.insert(ip, TrackerEntry { last_block_address: block_address, last_stride: stride });
            metadata_in
        }
    }
}

#[cfg(feature = "reference_policies")]
pub use reference::{IpStridePrefetcher, LruReplacement};
