/*!
A cache level: tag array, MSHR, fill pipeline, and replacement/prefetch
callbacks (spec.md §4.1 "Cache level" in §2's component table, operate
order from §4.4).

`original_source/` does not include ChampSim's own `cache.cc` (only the
queue-triplet excerpt in `cache_queues.cc`), so the tag-array/MSHR
mechanics here are original to this crate, built to the operate order and
data model spec.md §3/§4.4 specify, with the replacement and prefetch seams
grounded in `replacement/lru/lru.cc` and `prefetcher/ip_stride/ip_stride.cc`
via [`callbacks`].
*/

pub mod block;
pub mod callbacks;
pub mod mshr;

use std::cell::RefCell;
use std::rc::Weak;

use log::trace;

use crate::clock::Operable;
use crate::config::CacheConfig;
use crate::packet::{MemoryRequestConsumer, Packet, QueueKind, RequestType};
use crate::queue::QueueTriplet;
use crate::stats::CacheStats;

use block::CacheBlock;
use callbacks::{FirstWayReplacement, NullPrefetcher, PrefetchIssuer, Prefetcher, ReplacementPolicy};
use mshr::Mshr;

pub struct CacheLevel {
    name: String,
    num_sets: usize,
    num_ways: usize,
    log2_block_size: u32,
    log2_page_size: u32,
    fill_level: u32,
    tags: Vec<CacheBlock>,
    mshr: Mshr,
    pub queues: QueueTriplet,
    lower_level: Weak<RefCell<dyn MemoryRequestConsumer>>,
    ptw: Option<Weak<RefCell<dyn MemoryRequestConsumer>>>,
    self_sink: Weak<RefCell<dyn MemoryRequestConsumer>>,
    replacement: Box<dyn ReplacementPolicy>,
    prefetcher: Box<dyn Prefetcher>,
    max_fill: usize,
    max_read: usize,
    max_writeback: usize,
    max_prefetch: usize,
    virtual_prefetch: bool,
    hit_latency: u64,
    pub warmup: bool,
    current_cycle: u64,
    pub stats: CacheStats,
}

impl CacheLevel {
    pub fn new(
        config: &CacheConfig,
        log2_block_size: u32,
        log2_page_size: u32,
        lower_level: Weak<RefCell<dyn MemoryRequestConsumer>>,
        ptw: Option<Weak<RefCell<dyn MemoryRequestConsumer>>>,
        self_sink: Weak<RefCell<dyn MemoryRequestConsumer>>,
    ) -> Self {
        let mut replacement: Box<dyn ReplacementPolicy> = Box::new(FirstWayReplacement);
        replacement.initialize(config.num_sets, config.num_ways);

        Self {
            name: config.name.clone(),
            num_sets: config.num_sets,
            num_ways: config.num_ways,
            log2_block_size,
            log2_page_size,
            fill_level: config.fill_level,
            tags: vec![CacheBlock::empty(); config.num_sets * config.num_ways],
            mshr: Mshr::new(config.mshr_size, log2_block_size),
            queues: QueueTriplet::new(config, log2_block_size, log2_page_size),
            lower_level,
            ptw,
            self_sink,
            replacement,
            prefetcher: Box::new(NullPrefetcher),
            max_fill: config.max_fill,
            max_read: config.max_read,
            max_writeback: config.max_writeback,
            max_prefetch: config.max_prefetch,
            virtual_prefetch: config.virtual_prefetch,
            hit_latency: config.hit_latency,
            warmup: true,
            current_cycle: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn set_replacement(&mut self, policy: Box<dyn ReplacementPolicy>) {
        let mut policy = policy;
        policy.initialize(self.num_sets, self.num_ways);
        self.replacement = policy;
    }

    pub fn set_prefetcher(&mut self, prefetcher: Box<dyn Prefetcher>) {
        self.prefetcher = prefetcher;
    }

    fn set_index(&self, block_address: u64) -> usize {
        (block_address as usize) % self.num_sets
    }

    fn set_slice(&self, set: usize) -> &[CacheBlock] {
        let base = set * self.num_ways;
        &self.tags[base..base + self.num_ways]
    }

    fn find_hit(&self, address: u64) -> Option<usize> {
        let block_address = address >> self.log2_block_size;
        let set = self.set_index(block_address);
        let base = set * self.num_ways;
        (base..base + self.num_ways).find(|&i| self.tags[i].valid && self.tags[i].address == block_address)
    }

    /// spec.md §4.4 cache operate order, step 1: process ready MSHR
    /// entries, installing their block and waking every waiter.
    fn handle_fill(&mut self) {
        let mut budget = self.max_fill;
        while budget > 0 {
            let Some(block_address) = self.mshr.ready_front(self.current_cycle).map(|p| p.block_address(self.log2_block_size)) else {
                break;
            };
            let Some(packet) = self.mshr.remove_block(block_address) else { break };

            let set = self.set_index(block_address);
            let base = set * self.num_ways;
            let set_blocks = self.set_slice(set).to_vec();
            let way = self.replacement.find_victim(
                packet.cpu,
                packet.instr_id,
                set,
                &set_blocks,
                0,
                packet.address,
                packet.request_type,
            );
            let way = way.min(self.num_ways - 1);
            let victim = self.tags[base + way];

            if victim.valid && victim.dirty {
                self.evict_dirty(&victim);
            }
            self.stats.evictions += victim.valid as u64;

            self.tags[base + way] = CacheBlock {
                valid: true,
                address: block_address,
                dirty: packet.request_type == RequestType::Rfo,
                cpu: packet.cpu,
                prefetch: packet.request_type == RequestType::Prefetch,
            };

            self.prefetcher.cache_fill(packet.address, set, way, packet.request_type == RequestType::Prefetch, victim.address << self.log2_block_size, 0);
            self.replacement.update_replacement_state(
                packet.cpu,
                set,
                way,
                packet.address,
                0,
                victim.address << self.log2_block_size,
                packet.request_type,
                false,
                self.current_cycle,
            );

            self.stats.misses += 1;
            self.stats.total_miss_latency += self.current_cycle.saturating_sub(packet.cycle_enqueued);
            packet.notify_return_sinks();

            trace!("[{}] fill instr_id={} block={:#x} way={}", self.name, packet.instr_id, block_address, way);
            budget -= 1;
        }
    }

    fn evict_dirty(&mut self, victim: &CacheBlock) {
        let Some(lower) = self.lower_level.upgrade() else { return };
        let writeback = Packet::new(victim.address << self.log2_block_size, RequestType::Writeback, victim.cpu, 0);
        lower.borrow_mut().add_wq(writeback);
        self.stats.writebacks += 1;
    }

    /// spec.md §4.4 cache operate order, step 2: admit ready WQ entries.
    fn handle_writeback(&mut self) {
        let mut budget = self.max_writeback;
        while budget > 0 && self.queues.wq_has_ready(self.current_cycle) {
            let Some(packet) = self.queues.pop_wq_front() else { break };
            match self.find_hit(packet.address) {
                Some(idx) => {
                    self.tags[idx].dirty = true;
                    self.stats.hits += 1;
                    packet.notify_return_sinks();
                }
                None => {
                    if let Some(lower) = self.lower_level.upgrade() {
                        if !lower.borrow_mut().add_wq(packet.clone()) {
                            self.queues.wq.insert(0, packet);
                            break;
                        }
                    }
                }
            }
            budget -= 1;
        }
    }

    /// A block miss already tracked by the MSHR just merges in (the
    /// downstream read for it is already in flight); a fresh miss needs a
    /// new MSHR entry and a downstream read, admitted together so a
    /// downstream rejection leaves no orphaned entry behind.
    fn forward_miss(&mut self, packet: Packet) -> bool {
        let block_address = packet.block_address(self.log2_block_size);
        if self.mshr.contains(block_address) {
            return self.mshr.allocate(packet);
        }
        if self.mshr.len() >= self.mshr.size() {
            return false;
        }
        let Some(lower) = self.lower_level.upgrade() else { return false };
        let mut fwd = packet.clone();
        fwd.to_return.clear();
        fwd.to_return.push(self.self_sink.clone());
        fwd.fill_level = self.fill_level;
        if lower.borrow_mut().add_rq(fwd) {
            self.mshr.allocate(packet)
        } else {
            false
        }
    }

    /// spec.md §4.4 cache operate order, step 3: admit ready RQ entries.
    fn handle_read(&mut self) {
        let mut budget = self.max_read;
        while budget > 0 && self.queues.rq_has_ready(self.current_cycle) {
            let Some(packet) = self.queues.pop_rq_front() else { break };
            let hit_idx = self.find_hit(packet.address);
            let _metadata = self.prefetcher.cache_operate(packet.address, 0, hit_idx.is_some(), packet.request_type, 0, self.log2_block_size);

            match hit_idx {
                Some(idx) => {
                    let set = idx / self.num_ways;
                    let way = idx % self.num_ways;
                    self.replacement.update_replacement_state(
                        packet.cpu,
                        set,
                        way,
                        packet.address,
                        0,
                        0,
                        packet.request_type,
                        true,
                        self.current_cycle,
                    );
                    self.stats.hits += 1;
                    if self.tags[idx].prefetch {
                        self.stats.prefetch_hits += 1;
                        self.tags[idx].prefetch = false;
                    }
                    packet.notify_return_sinks();
                }
                None => {
                    if !self.forward_miss(packet.clone()) {
                        self.queues.rq.insert(0, packet);
                        break;
                    }
                }
            }
            budget -= 1;
        }
    }

    /// spec.md §4.4 cache operate order, step 4: admit ready PQ entries.
    fn handle_prefetch(&mut self) {
        let mut budget = self.max_prefetch;
        while budget > 0 && self.queues.pq_has_ready(self.current_cycle) {
            let Some(packet) = self.queues.pop_pq_front() else { break };
            if self.find_hit(packet.address).is_none() {
                if !self.forward_miss(packet.clone()) {
                    self.queues.pq.insert(0, packet);
                    break;
                }
                self.stats.prefetch_issued += 1;
            }
            budget -= 1;
        }

        self.prefetcher_cycle_operate_shim();
    }

    /// Full per-cycle operate order (spec.md §4.4 "Cache"): handle_fill →
    /// handle_writeback → handle_read → handle_prefetch → queues.operate().
    pub fn operate(&mut self, current_cycle: u64) {
        self.current_cycle = current_cycle;
        self.handle_fill();
        self.handle_writeback();
        self.handle_read();
        self.handle_prefetch();
        self.queues.operate(current_cycle, self.ptw.as_ref(), Some(&self.self_sink));
    }

    fn prefetcher_cycle_operate_shim(&mut self) {
        let virtual_prefetch = self.virtual_prefetch;
        let log2_block_size = self.log2_block_size;
        let log2_page_size = self.log2_page_size;
        let mshr_occupancy = self.mshr.len();
        let mshr_size = self.mshr.size();
        let mut issuer = DirectIssuer {
            pq: &mut self.queues.pq,
            pq_size: self.queues.pq_size,
            current_cycle: self.current_cycle,
            mshr_occupancy,
            mshr_size,
        };
        self.prefetcher.cycle_operate(&mut issuer, log2_block_size, log2_page_size, virtual_prefetch);
    }
}

struct DirectIssuer<'a> {
    pq: &'a mut Vec<Packet>,
    pq_size: usize,
    current_cycle: u64,
    mshr_occupancy: usize,
    mshr_size: usize,
}

impl<'a> PrefetchIssuer for DirectIssuer<'a> {
    fn issue_prefetch(&mut self, address: u64, fill_level: u32) -> bool {
        if self.pq.len() >= self.pq_size {
            return false;
        }
        let mut packet = Packet::new(address, RequestType::Prefetch, 0, 0);
        packet.fill_level = fill_level;
        packet.event_cycle = self.current_cycle;
        self.pq.push(packet);
        true
    }

    fn mshr_occupancy(&self) -> usize {
        self.mshr_occupancy
    }

    fn mshr_size(&self) -> usize {
        self.mshr_size
    }
}

impl MemoryRequestConsumer for CacheLevel {
    fn add_rq(&mut self, packet: Packet) -> bool {
        self.queues.add_rq(packet, self.current_cycle, self.hit_latency, !self.warmup)
    }
    fn add_wq(&mut self, packet: Packet) -> bool {
        self.queues.add_wq(packet, self.current_cycle, self.hit_latency, !self.warmup)
    }
    fn add_pq(&mut self, packet: Packet) -> bool {
        self.queues.add_pq(packet, self.current_cycle, self.hit_latency, !self.warmup)
    }

    /// A downstream completion (a DRAM read, a lower cache's fill, or a
    /// translation return) marks the waiting MSHR entry ready.
    fn return_data(&mut self, packet: &Packet) {
        self.mshr.mark_ready(packet.block_address(self.log2_block_size), self.current_cycle);
    }

    fn get_occupancy(&self, kind: QueueKind, _address: u64) -> usize {
        match kind {
            QueueKind::Mshr => self.mshr.len(),
            QueueKind::Rq => self.queues.rq.len(),
            QueueKind::Wq => self.queues.wq.len(),
            QueueKind::Pq => self.queues.pq.len(),
        }
    }

    fn get_size(&self, kind: QueueKind, _address: u64) -> usize {
        match kind {
            QueueKind::Mshr => self.mshr.size(),
            QueueKind::Rq => self.queues.rq_size,
            QueueKind::Wq => self.queues.wq_size,
            QueueKind::Pq => self.queues.pq_size,
        }
    }
}

impl Operable for CacheLevel {
    fn operate(&mut self, local_cycle: u64) {
        CacheLevel::operate(self, local_cycle);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Sink;
    impl MemoryRequestConsumer for Sink {
        fn add_rq(&mut self, _p: Packet) -> bool {
            true
        }
        fn add_wq(&mut self, _p: Packet) -> bool {
            true
        }
        fn add_pq(&mut self, _p: Packet) -> bool {
            true
        }
        fn return_data(&mut self, _packet: &Packet) {}
        fn get_occupancy(&self, _k: QueueKind, _a: u64) -> usize {
            0
        }
        fn get_size(&self, _k: QueueKind, _a: u64) -> usize {
            0
        }
    }

    fn make_cache() -> Rc<RefCell<CacheLevel>> {
        let sink = Rc::new(RefCell::new(Sink));
        let config = CacheConfig {
            name: "L1D".into(),
            num_sets: 4,
            num_ways: 2,
            mshr_size: 4,
            ..Default::default()
        };
        Rc::new_cyclic(|weak_self| {
            RefCell::new(CacheLevel::new(
                &config,
                6,
                12,
                crate::queue::weak_sink(&sink),
                None,
                weak_self.clone() as Weak<RefCell<dyn MemoryRequestConsumer>>,
            ))
        })
    }

    #[test]
    fn miss_then_fill_completes_the_request() {
        let cache = make_cache();
        cache.borrow_mut().warmup = false;

        let packet = Packet::new(0x1000, RequestType::Load, 0, 1);
        assert!(cache.borrow_mut().add_rq(packet));

        for cycle in 0..8 {
            cache.borrow_mut().operate(cycle);
        }
        assert_eq!(cache.borrow().stats.hits + cache.borrow().stats.misses, 0);

        cache.borrow_mut().return_data(&Packet::new(0x1000, RequestType::Load, 0, 1));
        for cycle in 8..16 {
            cache.borrow_mut().operate(cycle);
        }
        assert_eq!(cache.borrow().stats.misses, 1);
    }
}
