/*!
The multi-level page-table walker (spec.md §4.3), grounded in
`original_source/src/ptw.cc`'s `PageTableWalker`.

Every PTW owns an ordered list of [`pscl::PageStructureCache`]s (one per
non-leaf level) and an MSHR of in-flight translations. Its input RQ is a
simple delay queue (not a [`crate::queue::QueueTriplet`] — the PTW has no
WQ/PQ, and a request arriving here is itself a translation, not something
that needs further translating).
*/

pub mod pscl;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::trace;

use crate::clock::Operable;
use crate::config::PtwConfig;
use crate::error::SimError;
use crate::packet::{MemoryRequestConsumer, Packet, QueueKind, RequestType};
use crate::stats::PtwStats;
use crate::util::{splice_bits, EVENT_CYCLE_INFINITE};
use crate::vmem::VirtualMemory;

use pscl::PageStructureCache;

/// The PTW's input queue: a bounded FIFO with a fixed admission delay,
/// mirroring `champsim::delay_queue<PACKET>` as used for `PageTableWalker::RQ`.
struct DelayQueue {
    size: usize,
    latency: u64,
    entries: Vec<Packet>,
    log2_page_size: u32,
}

impl DelayQueue {
    fn new(size: usize, latency: u64, log2_page_size: u32) -> Self {
        Self { size, latency, entries: Vec::with_capacity(size), log2_page_size }
    }

    /// spec.md §4.3 "Duplicate handling": the RQ must never hold two
    /// requests with the same page-aligned VA at admission time.
    fn try_push(&mut self, mut packet: Packet, current_cycle: u64) -> Result<bool, SimError> {
        let page = packet.virtual_page(self.log2_page_size);
        if self.entries.iter().any(|p| p.virtual_page(self.log2_page_size) == page) {
            return Err(SimError::DuplicatePtwRequest { page_address: page << self.log2_page_size });
        }
        if self.entries.len() >= self.size {
            return Ok(false);
        }
        packet.event_cycle = current_cycle + self.latency;
        self.entries.push(packet);
        Ok(true)
    }

    fn has_ready(&self, current_cycle: u64) -> bool {
        self.entries.first().map(|p| p.event_cycle <= current_cycle).unwrap_or(false)
    }

    fn front(&self) -> Option<&Packet> {
        self.entries.first()
    }

    fn pop_front(&mut self) -> Option<Packet> {
        (!self.entries.is_empty()).then(|| self.entries.remove(0))
    }

    fn occupancy(&self) -> usize {
        self.entries.len()
    }
}

pub struct PageTableWalker {
    name: String,
    cpu: u8,
    fill_level: u32,
    levels: usize,
    mshr_size: usize,
    max_read: usize,
    max_fill: usize,
    rq: DelayQueue,
    mshr: Vec<Packet>,
    pscl: Vec<PageStructureCache>,
    vmem: Rc<VirtualMemory>,
    lower_level: Weak<RefCell<dyn MemoryRequestConsumer>>,
    self_sink: Weak<RefCell<dyn MemoryRequestConsumer>>,
    log2_page_size: u32,
    pub warmup: bool,
    current_cycle: u64,
    pub stats: PtwStats,
}

impl PageTableWalker {
    pub fn new(
        name: impl Into<String>,
        cpu: u8,
        fill_level: u32,
        config: &PtwConfig,
        vmem: Rc<VirtualMemory>,
        log2_page_size: u32,
        lower_level: Weak<RefCell<dyn MemoryRequestConsumer>>,
        self_sink: Weak<RefCell<dyn MemoryRequestConsumer>>,
    ) -> Self {
        let pscl = config
            .pscl_geometry
            .iter()
            .enumerate()
            .map(|(i, &(sets, ways))| {
                // pscl[i] covers 1-indexed paging level (levels - 1 - i); see vmem.rs.
                let level = config.levels - 1 - i;
                let tag_shift = log2_page_size + crate::util::lg2((1usize << log2_page_size) / 8) * (level as u32 - 1);
                PageStructureCache::new(sets, ways, tag_shift)
            })
            .collect();

        Self {
            name: name.into(),
            cpu,
            fill_level,
            levels: config.levels,
            mshr_size: config.mshr_size,
            max_read: config.max_read,
            max_fill: config.max_fill,
            rq: DelayQueue::new(config.rq_size, config.walk_latency, log2_page_size),
            mshr: Vec::new(),
            pscl,
            vmem,
            lower_level,
            self_sink,
            log2_page_size,
            warmup: true,
            current_cycle: 0,
            stats: PtwStats::default(),
        }
    }

    /// spec.md §4.3 "Walk algorithm" steps 1-2: find the deepest
    /// page-structure-cache hit for `address`, overriding shallower hits.
    fn walk_base_and_level(&mut self, address: u64) -> (u64, usize) {
        let mut walk_base = self.vmem.top_level_frame(self.cpu);
        let mut walk_init_level = self.levels - 1;

        for (i, cache) in self.pscl.iter_mut().enumerate() {
            if let Some(hit) = cache.check_hit(address) {
                walk_base = hit;
                walk_init_level = self.levels - 2 - i;
            }
        }
        (walk_base, walk_init_level)
    }

    /// spec.md §4.3 step 4: emit a memory read for the PTE and record an
    /// MSHR entry. Returns `false` (no state mutated) if downstream is
    /// full, so the caller retries next cycle.
    fn step_translation(&mut self, addr: u64, translation_level: u8, source: &Packet) -> Result<bool, SimError> {
        let page = addr >> self.log2_page_size;
        if self.mshr.iter().any(|p| p.address >> self.log2_page_size == page && p.translation_level == translation_level) {
            return Err(SimError::DuplicateMshrEntry { page_address: page << self.log2_page_size, level: translation_level });
        }

        let Some(lower) = self.lower_level.upgrade() else { return Ok(false) };

        let mut fwd = source.clone();
        fwd.address = addr;
        fwd.fill_level = self.fill_level;
        fwd.cpu = self.cpu;
        fwd.request_type = RequestType::Translation;
        fwd.translation_level = translation_level;
        fwd.to_return.clear();
        fwd.to_return.push(self.self_sink.clone());

        let success = lower.borrow_mut().add_rq(fwd.clone());
        if !success {
            return Ok(false);
        }

        fwd.to_return = source.to_return.clone();
        fwd.request_type = source.request_type;
        fwd.event_cycle = EVENT_CYCLE_INFINITE;
        self.mshr.push(fwd);
        Ok(true)
    }

    /// spec.md §4.3 "Walk algorithm": admit the next ready RQ entry and
    /// start its walk.
    pub fn handle_read(&mut self) -> Result<(), SimError> {
        let mut reads_remaining = self.max_read;
        while reads_remaining > 0 && self.rq.has_ready(self.current_cycle) && self.mshr.len() != self.mshr_size {
            let handle_pkt = self.rq.front().expect("has_ready implies a front entry").clone();
            let (walk_base, walk_init_level) = self.walk_base_and_level(handle_pkt.address);
            let walk_offset = self.vmem.get_offset(handle_pkt.address, walk_init_level + 1) * 8;

            let mut packet = handle_pkt.clone();
            packet.v_address = handle_pkt.address;
            packet.translation_level = walk_init_level as u8;
            packet.cycle_enqueued = self.current_cycle;

            let addr = splice_bits(walk_base, walk_offset, self.log2_page_size);
            let success = self.step_translation(addr, walk_init_level as u8, &packet)?;
            if !success {
                return Ok(());
            }

            trace!("[{}] handle_read instr_id={} level={}", self.name, packet.instr_id, walk_init_level);
            self.rq.pop_front();
            self.stats.reads_issued += 1;
            reads_remaining -= 1;
        }
        Ok(())
    }

    /// spec.md §4.3 "Fill handling".
    pub fn handle_fill(&mut self) -> Result<(), SimError> {
        let mut fills_remaining = self.max_fill;
        while fills_remaining > 0 && !self.mshr.is_empty() && self.mshr[0].event_cycle <= self.current_cycle {
            let mut fill = self.mshr[0].clone();

            let (data, penalty) = if fill.translation_level == 0 {
                self.vmem.va_to_pa(self.cpu, fill.v_address)
            } else {
                self.vmem.get_pte_pa(self.cpu, fill.v_address, fill.translation_level)
            };
            fill.data = data;
            fill.event_cycle = self.current_cycle + if self.warmup { 0 } else { penalty };

            if fill.event_cycle > self.current_cycle {
                self.mshr[0] = fill;
                self.mshr.sort_by_key(|p| p.event_cycle);
                break;
            }

            if fill.translation_level == 0 {
                fill.address = fill.v_address;
                fill.notify_return_sinks();
                self.stats.total_miss_latency += self.current_cycle.saturating_sub(fill.cycle_enqueued);
                self.stats.fills_completed += 1;
                self.mshr.remove(0);
            } else {
                let pscl_idx = self.levels - 1 - fill.translation_level as usize;
                self.pscl[pscl_idx].fill_cache(fill.v_address, fill.data);

                let next_level = fill.translation_level - 1;
                let next_addr = fill.data;
                let success = self.step_translation(next_addr, next_level, &fill)?;
                if !success {
                    // Leave the MSHR entry untouched; handle_fill will retry
                    // this same derivation next cycle.
                    return Ok(());
                }
                self.mshr.remove(0);
            }

            fills_remaining -= 1;
        }
        Ok(())
    }

    /// Full per-cycle operate order (spec.md §4.4 "PTW"): handle_fill →
    /// handle_read → RQ.operate() (the delay queue needs no per-cycle
    /// maintenance beyond admission delay, already applied at push time).
    pub fn operate(&mut self, current_cycle: u64) -> Result<(), SimError> {
        self.current_cycle = current_cycle;
        self.handle_fill()?;
        self.handle_read()?;
        Ok(())
    }

    pub fn try_add_rq(&mut self, packet: Packet) -> Result<bool, SimError> {
        self.stats.walks_started += 1;
        self.rq.try_push(packet, self.current_cycle)
    }
}

impl MemoryRequestConsumer for PageTableWalker {
    fn add_rq(&mut self, packet: Packet) -> bool {
        self.try_add_rq(packet).expect("PTW RQ must never receive a duplicate page-aligned VA")
    }

    fn add_wq(&mut self, _packet: Packet) -> bool {
        false
    }

    fn add_pq(&mut self, _packet: Packet) -> bool {
        false
    }

    /// spec.md §4.3 "Fill handling": a downstream completion just marks
    /// the matching MSHR entry ready; `handle_fill` re-derives the
    /// resolved address from the virtual-memory model rather than reading
    /// anything out of `packet`.
    fn return_data(&mut self, packet: &Packet) {
        let current_cycle = self.current_cycle;
        for entry in self.mshr.iter_mut() {
            if entry.address == packet.address {
                entry.event_cycle = current_cycle;
            }
        }
        self.mshr.sort_by_key(|p| p.event_cycle);
    }

    fn get_occupancy(&self, kind: QueueKind, _address: u64) -> usize {
        match kind {
            QueueKind::Mshr => self.mshr.len(),
            QueueKind::Rq | QueueKind::Pq => self.rq.occupancy(),
            QueueKind::Wq => 0,
        }
    }

    fn get_size(&self, kind: QueueKind, _address: u64) -> usize {
        match kind {
            QueueKind::Mshr => self.mshr_size,
            QueueKind::Rq | QueueKind::Pq => self.rq.size,
            QueueKind::Wq => 0,
        }
    }
}

impl Operable for PageTableWalker {
    /// Invariant violations are a fatal-assertion condition (spec.md §7),
    /// so a PTW step failing here aborts rather than silently desyncing
    /// the clock from the walker's state.
    fn operate(&mut self, local_cycle: u64) {
        PageTableWalker::operate(self, local_cycle).expect("PTW invariant violation");
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Sink {
        requests: RefCell<Vec<Packet>>,
    }
    impl MemoryRequestConsumer for Sink {
        fn add_rq(&mut self, packet: Packet) -> bool {
            self.requests.borrow_mut().push(packet);
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

    fn make_ptw(sink: &Rc<RefCell<Sink>>) -> Rc<RefCell<PageTableWalker>> {
        let vmem = Rc::new(VirtualMemory::new(4096, 8, 4, 50));
        let config = PtwConfig::default();
        Rc::new_cyclic(|weak_self| {
            RefCell::new(PageTableWalker::new(
                "PTW",
                0,
                0,
                &config,
                vmem,
                12,
                crate::queue::weak_sink(sink),
                weak_self.clone() as Weak<RefCell<dyn MemoryRequestConsumer>>,
            ))
        })
    }

    #[test]
    fn unseen_va_generates_one_read_per_level() {
        let sink = Rc::new(RefCell::new(Sink { requests: RefCell::new(Vec::new()) }));
        let ptw = make_ptw(&sink);

        let request = Packet::new(0x1234_5678, RequestType::Load, 0, 1);
        assert!(ptw.borrow_mut().add_rq(request));

        // drive enough cycles to walk all 4 levels (rq_size walk_latency + per-fill latency)
        for cycle in 0..500 {
            ptw.borrow_mut().operate(cycle).unwrap();
        }

        assert_eq!(sink.borrow().requests.borrow().len(), 4);
    }

    #[test]
    fn warm_pscl_skips_directly_to_remaining_level() {
        let sink = Rc::new(RefCell::new(Sink { requests: RefCell::new(Vec::new()) }));
        let ptw = make_ptw(&sink);

        // Page offset (12 bits) + leaf PT index (9 bits) occupy the low 21
        // bits; everything above that is shared between the two addresses
        // below so every level but the leaf hits in its page-structure cache.
        let shared_upper = 0x1234_0000u64;
        let first = Packet::new(shared_upper | 0x1000, RequestType::Load, 0, 1);
        assert!(ptw.borrow_mut().add_rq(first));
        for cycle in 0..500 {
            ptw.borrow_mut().operate(cycle).unwrap();
        }
        assert_eq!(sink.borrow().requests.borrow().len(), 4);
        sink.borrow().requests.borrow_mut().clear();

        let second = Packet::new(shared_upper | 0x2000, RequestType::Load, 0, 2);
        assert!(ptw.borrow_mut().add_rq(second));
        for cycle in 500..1000 {
            ptw.borrow_mut().operate(cycle).unwrap();
        }
        assert_eq!(sink.borrow().requests.borrow().len(), 1);
    }
}
