/*!
The memory-hierarchy facade: wires cache levels, the page-table walker, and
the DRAM controller into one clocked unit, grounded in `bus::Bus`'s role as
the single place that owns every device and its timing.

A fixed three-level cache topology (L1D -> L2C -> LLC -> DRAM) mirrors the
single-core configuration `original_source` ships by default; only `L1D`
issues translation requests, matching a real TLB hierarchy where only the
level closest to the core walks on a miss.
*/

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::cache::CacheLevel;
use crate::clock::{Clock, Operable};
use crate::config::{CacheConfig, SimConfig};
use crate::deadlock::{DeadlockDetector, DeadlockSource};
use crate::dram::DramController;
use crate::packet::{MemoryRequestConsumer, Packet};
use crate::ptw::PageTableWalker;
use crate::queue::weak_sink;
use crate::vmem::VirtualMemory;

/// Find a configured cache by name, falling back to a default with the
/// given fill level and translation behavior stamped on.
fn cache_config(caches: &[CacheConfig], name: &str, fill_level: u32, translating: bool) -> CacheConfig {
    caches.iter().find(|c| c.name == name).cloned().unwrap_or_else(|| CacheConfig {
        name: name.to_string(),
        fill_level,
        translating,
        ..Default::default()
    })
}

pub struct MemoryHierarchy {
    pub l1d: Rc<RefCell<CacheLevel>>,
    pub l2c: Rc<RefCell<CacheLevel>>,
    pub llc: Rc<RefCell<CacheLevel>>,
    pub ptw: Rc<RefCell<PageTableWalker>>,
    pub dram: Rc<RefCell<DramController>>,
    clock: Clock,
    deadlock: DeadlockDetector,
}

impl MemoryHierarchy {
    pub fn new(config: &SimConfig) -> Self {
        let log2_block_size = config.log2_block_size();
        let log2_page_size = config.log2_page_size();

        let dram = Rc::new(RefCell::new(DramController::new(&config.dram, log2_block_size)));

        let llc_config = cache_config(&config.caches, "LLC", 2, false);
        let llc: Rc<RefCell<CacheLevel>> = Rc::new_cyclic(|weak_self| {
            RefCell::new(CacheLevel::new(
                &llc_config,
                log2_block_size,
                log2_page_size,
                weak_sink(&dram),
                None,
                weak_self.clone() as Weak<RefCell<dyn MemoryRequestConsumer>>,
            ))
        });

        let l2_config = cache_config(&config.caches, "L2C", 1, false);
        let l2c: Rc<RefCell<CacheLevel>> = Rc::new_cyclic(|weak_self| {
            RefCell::new(CacheLevel::new(
                &l2_config,
                log2_block_size,
                log2_page_size,
                weak_sink(&llc),
                None,
                weak_self.clone() as Weak<RefCell<dyn MemoryRequestConsumer>>,
            ))
        });

        let vmem = Rc::new(VirtualMemory::new(config.page_size, config.pte_bytes, config.ptw.levels, config.ptw.walk_latency));
        let ptw: Rc<RefCell<PageTableWalker>> = Rc::new_cyclic(|weak_self| {
            RefCell::new(PageTableWalker::new(
                "PTW",
                0,
                0,
                &config.ptw,
                vmem,
                log2_page_size,
                weak_sink(&llc),
                weak_self.clone() as Weak<RefCell<dyn MemoryRequestConsumer>>,
            ))
        });

        let l1d_config = cache_config(&config.caches, "L1D", 0, true);
        let l1d: Rc<RefCell<CacheLevel>> = Rc::new_cyclic(|weak_self| {
            RefCell::new(CacheLevel::new(
                &l1d_config,
                log2_block_size,
                log2_page_size,
                weak_sink(&l2c),
                Some(weak_sink(&ptw)),
                weak_self.clone() as Weak<RefCell<dyn MemoryRequestConsumer>>,
            ))
        });

        let mut clock = Clock::new();
        clock.register(l1d.clone() as Rc<RefCell<dyn Operable>>, 1.0);
        clock.register(l2c.clone() as Rc<RefCell<dyn Operable>>, 1.0);
        clock.register(llc.clone() as Rc<RefCell<dyn Operable>>, 1.0);
        clock.register(ptw.clone() as Rc<RefCell<dyn Operable>>, 1.0);
        clock.register(dram.clone() as Rc<RefCell<dyn Operable>>, config.clock.default_freq_scale);

        let deadlock = DeadlockDetector::new(config.deadlock_cycles);

        Self { l1d, l2c, llc, ptw, dram, clock, deadlock }
    }

    /// End warmup: every component starts charging full latencies instead
    /// of the warmup-time zero/pass-through behavior spec.md's warmup
    /// branches describe.
    pub fn end_warmup(&mut self) {
        self.l1d.borrow_mut().warmup = false;
        self.l2c.borrow_mut().warmup = false;
        self.llc.borrow_mut().warmup = false;
        self.ptw.borrow_mut().warmup = false;
        self.dram.borrow_mut().warmup = false;
    }

    pub fn issue_load(&self, v_address: u64, cpu: u8, instr_id: u64) -> bool {
        self.l1d.borrow_mut().add_rq(Packet::new(v_address, crate::packet::RequestType::Load, cpu, instr_id))
    }

    pub fn issue_store(&self, v_address: u64, cpu: u8, instr_id: u64) -> bool {
        self.l1d.borrow_mut().add_wq(Packet::new(v_address, crate::packet::RequestType::Rfo, cpu, instr_id))
    }

    pub fn global_cycle(&self) -> u64 {
        self.clock.global_cycle()
    }

    /// Advance one global cycle and run the deadlock check.
    pub fn tick(&mut self) {
        self.clock.tick();
        let progress = self.retired_count();
        let cycle = self.clock.global_cycle();
        if self.deadlock.check(cycle, progress) {
            let l1d = self.l1d.borrow();
            let l2c = self.l2c.borrow();
            let llc = self.llc.borrow();
            let ptw = self.ptw.borrow();
            let sources: [&dyn DeadlockSource; 4] = [&*l1d, &*l2c, &*llc, &*ptw];
            self.deadlock.dump(cycle, &sources);
        }
    }

    pub fn run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.tick();
        }
    }

    fn retired_count(&self) -> u64 {
        self.l1d.borrow().stats.hits + self.l1d.borrow().stats.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    #[test]
    fn a_load_eventually_hits_after_first_fill() {
        let mut config = SimConfig::default();
        config.caches = vec![
            CacheConfig { name: "L1D".into(), num_sets: 4, num_ways: 2, mshr_size: 4, translating: true, ..Default::default() },
            CacheConfig { name: "L2C".into(), num_sets: 4, num_ways: 4, mshr_size: 4, fill_level: 1, ..Default::default() },
            CacheConfig { name: "LLC".into(), num_sets: 8, num_ways: 4, mshr_size: 8, fill_level: 2, ..Default::default() },
        ];
        let mut hierarchy = MemoryHierarchy::new(&config);
        hierarchy.end_warmup();

        assert!(hierarchy.issue_load(0x1234_5000, 0, 1));
        hierarchy.run(10_000);

        assert!(hierarchy.l1d.borrow().stats.misses >= 1);

        assert!(hierarchy.issue_load(0x1234_5000, 0, 2));
        hierarchy.run(50);
        assert!(hierarchy.l1d.borrow().stats.hits >= 1);
    }
}
