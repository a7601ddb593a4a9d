/*!
The WQ/RQ/PQ queue triplet fronting every cache (spec.md §4.1), grounded in
`original_source/src/cache_queues.cc`.

`QueueTriplet` implements both variants spec.md describes as one type with
a `translating` flag, matching the teacher's preference for a shared base
behavior reused (not reimplemented) by a specialized mode — compare
`cpu::dispatch::mod` delegating most of a CPU step to shared helpers and
layering a feature-gated dispatcher on top.
*/

use log::{trace, warn};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::config::CacheConfig;
use crate::packet::{MemoryRequestConsumer, Packet, RequestType};
use crate::stats::QueueStats;
use crate::util::EVENT_CYCLE_INFINITE;

/// The WQ/RQ/PQ triplet fronting a single cache level.
pub struct QueueTriplet {
    pub name: String,
    pub wq: Vec<Packet>,
    pub rq: Vec<Packet>,
    pub pq: Vec<Packet>,
    pub wq_size: usize,
    pub rq_size: usize,
    pub pq_size: usize,
    /// Whether this triplet issues translation requests to a PTW. When
    /// false, `address` is assumed already physical on admission.
    pub translating: bool,
    /// Write-coalescing granularity: `true` matches on the full
    /// block-offset (spec.md §4.1 rule 1), `false` ignores it too
    /// (courser match, used by some write-combining configurations).
    pub match_offset_bits: bool,
    pub log2_block_size: u32,
    pub log2_page_size: u32,
    pub stats: QueueStats,
}

impl QueueTriplet {
    pub fn new(config: &CacheConfig, log2_block_size: u32, log2_page_size: u32) -> Self {
        Self {
            name: config.name.clone(),
            wq: Vec::with_capacity(config.wq_size),
            rq: Vec::with_capacity(config.rq_size),
            pq: Vec::with_capacity(config.pq_size),
            wq_size: config.wq_size,
            rq_size: config.rq_size,
            pq_size: config.pq_size,
            translating: config.translating,
            match_offset_bits: config.match_offset_bits,
            log2_block_size,
            log2_page_size,
            stats: QueueStats::default(),
        }
    }

    fn write_match_shift(&self) -> u32 {
        if self.match_offset_bits {
            0
        } else {
            self.log2_block_size
        }
    }

    fn read_match_shift(&self) -> u32 {
        self.log2_block_size
    }

    /// spec.md §4.1 rule 1: write coalescing. Any two WQ entries whose
    /// block-aligned addresses match collapse into one; the earlier entry
    /// is kept.
    fn coalesce_writes(&mut self) {
        let shift = self.write_match_shift();
        let mut i = 0;
        'outer: while i < self.wq.len() {
            if self.wq[i].forward_checked {
                i += 1;
                continue;
            }
            let addr = self.wq[i].block_address_shifted(shift);
            for j in 0..i {
                if self.wq[j].block_address_shifted(shift) == addr {
                    self.wq.remove(i);
                    self.stats.wq_merged += 1;
                    continue 'outer;
                }
            }
            self.wq[i].forward_checked = true;
            i += 1;
        }
    }

    /// spec.md §4.1 rule 2: write-to-read/prefetch forwarding, applied to
    /// one queue (`RQ` or `PQ`) against `WQ`.
    fn forward_from_writes(queue: &mut Vec<Packet>, wq: &[Packet], shift: u32, forwarded: &mut u64) {
        let mut i = 0;
        while i < queue.len() {
            if queue[i].forward_checked {
                i += 1;
                continue;
            }
            let addr = queue[i].block_address_shifted(shift);
            if let Some(found) = wq.iter().find(|w| w.block_address_shifted(shift) == addr) {
                let mut entry = queue.remove(i);
                entry.data = found.data;
                entry.notify_return_sinks();
                *forwarded += 1;
                continue;
            }
            i += 1;
        }
    }

    /// spec.md §4.1 rule 3: read/prefetch merging within one queue.
    /// `with_instr_depends` is false for PQ, which has no instruction
    /// dependents.
    fn merge_duplicates(queue: &mut Vec<Packet>, shift: u32, with_instr_depends: bool, merged: &mut u64) {
        let mut i = 0;
        'outer: while i < queue.len() {
            if queue[i].forward_checked {
                i += 1;
                continue;
            }
            let addr = queue[i].block_address_shifted(shift);
            for j in 0..i {
                if queue[j].block_address_shifted(shift) == addr {
                    let later = queue.remove(i);
                    if with_instr_depends {
                        queue[j].merge_depends_from(&later);
                    }
                    queue[j].merge_return_sinks_from(&later);
                    *merged += 1;
                    continue 'outer;
                }
            }
            queue[i].forward_checked = true;
            i += 1;
        }
    }

    /// Enforce write coalescing, write-to-read/prefetch forwarding, and
    /// read/prefetch merging across WQ/RQ/PQ (spec.md §4.1 contract,
    /// shared by both translating and non-translating queues).
    pub fn check_collision(&mut self) {
        self.coalesce_writes();

        let write_shift = self.write_match_shift();
        let read_shift = self.read_match_shift();

        let mut rq_forwarded = 0;
        Self::forward_from_writes(&mut self.rq, &self.wq, write_shift, &mut rq_forwarded);
        self.stats.wq_forward += rq_forwarded;
        let mut rq_merged = 0;
        Self::merge_duplicates(&mut self.rq, read_shift, true, &mut rq_merged);
        self.stats.rq_merged += rq_merged;

        let mut pq_forwarded = 0;
        Self::forward_from_writes(&mut self.pq, &self.wq, write_shift, &mut pq_forwarded);
        self.stats.wq_forward += pq_forwarded;
        let mut pq_merged = 0;
        Self::merge_duplicates(&mut self.pq, read_shift, false, &mut pq_merged);
        self.stats.pq_merged += pq_merged;
    }

    /// spec.md §4.1 translating-queue step (a): for each still-untranslated
    /// entry, emit a translation request to the PTW.
    fn do_issue_translation(
        queue: &mut [Packet],
        ptw: &Weak<RefCell<dyn MemoryRequestConsumer>>,
        self_sink: &Weak<RefCell<dyn MemoryRequestConsumer>>,
    ) {
        for entry in queue.iter_mut() {
            if !entry.translate_issued && entry.is_untranslated() {
                let Some(ptw) = ptw.upgrade() else { continue };
                let mut fwd = entry.clone();
                fwd.request_type = RequestType::Load;
                fwd.to_return.clear();
                fwd.to_return.push(self_sink.clone());
                let success = ptw.borrow_mut().add_rq(fwd);
                if success {
                    trace!(
                        "[TRANSLATE] issue instr_id={} v_address={:#x}",
                        entry.instr_id, entry.v_address
                    );
                    entry.translate_issued = true;
                    entry.address = 0;
                }
            }
        }
    }

    pub fn issue_translation(
        &mut self,
        ptw: &Weak<RefCell<dyn MemoryRequestConsumer>>,
        self_sink: &Weak<RefCell<dyn MemoryRequestConsumer>>,
    ) {
        Self::do_issue_translation(&mut self.wq, ptw, self_sink);
        Self::do_issue_translation(&mut self.rq, ptw, self_sink);
        Self::do_issue_translation(&mut self.pq, ptw, self_sink);
    }

    /// spec.md §4.1 translating-queue step (b): entries whose translation
    /// has not yet returned are rotated to the tail with `event_cycle = ∞`.
    /// Only the contiguous prefix of overdue-and-untranslated entries moves,
    /// matching `original_source/src/cache_queues.cc`'s `do_detect_misses`.
    fn rotate_untranslated(queue: &mut Vec<Packet>, current_cycle: u64) {
        let split = queue
            .iter()
            .position(|p| !(p.event_cycle < current_cycle && p.is_awaiting_translation()))
            .unwrap_or(queue.len());
        for entry in queue.iter_mut().take(split) {
            entry.event_cycle = EVENT_CYCLE_INFINITE;
        }
        queue.rotate_left(split);
    }

    pub fn detect_misses(&mut self, current_cycle: u64) {
        Self::rotate_untranslated(&mut self.wq, current_cycle);
        Self::rotate_untranslated(&mut self.rq, current_cycle);
        Self::rotate_untranslated(&mut self.pq, current_cycle);
    }

    /// Full per-cycle operate order for this triplet (spec.md §4.1): shared
    /// collision handling, then, for translating queues, issuing
    /// translations and rotating still-pending entries to the tail.
    pub fn operate(
        &mut self,
        current_cycle: u64,
        ptw: Option<&Weak<RefCell<dyn MemoryRequestConsumer>>>,
        self_sink: Option<&Weak<RefCell<dyn MemoryRequestConsumer>>>,
    ) {
        self.check_collision();
        if self.translating {
            if let (Some(ptw), Some(self_sink)) = (ptw, self_sink) {
                self.issue_translation(ptw, self_sink);
            }
            self.detect_misses(current_cycle);
        }
    }

    fn insertion_point(queue: &[Packet]) -> usize {
        queue
            .iter()
            .position(|p| p.event_cycle == EVENT_CYCLE_INFINITE)
            .unwrap_or(queue.len())
    }

    /// spec.md §9 ambiguous-semantics warning 2: the intended precedence is
    /// `warmup_complete ? (current_cycle + HIT_LATENCY) : current_cycle`.
    fn admit_event_cycle(current_cycle: u64, hit_latency: u64, warmup_complete: bool) -> u64 {
        if warmup_complete {
            current_cycle + hit_latency
        } else {
            current_cycle
        }
    }

    pub fn add_rq(&mut self, mut packet: Packet, current_cycle: u64, hit_latency: u64, warmup_complete: bool) -> bool {
        self.stats.rq_access += 1;
        if self.rq.len() >= self.rq_size {
            self.stats.rq_full += 1;
            warn!("[{}] RQ full, rejecting instr_id={}", self.name, packet.instr_id);
            return false;
        }
        packet.forward_checked = false;
        packet.translate_issued = false;
        packet.cycle_enqueued = current_cycle;
        packet.event_cycle = Self::admit_event_cycle(current_cycle, hit_latency, warmup_complete);
        let at = Self::insertion_point(&self.rq);
        self.rq.insert(at, packet);
        self.stats.rq_to_cache += 1;
        true
    }

    /// spec.md §9 ambiguous-semantics warning 1: `WQ_ACCESS` is incremented
    /// exactly once per call (the source incremented it twice, a bug).
    pub fn add_wq(&mut self, mut packet: Packet, current_cycle: u64, hit_latency: u64, warmup_complete: bool) -> bool {
        self.stats.wq_access += 1;
        if self.wq.len() >= self.wq_size {
            self.stats.wq_full += 1;
            warn!("[{}] WQ full, rejecting instr_id={}", self.name, packet.instr_id);
            return false;
        }
        packet.forward_checked = false;
        packet.translate_issued = false;
        packet.cycle_enqueued = current_cycle;
        packet.event_cycle = Self::admit_event_cycle(current_cycle, hit_latency, warmup_complete);
        let at = Self::insertion_point(&self.wq);
        self.wq.insert(at, packet);
        self.stats.wq_to_cache += 1;
        true
    }

    pub fn add_pq(&mut self, mut packet: Packet, current_cycle: u64, hit_latency: u64, warmup_complete: bool) -> bool {
        self.stats.pq_access += 1;
        if self.pq.len() >= self.pq_size {
            self.stats.pq_full += 1;
            warn!("[{}] PQ full, rejecting instr_id={}", self.name, packet.instr_id);
            return false;
        }
        packet.forward_checked = false;
        packet.translate_issued = false;
        packet.cycle_enqueued = current_cycle;
        packet.event_cycle = Self::admit_event_cycle(current_cycle, hit_latency, warmup_complete);
        let at = Self::insertion_point(&self.pq);
        self.pq.insert(at, packet);
        self.stats.pq_to_cache += 1;
        true
    }

    fn has_ready(front: Option<&Packet>, current_cycle: u64, translating: bool) -> bool {
        match front {
            None => false,
            Some(p) => {
                let base_ready = p.event_cycle <= current_cycle;
                if translating {
                    base_ready && !p.is_awaiting_translation() && !p.is_untranslated()
                } else {
                    base_ready
                }
            }
        }
    }

    pub fn wq_has_ready(&self, current_cycle: u64) -> bool {
        Self::has_ready(self.wq.first(), current_cycle, self.translating)
    }
    pub fn rq_has_ready(&self, current_cycle: u64) -> bool {
        Self::has_ready(self.rq.first(), current_cycle, self.translating)
    }
    pub fn pq_has_ready(&self, current_cycle: u64) -> bool {
        Self::has_ready(self.pq.first(), current_cycle, self.translating)
    }

    pub fn pop_wq_front(&mut self) -> Option<Packet> {
        (!self.wq.is_empty()).then(|| self.wq.remove(0))
    }
    pub fn pop_rq_front(&mut self) -> Option<Packet> {
        (!self.rq.is_empty()).then(|| self.rq.remove(0))
    }
    pub fn pop_pq_front(&mut self) -> Option<Packet> {
        (!self.pq.is_empty()).then(|| self.pq.remove(0))
    }

    /// spec.md §4.1 "Translation return": splice the returned frame into
    /// every queue entry on the same virtual page.
    fn splice_translation(queue: &mut [Packet], returned: &Packet, log2_page_size: u32, current_cycle: u64, hit_latency: u64, warmup_complete: bool) {
        let returned_page = returned.virtual_page(log2_page_size);
        for entry in queue.iter_mut() {
            if entry.virtual_page(log2_page_size) == returned_page {
                entry.address = crate::util::splice_bits(returned.data, entry.v_address, log2_page_size);
                let candidate = Self::admit_event_cycle(current_cycle, hit_latency, warmup_complete);
                entry.event_cycle = entry.event_cycle.min(candidate);
            }
        }
    }

    pub fn return_translation(&mut self, returned: &Packet, current_cycle: u64, hit_latency: u64, warmup_complete: bool) {
        Self::splice_translation(&mut self.wq, returned, self.log2_page_size, current_cycle, hit_latency, warmup_complete);
        Self::splice_translation(&mut self.rq, returned, self.log2_page_size, current_cycle, hit_latency, warmup_complete);
        Self::splice_translation(&mut self.pq, returned, self.log2_page_size, current_cycle, hit_latency, warmup_complete);
    }
}

/// Helper used by tests and by [`crate::cache::CacheLevel`] to build the
/// `Weak` self-reference a `Rc<RefCell<T>>`-owned component needs to hand
/// out as a return sink.
pub fn weak_sink<T: MemoryRequestConsumer + 'static>(rc: &Rc<RefCell<T>>) -> Weak<RefCell<dyn MemoryRequestConsumer>> {
    Rc::downgrade(rc) as Weak<RefCell<dyn MemoryRequestConsumer>>
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::QueueKind;

    fn cfg() -> CacheConfig {
        CacheConfig {
            name: "TEST".into(),
            wq_size: 4,
            rq_size: 4,
            pq_size: 4,
            translating: false,
            match_offset_bits: true,
            hit_latency: 4,
            ..Default::default()
        }
    }

    #[test]
    fn write_coalescing_keeps_earlier_entry() {
        let mut q = QueueTriplet::new(&cfg(), 6, 12);
        let mut a = Packet::new(0x1000, RequestType::Rfo, 0, 1);
        a.data = 0xAA;
        let mut b = Packet::new(0x1000, RequestType::Rfo, 0, 2);
        b.data = 0xBB;
        assert!(q.add_wq(a, 0, 4, true));
        assert!(q.add_wq(b, 0, 4, true));
        q.check_collision();
        assert_eq!(q.wq.len(), 1);
        assert_eq!(q.wq[0].data, 0xAA);
        assert_eq!(q.stats.wq_merged, 1);
    }

    #[test]
    fn write_to_read_forwarding_drops_read_and_delivers_data() {
        struct Sink {
            received: Option<u64>,
        }
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
            fn return_data(&mut self, packet: &Packet) {
                self.received = Some(packet.data);
            }
            fn get_occupancy(&self, _k: QueueKind, _a: u64) -> usize {
                0
            }
            fn get_size(&self, _k: QueueKind, _a: u64) -> usize {
                0
            }
        }

        let sink = Rc::new(RefCell::new(Sink { received: None }));
        let mut q = QueueTriplet::new(&cfg(), 6, 12);

        let mut write = Packet::new(0xdeadbe00, RequestType::Rfo, 0, 1);
        write.data = 0x42;
        assert!(q.add_wq(write, 0, 4, true));

        let mut read = Packet::new(0xdeadbe3f, RequestType::Load, 0, 2);
        read.to_return.push(weak_sink(&sink));
        assert!(q.add_rq(read, 0, 4, true));

        q.check_collision();

        assert_eq!(q.rq.len(), 0, "read should be dropped after forwarding");
        assert_eq!(sink.borrow().received, Some(0x42));
        assert_eq!(q.stats.wq_forward, 1);
    }

    #[test]
    fn translation_rotation_orders_ready_before_parked() {
        let mut translating_cfg = cfg();
        translating_cfg.translating = true;
        let mut q = QueueTriplet::new(&translating_cfg, 6, 12);

        // B: admitted first, then its translation request is issued
        // (address zeroed, matching `do_issue_translation`'s contract).
        let b = Packet::new(0x3000, RequestType::Load, 0, 2);
        assert!(q.add_rq(b, 0, 4, true));
        q.rq[0].translate_issued = true;
        q.rq[0].address = 0;

        // A: admitted second, already translated and ready.
        let mut a = Packet::new(0x2000, RequestType::Load, 0, 1);
        a.address = 0x9000;
        assert!(q.add_rq(a, 0, 4, true));

        // At cycle 10 both are overdue; `rotate_untranslated` only rotates
        // the leading contiguous run of overdue-untranslated entries
        // (matching `cache_queues.cc`'s `std::rotate(begin,
        // find_if_not(...), end)`), so only B parks and moves behind A.
        q.detect_misses(10);
        assert_eq!(q.rq[0].instr_id, 1);
        assert_eq!(q.rq[1].instr_id, 2);
        assert_eq!(q.rq[1].event_cycle, EVENT_CYCLE_INFINITE);

        // C: admitted after B has been parked, so `insertion_point` places
        // it ahead of B's now-infinite entry, reproducing spec scenario
        // 6's [A, C, B] ordering.
        let mut c = Packet::new(0x4000, RequestType::Load, 0, 3);
        c.address = 0xA000;
        assert!(q.add_rq(c, 10, 4, true));

        assert_eq!(q.rq[0].instr_id, 1);
        assert_eq!(q.rq[1].instr_id, 3);
        assert_eq!(q.rq[2].instr_id, 2);
        assert_eq!(q.rq[2].event_cycle, EVENT_CYCLE_INFINITE);
    }
}
