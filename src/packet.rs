/*!
The `Packet`: the unit of request between every component in the
hierarchy (spec.md §3).

A packet with `address == v_address` has not yet been translated. A
packet with `address == 0` is awaiting a translation return. A packet's
`event_cycle == EVENT_CYCLE_INFINITE` means it is parked pending an
external event (a translation return or a DRAM completion). These three
invariants are enforced by the producers (queue triplet, PTW, DRAM
controller) rather than by `Packet` itself, matching the "boolean
contract, no exceptions" shape of spec.md §7.
*/

use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Weak;

use crate::util::EVENT_CYCLE_INFINITE;

/// `access_type` from spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Load,
    Rfo,
    Prefetch,
    Writeback,
    Translation,
}

/// Which logical queue/store a `get_occupancy`/`get_size` call refers to,
/// per spec.md §6 (`kind ∈ {0=MSHR, 1=RQ, 2=WQ, 3=PQ}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Mshr = 0,
    Rq = 1,
    Wq = 2,
    Pq = 3,
}

/// Any component that can accept requests and deliver completions. This is
/// the crate's sole cross-component contract (spec.md §6): every
/// cross-component transfer is a boolean-returning call or a `return_data`
/// completion callback, never an exception.
///
/// A [`Packet`]'s `to_return` list holds [`ReturnSink`]s rather than strong
/// references, so that a queue entry pointing back at the cache that owns
/// the queue does not create an ownership cycle (spec.md §9 redesign note:
/// "one direction is ownership ... the other is a weak back-reference").
pub trait MemoryRequestConsumer {
    fn add_rq(&mut self, packet: Packet) -> bool;
    fn add_wq(&mut self, packet: Packet) -> bool;
    fn add_pq(&mut self, packet: Packet) -> bool;
    fn return_data(&mut self, packet: &Packet);
    fn get_occupancy(&self, kind: QueueKind, address: u64) -> usize;
    fn get_size(&self, kind: QueueKind, address: u64) -> usize;
}

/// A weak handle to a [`MemoryRequestConsumer`], used as a return sink.
pub type ReturnSink = Weak<RefCell<dyn MemoryRequestConsumer>>;

/// The unit of request between components (spec.md §3).
#[derive(Clone)]
pub struct Packet {
    pub address: u64,
    pub v_address: u64,
    pub data: u64,
    pub request_type: RequestType,
    pub cpu: u8,
    pub instr_id: u64,
    /// Dependent instruction ids, ordered by `instr_id` (spec.md §4.1 rule 3).
    pub instr_depend_on_me: SmallVec<[u64; 4]>,
    pub to_return: SmallVec<[ReturnSink; 2]>,
    pub event_cycle: u64,
    pub forward_checked: bool,
    pub translate_issued: bool,
    pub scheduled: bool,
    /// PTW-only: the page-walk level this packet is resolving.
    pub translation_level: u8,
    /// The cache level at which a returning block should be installed.
    pub fill_level: u32,
    /// Cycle this packet was enqueued, used for miss-latency accounting.
    pub cycle_enqueued: u64,
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("address", &format_args!("{:#x}", self.address))
            .field("v_address", &format_args!("{:#x}", self.v_address))
            .field("data", &format_args!("{:#x}", self.data))
            .field("request_type", &self.request_type)
            .field("cpu", &self.cpu)
            .field("instr_id", &self.instr_id)
            .field("event_cycle", &self.event_cycle)
            .field("forward_checked", &self.forward_checked)
            .field("translate_issued", &self.translate_issued)
            .field("scheduled", &self.scheduled)
            .field("translation_level", &self.translation_level)
            .field("fill_level", &self.fill_level)
            .finish()
    }
}

impl Packet {
    /// Construct a fresh, untranslated packet (`address == v_address`), the
    /// state a front-end request arrives in before any queue has touched it.
    pub fn new(v_address: u64, request_type: RequestType, cpu: u8, instr_id: u64) -> Self {
        Self {
            address: v_address,
            v_address,
            data: 0,
            request_type,
            cpu,
            instr_id,
            instr_depend_on_me: SmallVec::new(),
            to_return: SmallVec::new(),
            event_cycle: 0,
            forward_checked: false,
            translate_issued: false,
            scheduled: false,
            translation_level: 0,
            fill_level: 0,
            cycle_enqueued: 0,
        }
    }

    /// A packet has not yet been translated when its physical and virtual
    /// addresses are bit-identical (spec.md §3 invariant).
    pub fn is_untranslated(&self) -> bool {
        self.address == self.v_address
    }

    /// A packet is awaiting a translation return when its physical address
    /// has been zeroed out by the queue that issued the translation
    /// request (spec.md §3 invariant).
    pub fn is_awaiting_translation(&self) -> bool {
        self.address == 0
    }

    pub fn is_parked(&self) -> bool {
        self.event_cycle == EVENT_CYCLE_INFINITE
    }

    pub fn block_address(&self, log2_block_size: u32) -> u64 {
        self.address >> log2_block_size
    }

    pub fn block_address_shifted(&self, shift_bits: u32) -> u64 {
        self.address >> shift_bits
    }

    pub fn virtual_page(&self, log2_page_size: u32) -> u64 {
        self.v_address >> log2_page_size
    }

    /// Merge another packet's dependent-instruction list into this one,
    /// keeping the result sorted by `instr_id` and free of duplicate ids
    /// (spec.md §4.1 rule 3: "sorted-by-instr_id union").
    pub fn merge_depends_from(&mut self, other: &Packet) {
        for &id in &other.instr_depend_on_me {
            if let Err(pos) = self.instr_depend_on_me.binary_search(&id) {
                self.instr_depend_on_me.insert(pos, id);
            }
        }
    }

    /// Merge another packet's return-sink list into this one (spec.md
    /// §4.1 rule 3: "unordered union of their return-sink lists"),
    /// skipping sinks that already point at the same consumer.
    pub fn merge_return_sinks_from(&mut self, other: &Packet) {
        for sink in &other.to_return {
            let already_present = self
                .to_return
                .iter()
                .any(|existing| existing.ptr_eq(sink));
            if !already_present {
                self.to_return.push(sink.clone());
            }
        }
    }

    /// Notify every return sink that is still alive. Dead sinks (the
    /// consumer has been dropped) are silently skipped; nothing in this
    /// crate drops a live component mid-simulation, but tests that
    /// construct standalone packets may exercise this path.
    pub fn notify_return_sinks(&self) {
        for sink in &self.to_return {
            if let Some(consumer) = sink.upgrade() {
                consumer.borrow_mut().return_data(self);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_packet_is_untranslated() {
        let p = Packet::new(0x1000, RequestType::Load, 0, 1);
        assert!(p.is_untranslated());
        assert!(!p.is_awaiting_translation());
    }

    #[test]
    fn merge_depends_keeps_sorted_unique() {
        let mut a = Packet::new(0x1000, RequestType::Load, 0, 1);
        a.instr_depend_on_me.extend([1, 5, 9]);
        let mut b = Packet::new(0x1000, RequestType::Load, 0, 2);
        b.instr_depend_on_me.extend([5, 3, 7]);
        a.merge_depends_from(&b);
        assert_eq!(a.instr_depend_on_me.as_slice(), &[1, 3, 5, 7, 9]);
    }
}
