/*!
One DRAM channel: bank-aware scheduling, row-buffer tracking, and data-bus
arbitration (spec.md §4.2), grounded in
`original_source/src/dram_controller.cc`'s `DRAM_CHANNEL::check_collision`
and `MEMORY_CONTROLLER::operate`'s per-channel body.

The source stashes a `std::vector<PACKET>::iterator` in each bank request.
That iterator is invalidated if the owning vector ever reallocates and gives
no way to notice a stale reference. Here a bank slot instead stores a
[`PacketHandle`]: a queue tag, an index, and the slot's generation at the
time of scheduling (spec.md §9 redesign note). [`DramChannel::resolve`]
checks the generation before dereferencing, so a handle that outlived its
slot's contents is detected rather than silently misread.
*/

use log::trace;

use crate::config::DramTimingConfig;
use crate::packet::{Packet, RequestType};
use crate::stats::DramChannelStats;
use crate::util::EVENT_CYCLE_INFINITE;

use super::address::AddressDecoder;

const OPEN_ROW_NONE: u64 = u64::MAX;

/// Which of a channel's two queues a [`PacketHandle`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankQueue {
    Wq,
    Rq,
}

/// A queue-stable reference to a scheduled packet: which queue, which slot,
/// and the slot's generation when the handle was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHandle {
    pub queue: BankQueue,
    pub index: usize,
    pub generation: u64,
}

#[derive(Debug, Clone)]
struct Slot {
    packet: Option<Packet>,
    generation: u64,
}

impl Slot {
    fn empty() -> Self {
        Self { packet: None, generation: 0 }
    }

    fn put(&mut self, packet: Packet) {
        self.packet = Some(packet);
        self.generation += 1;
    }

    fn clear(&mut self) {
        if self.packet.take().is_some() {
            self.generation += 1;
        }
    }
}

/// Tuple {valid, row_buffer_hit, open_row, event_cycle, packet-ref} from
/// spec.md §3, one per (rank, bank).
#[derive(Debug, Clone)]
struct BankSlot {
    valid: bool,
    row_buffer_hit: bool,
    open_row: u64,
    event_cycle: u64,
    handle: Option<PacketHandle>,
}

impl BankSlot {
    fn empty() -> Self {
        Self {
            valid: false,
            row_buffer_hit: false,
            open_row: OPEN_ROW_NONE,
            event_cycle: 0,
            handle: None,
        }
    }
}

pub struct DramChannel {
    name: String,
    wq: Vec<Slot>,
    rq: Vec<Slot>,
    bank_request: Vec<BankSlot>,
    active_request: Option<usize>,
    write_mode: bool,
    dbus_cycle_available: u64,
    banks_per_rank: usize,
    t_rp: u64,
    t_rcd: u64,
    t_cas: u64,
    dbus_turn_around: u64,
    dbus_return_time: u64,
    high_wm: usize,
    low_wm: usize,
    decoder: AddressDecoder,
    pub stats: DramChannelStats,
}

impl DramChannel {
    pub fn new(name: impl Into<String>, timing: &DramTimingConfig, decoder: AddressDecoder, log2_block_size: u32) -> Self {
        // `bank_index` computes `rank * banks_per_rank + bank` (ChampSim's
        // `RANKS*BANKS` array indexed by `rank*BANKS + bank`), so the
        // multiplier must be banks-per-rank, not the channel's total bank
        // count, even though the array itself is sized by the total.
        let banks_per_rank = timing.banks;
        let total_banks = timing.ranks * timing.banks;
        let t_rp = timing.ns_to_cycles(timing.t_rp_ns);
        let t_rcd = timing.ns_to_cycles(timing.t_rcd_ns);
        let t_cas = timing.ns_to_cycles(timing.t_cas_ns);
        let dbus_turn_around = timing.ns_to_cycles(timing.turnaround_ns);
        let dbus_return_time = (timing.channel_width_bytes as u64).max(1);
        let block_size = 1u64 << log2_block_size;
        let dbus_return_time = (block_size + dbus_return_time - 1) / dbus_return_time;

        Self {
            name: name.into(),
            wq: (0..timing.wq_size).map(|_| Slot::empty()).collect(),
            rq: (0..timing.rq_size).map(|_| Slot::empty()).collect(),
            bank_request: (0..total_banks).map(|_| BankSlot::empty()).collect(),
            active_request: None,
            write_mode: false,
            dbus_cycle_available: 0,
            banks_per_rank,
            t_rp,
            t_rcd,
            t_cas,
            dbus_turn_around,
            dbus_return_time,
            high_wm: timing.wq_size * 7 / 8,
            low_wm: timing.wq_size * 6 / 8,
            decoder,
            stats: DramChannelStats::default(),
        }
    }

    fn slot_mut(&mut self, queue: BankQueue) -> &mut Vec<Slot> {
        match queue {
            BankQueue::Wq => &mut self.wq,
            BankQueue::Rq => &mut self.rq,
        }
    }

    fn slot(&self, queue: BankQueue) -> &Vec<Slot> {
        match queue {
            BankQueue::Wq => &self.wq,
            BankQueue::Rq => &self.rq,
        }
    }

    /// Read a handle's packet only if the slot's generation still matches.
    fn resolve(&self, handle: PacketHandle) -> Option<&Packet> {
        let slot = &self.slot(handle.queue)[handle.index];
        if slot.generation == handle.generation {
            slot.packet.as_ref()
        } else {
            None
        }
    }

    fn resolve_mut(&mut self, handle: PacketHandle) -> Option<&mut Packet> {
        let generation = handle.generation;
        let slot = &mut self.slot_mut(handle.queue)[handle.index];
        if slot.generation == generation {
            slot.packet.as_mut()
        } else {
            None
        }
    }

    pub fn add_rq(&mut self, mut packet: Packet, current_cycle: u64) -> bool {
        match self.rq.iter().position(|s| s.packet.is_none()) {
            Some(idx) => {
                packet.forward_checked = false;
                packet.event_cycle = current_cycle;
                self.rq[idx].put(packet);
                true
            }
            None => false,
        }
    }

    pub fn add_wq(&mut self, mut packet: Packet, current_cycle: u64) -> bool {
        match self.wq.iter().position(|s| s.packet.is_none()) {
            Some(idx) => {
                packet.forward_checked = false;
                packet.event_cycle = current_cycle;
                self.wq[idx].put(packet);
                true
            }
            None => {
                self.stats.wq_full += 1;
                false
            }
        }
    }

    /// Whether this channel is currently servicing its write queue
    /// (spec.md §4.2 "Mode switch"). Exposed for tests that exercise the
    /// watermark hysteresis end to end.
    pub fn is_write_mode(&self) -> bool {
        self.write_mode
    }

    pub fn occupancy_rq(&self) -> usize {
        self.rq.iter().filter(|s| s.packet.is_some()).count()
    }
    pub fn occupancy_wq(&self) -> usize {
        self.wq.iter().filter(|s| s.packet.is_some()).count()
    }
    pub fn size_rq(&self) -> usize {
        self.rq.len()
    }
    pub fn size_wq(&self) -> usize {
        self.wq.len()
    }

    /// spec.md §4.2 step 1: drain the RQ by returning data immediately and
    /// clearing the WQ, for warmup cycles.
    fn warmup_flush(&mut self) {
        for slot in self.wq.iter_mut().chain(self.rq.iter_mut()) {
            if let Some(packet) = &slot.packet {
                packet.notify_return_sinks();
            }
        }
        for slot in self.rq.iter_mut() {
            slot.clear();
        }
        for slot in self.wq.iter_mut() {
            slot.clear();
        }
    }

    /// spec.md §4.2 step 2 ("same semantics as §4.1 but simplified, no
    /// PQ"), grounded in `DRAM_CHANNEL::check_collision`.
    fn check_collision(&mut self, log2_block_size: u32) {
        let mut i = 0;
        'wq: while i < self.wq.len() {
            let checked = self.wq[i].packet.as_ref().map(|p| p.forward_checked).unwrap_or(true);
            if checked {
                i += 1;
                continue;
            }
            let addr = self.wq[i].packet.as_ref().unwrap().block_address(log2_block_size);
            for j in 0..self.wq.len() {
                if j == i {
                    continue;
                }
                if let Some(other) = &self.wq[j].packet {
                    if other.block_address(log2_block_size) == addr {
                        self.wq[i].clear();
                        continue 'wq;
                    }
                }
            }
            self.wq[i].packet.as_mut().unwrap().forward_checked = true;
            i += 1;
        }

        let mut i = 0;
        'rq: while i < self.rq.len() {
            let checked = self.rq[i].packet.as_ref().map(|p| p.forward_checked).unwrap_or(true);
            if checked {
                i += 1;
                continue;
            }
            let addr = self.rq[i].packet.as_ref().unwrap().block_address(log2_block_size);

            if let Some(found) = self.wq.iter().find_map(|s| s.packet.as_ref().filter(|p| p.block_address(log2_block_size) == addr)) {
                let data = found.data;
                let entry = self.rq[i].packet.as_mut().unwrap();
                entry.data = data;
                entry.notify_return_sinks();
                self.rq[i].clear();
                i += 1;
                continue;
            }

            for j in 0..self.rq.len() {
                if j == i {
                    continue;
                }
                let matches = self.rq[j]
                    .packet
                    .as_ref()
                    .map(|p| p.block_address(log2_block_size) == addr)
                    .unwrap_or(false);
                if matches {
                    let later = self.rq[i].packet.take().unwrap();
                    let earlier = self.rq[j].packet.as_mut().unwrap();
                    earlier.merge_depends_from(&later);
                    earlier.merge_return_sinks_from(&later);
                    self.rq[i].clear();
                    continue 'rq;
                }
            }
            self.rq[i].packet.as_mut().unwrap().forward_checked = true;
            i += 1;
        }
    }

    /// spec.md §4.2 step 3: deliver and clear a completed active request.
    fn completion(&mut self, current_cycle: u64) {
        let Some(bank_idx) = self.active_request else { return };
        if self.bank_request[bank_idx].event_cycle > current_cycle {
            return;
        }
        if let Some(handle) = self.bank_request[bank_idx].handle {
            if let Some(packet) = self.resolve(handle) {
                packet.notify_return_sinks();
                trace!("[{}] completion instr_id={}", self.name, packet.instr_id);
            }
            self.slot_mut(handle.queue)[handle.index].clear();
        }
        self.bank_request[bank_idx].valid = false;
        self.active_request = None;
    }

    /// spec.md §4.2 step 4: adaptive read/write mode switch with watermark
    /// hysteresis.
    fn mode_switch(&mut self, current_cycle: u64) {
        let wq_occu = self.occupancy_wq();
        let rq_occu = self.occupancy_rq();

        let should_switch = (!self.write_mode && (wq_occu >= self.high_wm || (rq_occu == 0 && wq_occu > 0)))
            || (self.write_mode && (wq_occu == 0 || (rq_occu > 0 && wq_occu < self.low_wm)));

        if !should_switch {
            return;
        }

        for idx in 0..self.bank_request.len() {
            if Some(idx) == self.active_request || !self.bank_request[idx].valid {
                continue;
            }
            if self.bank_request[idx].event_cycle < current_cycle + self.t_cas {
                self.bank_request[idx].open_row = OPEN_ROW_NONE;
            }
            self.bank_request[idx].valid = false;
            if let Some(handle) = self.bank_request[idx].handle {
                if let Some(packet) = self.resolve_mut(handle) {
                    packet.scheduled = false;
                    packet.event_cycle = current_cycle;
                }
            }
        }

        self.dbus_cycle_available = match self.active_request {
            Some(idx) => self.bank_request[idx].event_cycle + self.dbus_turn_around,
            None => current_cycle + self.dbus_turn_around,
        };

        self.write_mode = !self.write_mode;
    }

    /// spec.md §4.2 step 5: promote the readiest bank onto the shared data
    /// bus, or account for congestion if it cannot be promoted yet.
    fn bus_arbitrate(&mut self, current_cycle: u64) {
        let next = self
            .bank_request
            .iter()
            .enumerate()
            .filter(|(_, b)| b.valid)
            .min_by_key(|(_, b)| b.event_cycle)
            .map(|(i, _)| i);

        let Some(idx) = next else { return };
        if self.bank_request[idx].event_cycle > current_cycle {
            return;
        }

        if self.active_request.is_none() && self.dbus_cycle_available <= current_cycle {
            self.bank_request[idx].event_cycle = current_cycle + self.dbus_return_time;
            self.active_request = Some(idx);

            let hit = self.bank_request[idx].row_buffer_hit;
            match (self.write_mode, hit) {
                (true, true) => self.stats.wq_row_buffer_hit += 1,
                (true, false) => self.stats.wq_row_buffer_miss += 1,
                (false, true) => self.stats.rq_row_buffer_hit += 1,
                (false, false) => self.stats.rq_row_buffer_miss += 1,
            }
        } else {
            let congested_until = match self.active_request {
                Some(active_idx) => self.bank_request[active_idx].event_cycle,
                None => self.dbus_cycle_available,
            };
            self.stats.dbus_cycle_congested += congested_until.saturating_sub(current_cycle);
            self.stats.dbus_count_congested += 1;
        }
    }

    /// spec.md §4.2 step 6: install the readiest unscheduled entry from the
    /// active queue onto its target bank.
    fn schedule(&mut self, current_cycle: u64) {
        let queue = if self.write_mode { BankQueue::Wq } else { BankQueue::Rq };
        let slots = self.slot(queue);

        let next = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.packet.as_ref().map(|p| !p.scheduled).unwrap_or(false))
            .min_by_key(|(_, s)| s.packet.as_ref().unwrap().event_cycle)
            .map(|(i, s)| (i, s.generation));

        let Some((idx, generation)) = next else { return };
        let address = self.slot(queue)[idx].packet.as_ref().unwrap().address;
        if self.slot(queue)[idx].packet.as_ref().unwrap().event_cycle > current_cycle {
            return;
        }

        let bank_idx = self.decoder.bank_index(address, self.banks_per_rank);
        if self.bank_request[bank_idx].valid {
            return;
        }

        let row = self.decoder.row(address);
        let row_buffer_hit = self.bank_request[bank_idx].open_row == row;
        let delay = self.t_cas + if row_buffer_hit { 0 } else { self.t_rp + self.t_rcd };

        self.bank_request[bank_idx] = BankSlot {
            valid: true,
            row_buffer_hit,
            open_row: row,
            event_cycle: current_cycle + delay,
            handle: Some(PacketHandle { queue, index: idx, generation }),
        };

        let entry = self.slot_mut(queue)[idx].packet.as_mut().unwrap();
        entry.scheduled = true;
        entry.event_cycle = EVENT_CYCLE_INFINITE;
    }

    /// Full per-channel operate order (spec.md §4.4): flush (if warmup) →
    /// check_collision → completion → mode-switch → bus-arbitrate →
    /// schedule.
    pub fn operate(&mut self, current_cycle: u64, warmup: bool, log2_block_size: u32) {
        if warmup {
            self.warmup_flush();
        }
        self.check_collision(log2_block_size);
        self.completion(current_cycle);
        self.mode_switch(current_cycle);
        self.bus_arbitrate(current_cycle);
        self.schedule(current_cycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DramTimingConfig;

    fn channel() -> DramChannel {
        let timing = DramTimingConfig {
            channels: 1,
            ranks: 1,
            banks: 2,
            rows: 1024,
            columns: 32,
            channel_width_bytes: 8,
            wq_size: 8,
            rq_size: 8,
            io_freq_mhz: 3200,
            t_rp_ns: 12.5,
            t_rcd_ns: 12.5,
            t_cas_ns: 12.5,
            turnaround_ns: 7.5,
        };
        let decoder = AddressDecoder::new(&timing, 6);
        DramChannel::new("CH0", &timing, decoder, 6)
    }

    fn addr(bank: u64, row: u64) -> u64 {
        // channel(0 bits) | bank(1 bit) | column(5 bits) | rank(0 bits) | row
        (row << (1 + 5 + 6)) | (bank << (5 + 6))
    }

    #[test]
    fn row_buffer_hit_skips_precharge_and_activate() {
        let mut ch = channel();
        let a = Packet::new(addr(0, 7), RequestType::Load, 0, 1);
        let b = Packet::new(addr(0, 7), RequestType::Load, 0, 2);

        assert!(ch.add_rq(a, 0));
        ch.operate(0, false, 6);
        // first access is a miss: tCAS + tRP + tRCD
        assert_eq!(ch.bank_request[0].event_cycle, ch.t_cas + ch.t_rp + ch.t_rcd);

        assert!(ch.add_rq(b, 1));
        ch.operate(1, false, 6);
        // second entry queued behind an already-valid bank, stays unscheduled
        assert!(ch.rq.iter().any(|s| s.packet.is_some()));
    }

    #[test]
    fn warmup_flush_drains_rq_and_clears_wq() {
        let mut ch = channel();
        let r = Packet::new(addr(1, 3), RequestType::Load, 0, 1);
        let w = Packet::new(addr(1, 3), RequestType::Rfo, 0, 2);
        assert!(ch.add_rq(r, 0));
        assert!(ch.add_wq(w, 0));
        ch.operate(0, true, 6);
        assert_eq!(ch.occupancy_rq(), 0);
        assert_eq!(ch.occupancy_wq(), 0);
    }
}
