/*!
Miss-status holding register: tracks outstanding misses a [`super::CacheLevel`]
is awaiting a downstream response for (spec.md glossary "MSHR").

A second request for a block already tracked here merges into the existing
entry rather than occupying a second slot, the same collapsing discipline
[`crate::queue::QueueTriplet`] applies to its own queues.
*/

use crate::packet::Packet;
use crate::util::EVENT_CYCLE_INFINITE;

pub struct Mshr {
    entries: Vec<Packet>,
    size: usize,
    log2_block_size: u32,
}

impl Mshr {
    pub fn new(size: usize, log2_block_size: u32) -> Self {
        Self { entries: Vec::with_capacity(size), size, log2_block_size }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn find_index(&self, block_address: u64) -> Option<usize> {
        self.entries.iter().position(|p| p.block_address(self.log2_block_size) == block_address)
    }

    /// Whether a miss for `block_address` is already in flight.
    pub fn contains(&self, block_address: u64) -> bool {
        self.find_index(block_address).is_some()
    }

    /// Merge `packet` into an existing entry for the same block if one
    /// exists; otherwise allocate a new entry parked at
    /// [`EVENT_CYCLE_INFINITE`] until its fill arrives. Returns `false` if
    /// a new entry was needed but the MSHR is full.
    pub fn allocate(&mut self, mut packet: Packet) -> bool {
        let block_address = packet.block_address(self.log2_block_size);
        if let Some(idx) = self.find_index(block_address) {
            let existing = &mut self.entries[idx];
            existing.merge_depends_from(&packet);
            existing.merge_return_sinks_from(&packet);
            return true;
        }
        if self.entries.len() >= self.size {
            return false;
        }
        packet.event_cycle = EVENT_CYCLE_INFINITE;
        self.entries.push(packet);
        true
    }

    /// Mark the entry for `block_address` ready at `current_cycle`, per
    /// `return_data`'s MSHR-completion role.
    pub fn mark_ready(&mut self, block_address: u64, current_cycle: u64) {
        if let Some(idx) = self.find_index(block_address) {
            self.entries[idx].event_cycle = current_cycle;
        }
    }

    pub fn ready_front(&self, current_cycle: u64) -> Option<&Packet> {
        self.entries.iter().filter(|p| p.event_cycle <= current_cycle).min_by_key(|p| p.event_cycle)
    }

    pub fn remove_block(&mut self, block_address: u64) -> Option<Packet> {
        let idx = self.find_index(block_address)?;
        Some(self.entries.remove(idx))
    }
}
