/*!
The off-chip DRAM controller (spec.md §4.2), grounded in
`original_source/inc/dram_controller.h` and
`original_source/src/dram_controller.cc`'s `MEMORY_CONTROLLER`.

One [`DramController`] owns all channels; address decode picks which
channel a given physical address lands on, same as the source's
`dram_get_channel`.
*/

pub mod address;
pub mod channel;

use log::error;

use crate::clock::Operable;
use crate::config::DramTimingConfig;
use crate::packet::{MemoryRequestConsumer, Packet, QueueKind};

use address::AddressDecoder;
use channel::DramChannel;

pub struct DramController {
    channels: Vec<DramChannel>,
    decoder: AddressDecoder,
    log2_block_size: u32,
    pub warmup: bool,
    current_cycle: u64,
}

impl DramController {
    pub fn new(timing: &DramTimingConfig, log2_block_size: u32) -> Self {
        let decoder = AddressDecoder::new(timing, log2_block_size);
        let channels = (0..timing.channels)
            .map(|i| DramChannel::new(format!("CH{i}"), timing, decoder, log2_block_size))
            .collect();
        Self {
            channels,
            decoder,
            log2_block_size,
            warmup: true,
            current_cycle: 0,
        }
    }

    fn channel_for(&self, address: u64) -> usize {
        self.decoder.channel(address)
    }

    /// Full per-cycle operate order: every channel advances independently
    /// (spec.md §4.4 "DRAM channel" order, applied per channel).
    pub fn operate(&mut self, current_cycle: u64) {
        self.current_cycle = current_cycle;
        for channel in &mut self.channels {
            channel.operate(current_cycle, self.warmup, self.log2_block_size);
        }
    }

    pub fn add_rq(&mut self, packet: Packet) -> bool {
        let idx = self.channel_for(packet.address);
        self.channels[idx].add_rq(packet, self.current_cycle)
    }

    pub fn add_wq(&mut self, packet: Packet) -> bool {
        let idx = self.channel_for(packet.address);
        self.channels[idx].add_wq(packet, self.current_cycle)
    }

    /// spec.md §4.2 "Admission": `add_pq` is `add_rq`.
    pub fn add_pq(&mut self, packet: Packet) -> bool {
        self.add_rq(packet)
    }

    pub fn get_occupancy(&self, kind: QueueKind, address: u64) -> usize {
        let channel = &self.channels[self.channel_for(address)];
        match kind {
            QueueKind::Rq | QueueKind::Pq => channel.occupancy_rq(),
            QueueKind::Wq => channel.occupancy_wq(),
            QueueKind::Mshr => 0,
        }
    }

    pub fn get_size(&self, kind: QueueKind, address: u64) -> usize {
        let channel = &self.channels[self.channel_for(address)];
        match kind {
            QueueKind::Rq | QueueKind::Pq => channel.size_rq(),
            QueueKind::Wq => channel.size_wq(),
            QueueKind::Mshr => 0,
        }
    }

    pub fn channel_stats(&self) -> impl Iterator<Item = &crate::stats::DramChannelStats> {
        self.channels.iter().map(|c| &c.stats)
    }

    pub fn is_write_mode(&self, address: u64) -> bool {
        self.channels[self.channel_for(address)].is_write_mode()
    }
}

/// DRAM is the bottom of the hierarchy: nothing sits below it, so
/// `return_data` should never be invoked here. Implemented as a trait
/// object target anyway, since a last-level cache's `lower_level` is typed
/// as `Weak<RefCell<dyn MemoryRequestConsumer>>` regardless of whether the
/// next component down is another cache or the DRAM controller itself.
impl MemoryRequestConsumer for DramController {
    fn add_rq(&mut self, packet: Packet) -> bool {
        self.add_rq(packet)
    }
    fn add_wq(&mut self, packet: Packet) -> bool {
        self.add_wq(packet)
    }
    fn add_pq(&mut self, packet: Packet) -> bool {
        self.add_pq(packet)
    }
    fn return_data(&mut self, packet: &Packet) {
        error!("DramController::return_data called unexpectedly for instr_id={}", packet.instr_id);
    }
    fn get_occupancy(&self, kind: QueueKind, address: u64) -> usize {
        self.get_occupancy(kind, address)
    }
    fn get_size(&self, kind: QueueKind, address: u64) -> usize {
        self.get_size(kind, address)
    }
}

impl Operable for DramController {
    fn operate(&mut self, local_cycle: u64) {
        DramController::operate(self, local_cycle);
    }

    fn name(&self) -> &str {
        "dram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::RequestType;

    fn controller() -> DramController {
        let timing = DramTimingConfig {
            channels: 1,
            ranks: 1,
            banks: 4,
            rows: 1024,
            columns: 64,
            channel_width_bytes: 8,
            wq_size: 8,
            rq_size: 8,
            io_freq_mhz: 3200,
            ..Default::default()
        };
        let mut controller = DramController::new(&timing, 6);
        controller.warmup = false;
        controller
    }

    #[test]
    fn single_channel_accepts_and_serves_requests() {
        let mut dram = controller();
        let packet = Packet::new(0x1000, RequestType::Load, 0, 1);
        assert!(dram.add_rq(packet));
        assert_eq!(dram.get_occupancy(QueueKind::Rq, 0x1000), 1);
        dram.operate(0);
    }
}
