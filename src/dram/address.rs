/*!
Physical-address decode for the DRAM controller (spec.md §4.2 "Address
decode"), grounded in `original_source/src/dram_controller.cc`'s
`dram_get_channel`/`dram_get_bank`/`dram_get_column`/`dram_get_rank`/`dram_get_row`.

Field order, low to high: block offset | channel | bank | column | rank | row.
Each field's width is `lg2(count)` bits.
*/

use crate::config::DramTimingConfig;
use crate::util::{bitmask, lg2};

/// Precomputed bit widths and shifts for one [`DramTimingConfig`], so the
/// controller does not recompute `lg2` on every access.
#[derive(Debug, Clone, Copy)]
pub struct AddressDecoder {
    log2_block_size: u32,
    channel_bits: u32,
    bank_bits: u32,
    column_bits: u32,
    rank_bits: u32,
}

impl AddressDecoder {
    pub fn new(timing: &DramTimingConfig, log2_block_size: u32) -> Self {
        Self {
            log2_block_size,
            channel_bits: lg2(timing.channels),
            bank_bits: lg2(timing.banks),
            column_bits: lg2(timing.columns),
            rank_bits: lg2(timing.ranks),
        }
    }

    pub fn channel(&self, address: u64) -> usize {
        ((address >> self.log2_block_size) & bitmask(self.channel_bits)) as usize
    }

    pub fn bank(&self, address: u64) -> usize {
        let shift = self.channel_bits + self.log2_block_size;
        ((address >> shift) & bitmask(self.bank_bits)) as usize
    }

    pub fn column(&self, address: u64) -> u64 {
        let shift = self.bank_bits + self.channel_bits + self.log2_block_size;
        (address >> shift) & bitmask(self.column_bits)
    }

    pub fn rank(&self, address: u64) -> usize {
        let shift = self.bank_bits + self.column_bits + self.channel_bits + self.log2_block_size;
        ((address >> shift) & bitmask(self.rank_bits)) as usize
    }

    pub fn row(&self, address: u64) -> u64 {
        let shift = self.rank_bits + self.bank_bits + self.column_bits + self.channel_bits + self.log2_block_size;
        address >> shift
    }

    pub fn bank_index(&self, address: u64, banks_per_rank: usize) -> usize {
        self.rank(address) * banks_per_rank + self.bank(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_distinct_fields_independently() {
        let timing = DramTimingConfig {
            channels: 2,
            banks: 8,
            columns: 128,
            ranks: 2,
            ..Default::default()
        };
        let decoder = AddressDecoder::new(&timing, 6);

        // block offset (6 bits) | channel (1) | bank (3) | column (7) | rank (1) | row
        let channel = 1u64;
        let bank = 5u64;
        let column = 10u64;
        let rank = 1u64;
        let row = 42u64;

        let mut addr = 0u64;
        addr |= row << (1 + 3 + 7 + 1 + 6);
        addr |= rank << (3 + 7 + 1 + 6);
        addr |= column << (3 + 1 + 6);
        addr |= bank << (1 + 6);
        addr |= channel << 6;

        assert_eq!(decoder.channel(addr), channel as usize);
        assert_eq!(decoder.bank(addr), bank as usize);
        assert_eq!(decoder.column(addr), column);
        assert_eq!(decoder.rank(addr), rank as usize);
        assert_eq!(decoder.row(addr), row);
    }
}
