//! DRAM read/write mode-switch hysteresis (spec.md §4.2 "Mode switch"):
//! the channel should flip to write mode once its WQ crosses the high
//! watermark, and flip back once it drains below the low watermark.

use memhier::config::DramTimingConfig;
use memhier::dram::DramController;
use memhier::packet::{Packet, RequestType};

fn controller() -> DramController {
    let timing = DramTimingConfig {
        channels: 1,
        ranks: 1,
        banks: 4,
        rows: 1024,
        columns: 64,
        channel_width_bytes: 8,
        wq_size: 8, // high_wm = 7, low_wm = 6
        rq_size: 8,
        io_freq_mhz: 3200,
        ..Default::default()
    };
    let mut dram = DramController::new(&timing, 6);
    dram.warmup = false;
    dram
}

fn addr(row: u64, bank: u64, column: u64) -> u64 {
    // block offset (6) | channel (0) | bank (2) | column (6) | rank (0) | row
    (row << (2 + 6 + 6)) | (column << (2 + 6)) | (bank << 6)
}

#[test]
fn crossing_the_high_watermark_switches_to_write_mode() {
    let mut dram = controller();
    for i in 0..7u64 {
        let packet = Packet::new(addr(1, 0, i), RequestType::Rfo, 0, i);
        assert!(dram.add_wq(packet));
    }
    assert!(!dram.is_write_mode(addr(1, 0, 0)));

    dram.operate(0);
    assert!(dram.is_write_mode(addr(1, 0, 0)), "7/8 WQ occupancy should have crossed the high watermark");
}

#[test]
fn draining_below_the_low_watermark_switches_back_to_read_mode() {
    let mut dram = controller();
    for i in 0..7u64 {
        let packet = Packet::new(addr(2, 1, i), RequestType::Rfo, 0, i);
        assert!(dram.add_wq(packet));
    }
    dram.operate(0);
    assert!(dram.is_write_mode(addr(2, 1, 0)));

    // Queue a read too, then let every write drain out over many cycles.
    let read = Packet::new(addr(2, 1, 0), RequestType::Load, 0, 100);
    assert!(dram.add_rq(read));

    let mut cycle = 1u64;
    for _ in 0..2000 {
        dram.operate(cycle);
        cycle += 1;
        if !dram.is_write_mode(addr(2, 1, 0)) {
            break;
        }
    }
    assert!(!dram.is_write_mode(addr(2, 1, 0)), "should have switched back to read mode once WQ drained");
}
