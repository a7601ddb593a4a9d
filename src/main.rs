//! Minimal demo driver: replays a fixed-record instruction trace through a
//! [`memhier::MemoryHierarchy`] and prints per-component stats at the end.

use std::env;
use std::fs::File;
use std::io::BufReader;
use std::process::ExitCode;

use log::{info, warn};

use memhier::config::SimConfig;
use memhier::trace::{RecordReader, TraceEvent};
use memhier::MemoryHierarchy;

fn load_config(path: Option<&str>) -> SimConfig {
    match path {
        None => SimConfig::default(),
        Some(path) => {
            let text = std::fs::read_to_string(path).unwrap_or_else(|e| panic!("reading config {path}: {e}"));
            SimConfig::from_toml(&text).unwrap_or_else(|e| panic!("parsing config {path}: {e}"))
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(trace_path) = args.next() else {
        eprintln!("usage: memhier <trace-file> [config.toml] [warmup-instructions]");
        return ExitCode::FAILURE;
    };
    let config_path = args.next();
    let warmup_instructions: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(0);

    let config = load_config(config_path.as_deref());
    let mut hierarchy = MemoryHierarchy::new(&config);

    let file = File::open(&trace_path).unwrap_or_else(|e| panic!("opening trace {trace_path}: {e}"));
    let mut reader = RecordReader::new(BufReader::new(file));

    let mut instr_id = 0u64;
    loop {
        let event = reader.next().unwrap_or_else(|e| panic!("reading trace record: {e}"));
        let record = match event {
            TraceEvent::Eof => break,
            TraceEvent::Instruction(record) => record,
        };

        if instr_id == warmup_instructions {
            info!("warmup complete at instruction {instr_id}");
            hierarchy.end_warmup();
        }

        for &addr in record.source_memory.iter().filter(|&&a| a != 0) {
            if !hierarchy.issue_load(addr, record.cpu, instr_id) {
                warn!("RQ full, dropping load for instruction {instr_id}");
            }
        }
        for &addr in record.destination_memory.iter().filter(|&&a| a != 0) {
            if !hierarchy.issue_store(addr, record.cpu, instr_id) {
                warn!("WQ full, dropping store for instruction {instr_id}");
            }
        }

        hierarchy.tick();
        instr_id += 1;
    }

    info!("replayed {instr_id} instructions in {} cycles", hierarchy.global_cycle());
    info!("L1D: {:?}", hierarchy.l1d.borrow().stats);
    info!("L2C: {:?}", hierarchy.l2c.borrow().stats);
    info!("LLC: {:?}", hierarchy.llc.borrow().stats);
    info!("PTW: {:?}", hierarchy.ptw.borrow().stats);

    ExitCode::SUCCESS
}
