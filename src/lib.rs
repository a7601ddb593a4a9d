#![doc = r#"
memhier: a cycle-driven microarchitectural memory-hierarchy simulator core.

This crate models the clocked, deterministic interaction of a cache
hierarchy, a bank-aware DRAM controller, and a multi-level page-table
walker, without committing to any particular core/ISA front end.

Modules:
- error: narrow error type for invariant violations
- config: simulator configuration (cache/DRAM/PTW/clock parameters)
- util: small bit-manipulation helpers shared across modules
- packet: the request/response record and the `MemoryRequestConsumer` seam
- stats: per-component statistics counters
- queue: the RQ/WQ/PQ triplet and its translation-aware variant
- dram: bank-aware DRAM controller
- ptw: multi-level page-table walker and its page-structure caches
- vmem: deterministic virtual-memory model backing the PTW
- cache: cache-level tag array, MSHR, fill pipeline, and callback seams
- clock: frequency-scaled clocked orchestration (`Operable`, `Clock`)
- deadlock: periodic no-forward-progress detector
- trace: minimal fixed-record instruction trace reader
- hierarchy: wires cache levels, the PTW, and the DRAM controller together
"#]

pub mod cache;
pub mod clock;
pub mod config;
pub mod deadlock;
pub mod dram;
pub mod error;
pub mod hierarchy;
pub mod packet;
pub mod ptw;
pub mod queue;
pub mod stats;
pub mod trace;
pub mod util;
pub mod vmem;

pub use clock::{Clock, Operable};
pub use config::SimConfig;
pub use error::SimError;
pub use hierarchy::MemoryHierarchy;
