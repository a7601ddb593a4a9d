/*!
Invariant-violation errors for the memory-hierarchy core.

Purpose
- Most cross-component failures in this crate are routine backpressure
  (queue full, downstream rejected) and are represented as `bool` return
  values per the external-interface contract, never as `Result::Err`.
- `SimError` is reserved for the small set of invariant violations that
  indicate an implementation bug rather than expected contention: a
  duplicate page-table-walk request, an out-of-range replacement victim,
  or a duplicate MSHR entry. These are not recoverable; callers are
  expected to propagate them to a fatal abort, matching the "Invariant
  violation -> fatal assertion" row of the error-handling design.
*/

use thiserror::Error;

/// Invariant violations detected by the core. Each variant corresponds to
/// an assertion in the original simulator that indicated a bug, not a
/// recoverable runtime condition.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SimError {
    /// The page-table walker's input queue already held a request for the
    /// same page-aligned virtual address; duplicate suppression should have
    /// happened upstream (at the STLB's queues) before admission.
    #[error("duplicate PTW request for page-aligned address {page_address:#x}")]
    DuplicatePtwRequest { page_address: u64 },

    /// A replacement policy returned a way index outside `0..ways_per_set`.
    #[error("find_victim returned way {way} for set {set} which holds only {ways_per_set} ways")]
    VictimOutOfRange {
        set: usize,
        way: usize,
        ways_per_set: usize,
    },

    /// The PTW's MSHR held two entries for the same page-aligned virtual
    /// address at the same translation level.
    #[error(
        "duplicate MSHR entry for page-aligned address {page_address:#x} at translation level {level}"
    )]
    DuplicateMshrEntry { page_address: u64, level: u8 },
}
