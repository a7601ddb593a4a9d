/*!
Periodic deadlock detection (spec.md §5 "Cancellation / timeout"): report
only. It dumps MSHR and queue contents once no forward progress has
occurred for a threshold number of cycles; it never unblocks anything
itself.
*/

use log::error;

use crate::clock::Operable;
use crate::packet::{MemoryRequestConsumer, QueueKind};

/// A component a [`DeadlockDetector`] can ask for its queue/MSHR occupancy
/// when producing a diagnostic dump. Blanket-implemented for every
/// component that is both a clocked component and a request consumer,
/// which covers every cache level, the PTW, and the DRAM controller.
pub trait DeadlockSource {
    fn dump_deadlock_state(&self) -> String;
}

impl<T: MemoryRequestConsumer + Operable> DeadlockSource for T {
    fn dump_deadlock_state(&self) -> String {
        format!(
            "{}: mshr={}/{} rq={}/{} wq={}/{} pq={}/{}",
            self.name(),
            self.get_occupancy(QueueKind::Mshr, 0),
            self.get_size(QueueKind::Mshr, 0),
            self.get_occupancy(QueueKind::Rq, 0),
            self.get_size(QueueKind::Rq, 0),
            self.get_occupancy(QueueKind::Wq, 0),
            self.get_size(QueueKind::Wq, 0),
            self.get_occupancy(QueueKind::Pq, 0),
            self.get_size(QueueKind::Pq, 0),
        )
    }
}

/// Tracks forward progress via a monotonically increasing counter the
/// host bumps on every packet retirement, and fires once
/// `threshold_cycles` pass with no change (spec.md §5).
pub struct DeadlockDetector {
    threshold_cycles: u64,
    last_progress_value: u64,
    last_progress_cycle: u64,
    fired: bool,
}

impl DeadlockDetector {
    pub fn new(threshold_cycles: u64) -> Self {
        Self { threshold_cycles, last_progress_value: 0, last_progress_cycle: 0, fired: false }
    }

    /// Call once per global cycle with a monotonically increasing progress
    /// counter (e.g. total packets retired so far). Returns `true` the
    /// first cycle the no-progress threshold is crossed; stays silent on
    /// later cycles until progress resumes.
    pub fn check(&mut self, current_cycle: u64, progress_value: u64) -> bool {
        if progress_value != self.last_progress_value {
            self.last_progress_value = progress_value;
            self.last_progress_cycle = current_cycle;
            self.fired = false;
            return false;
        }
        if self.fired {
            return false;
        }
        if current_cycle.saturating_sub(self.last_progress_cycle) >= self.threshold_cycles {
            self.fired = true;
            return true;
        }
        false
    }

    /// Log a diagnostic dump of every given source's queue/MSHR occupancy.
    pub fn dump(&self, current_cycle: u64, sources: &[&dyn DeadlockSource]) {
        error!("deadlock suspected at cycle {current_cycle}: no forward progress for {} cycles", self.threshold_cycles);
        for source in sources {
            error!("  {}", source.dump_deadlock_state());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_after_threshold_with_no_progress() {
        let mut detector = DeadlockDetector::new(10);
        for cycle in 0..9 {
            assert!(!detector.check(cycle, 0));
        }
        assert!(detector.check(10, 0));
        // Stays quiet on subsequent cycles until progress resumes.
        assert!(!detector.check(11, 0));
    }

    #[test]
    fn progress_resets_the_window() {
        let mut detector = DeadlockDetector::new(5);
        for cycle in 0..4 {
            assert!(!detector.check(cycle, 0));
        }
        assert!(!detector.check(4, 1));
        for cycle in 5..9 {
            assert!(!detector.check(cycle, 1));
        }
        assert!(detector.check(9, 1));
    }
}
