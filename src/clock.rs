/*!
Frequency-scaled clocked orchestration (spec.md §4.4), grounded in
`bus::clock::tick`'s role as the single place that owns per-cycle ordering,
generalized from one fixed CPU/PPU/APU sequence to an open list of
independently-clocked components.

Each registered component has a `freq_scale` relative to the global clock:
`local_rate = global_rate / freq_scale`. A fractional phase accumulates
every global tick and fires `operate()` once per whole phase crossed, so a
component slower than the global clock (`freq_scale > 1.0`) skips some
global ticks, and one faster (`freq_scale < 1.0`) runs more than once per
tick.
*/

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

/// A component the [`Clock`] drives. `operate` receives the component's own
/// local cycle counter, already advanced past the cycle being run.
pub trait Operable {
    fn operate(&mut self, local_cycle: u64);

    /// A human-readable tag used only in deadlock/trace diagnostics.
    fn name(&self) -> &str {
        "component"
    }
}

struct Entry {
    component: Rc<RefCell<dyn Operable>>,
    freq_scale: f64,
    phase: f64,
    local_cycle: u64,
}

/// The global scheduler: a flat list of operable components, each ticked in
/// registration order every global cycle (spec.md §5: "components execute
/// in a fixed deterministic order set at initialization").
pub struct Clock {
    entries: Vec<Entry>,
    global_cycle: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self { entries: Vec::new(), global_cycle: 0 }
    }

    /// Register a component with its frequency scale relative to the global
    /// clock. `freq_scale == 1.0` runs in lockstep with the global clock.
    pub fn register(&mut self, component: Rc<RefCell<dyn Operable>>, freq_scale: f64) {
        self.entries.push(Entry { component, freq_scale, phase: 0.0, local_cycle: 0 });
    }

    pub fn global_cycle(&self) -> u64 {
        self.global_cycle
    }

    /// Advance the global clock by one cycle, running every component whose
    /// accumulated phase reaches or passes 1.0 in registration order.
    pub fn tick(&mut self) {
        self.global_cycle += 1;
        for entry in &mut self.entries {
            entry.phase += 1.0 / entry.freq_scale;
            while entry.phase >= 1.0 {
                entry.phase -= 1.0;
                entry.local_cycle += 1;
                let local_cycle = entry.local_cycle;
                trace!("[clock] {} operate at local_cycle={}", entry.component.borrow().name(), local_cycle);
                entry.component.borrow_mut().operate(local_cycle);
            }
        }
    }

    /// Advance the global clock by `cycles` cycles.
    pub fn run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.tick();
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        ticks: u64,
    }
    impl Operable for Counter {
        fn operate(&mut self, _local_cycle: u64) {
            self.ticks += 1;
        }
        fn name(&self) -> &str {
            "counter"
        }
    }

    #[test]
    fn lockstep_component_ticks_once_per_global_cycle() {
        let mut clock = Clock::new();
        let counter = Rc::new(RefCell::new(Counter { ticks: 0 }));
        clock.register(counter.clone(), 1.0);
        clock.run(10);
        assert_eq!(counter.borrow().ticks, 10);
    }

    #[test]
    fn half_rate_component_ticks_half_as_often() {
        let mut clock = Clock::new();
        let counter = Rc::new(RefCell::new(Counter { ticks: 0 }));
        clock.register(counter.clone(), 2.0);
        clock.run(10);
        assert_eq!(counter.borrow().ticks, 5);
    }

    #[test]
    fn double_rate_component_ticks_twice_per_global_cycle() {
        let mut clock = Clock::new();
        let counter = Rc::new(RefCell::new(Counter { ticks: 0 }));
        clock.register(counter.clone(), 0.5);
        clock.run(10);
        assert_eq!(counter.borrow().ticks, 20);
    }
}
