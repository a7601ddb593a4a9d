//! Property-based checks of spec.md §8's cross-cutting invariants, run over
//! randomly generated load/store traffic rather than hand-picked scenarios.

use proptest::prelude::*;

use memhier::config::{CacheConfig, SimConfig};
use memhier::hierarchy::MemoryHierarchy;
use memhier::packet::{MemoryRequestConsumer, QueueKind};

fn config() -> SimConfig {
    let mut config = SimConfig::default();
    config.caches = vec![
        CacheConfig { name: "L1D".into(), num_sets: 4, num_ways: 2, mshr_size: 4, rq_size: 4, wq_size: 4, translating: true, ..Default::default() },
        CacheConfig { name: "L2C".into(), num_sets: 4, num_ways: 4, mshr_size: 4, fill_level: 1, ..Default::default() },
        CacheConfig { name: "LLC".into(), num_sets: 8, num_ways: 4, mshr_size: 8, fill_level: 2, ..Default::default() },
    ];
    config.deadlock_cycles = 100_000;
    config
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Load(u64),
    Store(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // A handful of distinct block addresses, so collisions/forwarding/
    // merging actually get exercised instead of every access missing cold.
    prop_oneof![
        (0u64..4).prop_map(|i| Op::Load(0x1000_0000 + i * 0x40)),
        (0u64..4).prop_map(|i| Op::Store(0x1000_0000 + i * 0x40)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    /// No sequence of admitted loads/stores should ever push occupancy past
    /// a queue's own configured size (spec.md §8 "queue occupancy never
    /// exceeds configured size").
    #[test]
    fn occupancy_never_exceeds_configured_size(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut hierarchy = MemoryHierarchy::new(&config());
        hierarchy.end_warmup();

        for (i, op) in ops.into_iter().enumerate() {
            match op {
                Op::Load(addr) => { hierarchy.issue_load(addr, 0, i as u64); }
                Op::Store(addr) => { hierarchy.issue_store(addr, 0, i as u64); }
            }
            hierarchy.tick();

            let l1d = hierarchy.l1d.borrow();
            for kind in [QueueKind::Rq, QueueKind::Wq, QueueKind::Pq, QueueKind::Mshr] {
                prop_assert!(l1d.get_occupancy(kind, 0) <= l1d.get_size(kind, 0));
            }
        }

        // Let everything drain; the invariant must keep holding throughout.
        for _ in 0..2000 {
            hierarchy.tick();
            let l1d = hierarchy.l1d.borrow();
            for kind in [QueueKind::Rq, QueueKind::Wq, QueueKind::Pq, QueueKind::Mshr] {
                prop_assert!(l1d.get_occupancy(kind, 0) <= l1d.get_size(kind, 0));
            }
        }
    }

    /// The global cycle counter advances by exactly one per `tick()`
    /// regardless of what traffic is in flight (spec.md §4.4 "clocked
    /// orchestration" at freq_scale 1.0).
    #[test]
    fn global_cycle_advances_monotonically(ops in proptest::collection::vec(op_strategy(), 0..40)) {
        let mut hierarchy = MemoryHierarchy::new(&config());
        hierarchy.end_warmup();

        let mut expected = 0u64;
        for (i, op) in ops.into_iter().enumerate() {
            match op {
                Op::Load(addr) => { hierarchy.issue_load(addr, 0, i as u64); }
                Op::Store(addr) => { hierarchy.issue_store(addr, 0, i as u64); }
            }
            hierarchy.tick();
            expected += 1;
            prop_assert_eq!(hierarchy.global_cycle(), expected);
        }
    }
}
