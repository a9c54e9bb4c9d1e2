//! Property tests over randomly generated acyclic dependency sets.

use promptloom::descriptor::{ModuleDescriptor, ModuleId};
use promptloom::resolver::resolve;
use proptest::prelude::*;
use rustc_hash::FxHashSet;

/// Random acyclic descriptor sets: module `i` may only depend on modules with
/// a smaller index, so cycles are impossible by construction.
fn acyclic_descriptors() -> impl Strategy<Value = Vec<ModuleDescriptor>> {
    (2usize..20).prop_flat_map(|n| {
        let edges = proptest::collection::vec(
            (0..n, 0..n, any::<bool>()),
            0..n * 2,
        );
        let priorities = proptest::collection::vec(-50i32..50, n);
        (edges, priorities).prop_map(move |(edges, priorities)| {
            let mut deps: Vec<FxHashSet<ModuleId>> =
                vec![FxHashSet::default(); n];
            for (a, b, _) in edges {
                let (hi, lo) = if a > b { (a, b) } else { (b, a) };
                if hi != lo {
                    deps[hi].insert(ModuleId::new(format!("m{lo}")));
                }
            }
            (0..n)
                .map(|i| {
                    ModuleDescriptor::builder(format!("m{i}"))
                        .priority(priorities[i])
                        .depends_on(deps[i].iter().cloned())
                        .build()
                })
                .collect()
        })
    })
}

proptest! {
    #[test]
    fn acyclic_sets_always_plan(descriptors in acyclic_descriptors()) {
        let plan = resolve(&descriptors).unwrap();
        prop_assert_eq!(plan.len(), descriptors.len());
    }

    #[test]
    fn dependencies_land_in_strictly_earlier_waves(descriptors in acyclic_descriptors()) {
        let plan = resolve(&descriptors).unwrap();
        for d in &descriptors {
            let wave = plan.wave_of(&d.id).unwrap();
            for dep in &d.dependencies {
                prop_assert!(plan.wave_of(dep).unwrap() < wave);
            }
        }
    }

    #[test]
    fn each_module_appears_in_exactly_one_wave(descriptors in acyclic_descriptors()) {
        let plan = resolve(&descriptors).unwrap();
        for d in &descriptors {
            let appearances: usize = plan
                .waves()
                .iter()
                .map(|wave| wave.iter().filter(|id| **id == d.id).count())
                .sum();
            prop_assert_eq!(appearances, 1);
        }
    }

    #[test]
    fn planning_is_deterministic(descriptors in acyclic_descriptors()) {
        let first = resolve(&descriptors).unwrap();
        let second = resolve(&descriptors).unwrap();
        prop_assert_eq!(first, second);
    }
}
