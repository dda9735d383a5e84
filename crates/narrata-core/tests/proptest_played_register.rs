//! Property-based tests for the played register.
//!
//! Covers membership against a reference set, range normalisation and
//! serde shape.

use std::collections::BTreeSet;

use proptest::prelude::*;

use narrata_core::played::PlayedRegister;

// =============================================================================
// Strategies
// =============================================================================

/// Visit order over a small index space so ranges merge often.
fn arb_visits() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..64, 0..200)
}

fn arb_script() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

fn register_of(script: &str, visits: &[usize]) -> PlayedRegister {
    let mut register = PlayedRegister::new();
    for &index in visits {
        register.add_index(script, index);
    }
    register
}

// =============================================================================
// Membership
// =============================================================================

proptest! {
    #[test]
    fn contains_matches_reference_set(script in arb_script(), visits in arb_visits()) {
        let register = register_of(&script, &visits);
        let reference: BTreeSet<usize> = visits.iter().copied().collect();
        for index in 0..70 {
            prop_assert_eq!(register.contains_index(&script, index), reference.contains(&index));
        }
        prop_assert_eq!(register.count_played(&script), reference.len());
    }

    #[test]
    fn other_scripts_are_unaffected(visits in arb_visits()) {
        let register = register_of("a", &visits);
        prop_assert_eq!(register.count_played("b"), 0);
        for index in 0..70 {
            prop_assert!(!register.contains_index("b", index));
        }
    }

    #[test]
    fn visiting_twice_is_idempotent(visits in arb_visits()) {
        let once = register_of("s", &visits);
        let mut doubled = visits.clone();
        doubled.extend(visits.iter().rev());
        let twice = register_of("s", &doubled);
        prop_assert_eq!(once, twice);
    }
}

// =============================================================================
// Normalisation
// =============================================================================

proptest! {
    #[test]
    fn ranges_are_sorted_disjoint_and_non_adjacent(visits in arb_visits()) {
        let register = register_of("s", &visits);
        let ranges = register.ranges("s");
        for range in ranges {
            prop_assert!(range.start <= range.end);
        }
        for pair in ranges.windows(2) {
            prop_assert!(pair[0].end + 1 < pair[1].start, "ranges {:?} touch", pair);
        }
    }

    #[test]
    fn insertion_order_does_not_matter(visits in arb_visits()) {
        let forward = register_of("s", &visits);
        let mut sorted = visits.clone();
        sorted.sort_unstable();
        let ordered = register_of("s", &sorted);
        prop_assert_eq!(forward, ordered);
    }

    #[test]
    fn contiguous_visits_collapse_to_one_range(start in 0usize..100, len in 1usize..50) {
        let visits: Vec<usize> = (start..start + len).collect();
        let register = register_of("s", &visits);
        prop_assert_eq!(register.ranges("s").len(), 1);
        prop_assert_eq!(register.ranges("s")[0].count(), len);
    }
}

// =============================================================================
// Serde
// =============================================================================

proptest! {
    #[test]
    fn serde_preserves_register(script in arb_script(), visits in arb_visits()) {
        let register = register_of(&script, &visits);
        let json = serde_json::to_string(&register).unwrap();
        let back: PlayedRegister = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, register);
    }
}

#[test]
fn clear_forgets_everything() {
    let mut register = register_of("s", &[1, 2, 3]);
    register.add_index("t", 0);
    assert_eq!(register.scripts().count(), 2);
    register.clear();
    assert_eq!(register.scripts().count(), 0);
    assert!(!register.contains_index("s", 1));
}
