//! Property tests for compiled iterators
//!
//! Every sample constraint is compiled in both directions and checked
//! against the brute-force answer: monotonic output inside the range,
//! find/next agreement, check without movement, identical output under a
//! starved budget, and no progress on an exhausted budget.

#[path = "testutils/mod.rs"]
mod testutils;

use graphiter::store::MemoryStoreConfig;
use graphiter::{Budget, Direction, EngineConfig, IdRange, Resume};
use testutils::drive::{check, drain, find, next, take};
use testutils::test_fixture::{sample_constraints, TestFixture};

const DIRECTIONS: [Direction; 2] = [Direction::Forward, Direction::Backward];

#[test]
fn test_output_matches_brute_force() {
    let fixture = TestFixture::new();
    let range = fixture.full_range();
    for constraint in sample_constraints() {
        for direction in DIRECTIONS {
            let mut iter = fixture.compile(&constraint, None, direction);
            let got = drain(iter.as_mut(), 1_000_000);
            let want = fixture.expected(&constraint, range, direction);
            assert_eq!(got, want, "{:?} {:?}", constraint, direction);
        }
    }
}

#[test]
fn test_next_is_monotonic_within_range() {
    let fixture = TestFixture::with_seed(7, 400);
    let range = IdRange::new(60, 260).unwrap();
    for constraint in sample_constraints() {
        for direction in DIRECTIONS {
            let mut iter = fixture.compile(&constraint, Some(range), direction);
            let ids = drain(iter.as_mut(), 1_000_000);
            assert!(ids.iter().all(|id| range.contains(*id)), "{:?}", constraint);
            assert!(
                ids.windows(2).all(|w| direction.precedes(w[0], w[1])),
                "{:?} {:?}: {:?}",
                constraint,
                direction,
                ids
            );
            assert_eq!(ids, fixture.expected(&constraint, range, direction));

            // Exhaustion is sticky
            assert_eq!(next(iter.as_mut(), 100), None);
        }
    }
}

#[test]
fn test_find_agrees_with_next() {
    let fixture = TestFixture::new();
    let range = fixture.full_range();
    let mut rng = fastrand::Rng::with_seed(3);
    for constraint in sample_constraints() {
        for direction in DIRECTIONS {
            let want = fixture.expected(&constraint, range, direction);
            let mut iter = fixture.compile(&constraint, None, direction);
            let mut produced: Vec<u64> = Vec::new();

            for _ in 0..20 {
                let target = rng.u64(range.low..range.high);
                let got = find(iter.as_mut(), target, 10_000);

                // First expected id at or past the target, never rewinding
                let floor = produced.last().copied();
                let expected = want
                    .iter()
                    .copied()
                    .filter(|id| !direction.precedes(*id, target))
                    .find(|id| floor.map_or(true, |last| direction.precedes(last, *id)));
                assert_eq!(got, expected, "{:?} {:?} find {}", constraint, direction, target);
                match got {
                    Some(id) => produced.push(id),
                    None => break,
                }

                // The next id is the one after in the full answer
                let after = next(iter.as_mut(), 10_000);
                let expected_after = want.iter().copied().find(|id| direction.precedes(produced[produced.len() - 1], *id));
                assert_eq!(after, expected_after, "{:?} next after find", constraint);
                match after {
                    Some(id) => produced.push(id),
                    None => break,
                }
            }
        }
    }
}

#[test]
fn test_check_does_not_move() {
    let fixture = TestFixture::new();
    let range = fixture.full_range();
    for constraint in sample_constraints() {
        let want = fixture.expected(&constraint, range, Direction::Forward);
        let mut iter = fixture.compile(&constraint, None, Direction::Forward);
        let head = take(iter.as_mut(), 3, 10_000);

        for id in range.low..range.high {
            assert_eq!(
                check(iter.as_mut(), id, 10_000),
                want.contains(&id),
                "{:?} check {}",
                constraint,
                id
            );
        }

        let rest = drain(iter.as_mut(), 10_000);
        assert_eq!([head, rest].concat(), want, "{:?}", constraint);
    }
}

#[test]
fn test_starved_budget_gives_identical_output() {
    let fixture = TestFixture::new();
    for constraint in sample_constraints() {
        for direction in DIRECTIONS {
            let generous = drain(fixture.compile(&constraint, None, direction).as_mut(), 1_000_000);
            let starved = drain(fixture.compile(&constraint, None, direction).as_mut(), 1);
            assert_eq!(starved, generous, "{:?} {:?}", constraint, direction);
        }
    }
}

#[test]
fn test_exhausted_budget_never_advances() {
    let fixture = TestFixture::new();
    for constraint in sample_constraints() {
        let mut iter = fixture.compile(&constraint, None, Direction::Forward);
        let mut reference = iter.clone_iter().unwrap();

        for _ in 0..5 {
            let mut budget = Budget::new(0);
            assert_eq!(iter.next(&mut budget).unwrap(), Resume::Suspended);
            assert_eq!(iter.find(20, &mut budget).unwrap(), Resume::Suspended);
            assert_eq!(iter.check(20, &mut budget).unwrap(), Resume::Suspended);
            assert_eq!(budget.spent(), 0);
        }

        assert_eq!(
            drain(iter.as_mut(), 10_000),
            drain(reference.as_mut(), 10_000),
            "{:?}",
            constraint
        );
    }
}

#[test]
fn test_lazy_postings_and_vip_index_agree() {
    let store_configs = [
        MemoryStoreConfig {
            lazy_threshold: Some(8),
            ..Default::default()
        },
        MemoryStoreConfig {
            vip_index: true,
            ..Default::default()
        },
        MemoryStoreConfig {
            direct_prefix_len: 2,
            ..Default::default()
        },
    ];
    for store_config in store_configs {
        let fixture = TestFixture::with_config(42, 300, store_config.clone(), EngineConfig::memory_constrained());
        let range = fixture.full_range();
        for constraint in sample_constraints() {
            for direction in DIRECTIONS {
                let got = drain(fixture.compile(&constraint, None, direction).as_mut(), 50);
                assert_eq!(
                    got,
                    fixture.expected(&constraint, range, direction),
                    "{:?} {:?} {:?}",
                    store_config,
                    constraint,
                    direction
                );
            }
        }
    }
}

#[test]
fn test_clones_are_independent() {
    let fixture = TestFixture::new();
    let range = fixture.full_range();
    for constraint in sample_constraints() {
        let want = fixture.expected(&constraint, range, Direction::Forward);
        let mut iter = fixture.compile(&constraint, None, Direction::Forward);
        let head = take(iter.as_mut(), 4, 10_000);
        let mut clone = iter.clone_iter().unwrap();

        let from_clone = drain(clone.as_mut(), 10_000);
        let from_original = drain(iter.as_mut(), 10_000);
        assert_eq!(from_clone, from_original, "{:?}", constraint);
        assert_eq!([head, from_original].concat(), want);
    }
}

#[test]
fn test_reset_restarts_output() {
    let fixture = TestFixture::new();
    for constraint in sample_constraints() {
        let mut iter = fixture.compile(&constraint, None, Direction::Backward);
        let first = drain(iter.as_mut(), 10_000);
        iter.reset().unwrap();
        assert_eq!(drain(iter.as_mut(), 10_000), first, "{:?}", constraint);
    }
}
