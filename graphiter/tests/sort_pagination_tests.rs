//! Sorted pagination through PagedQuery
//!
//! Pages fetched one after another with sort cursors must concatenate to
//! the fully sorted result, ties ordered by arrival, whatever the page
//! sizes and turn budgets.

#[path = "testutils/mod.rs"]
mod testutils;

use graphiter::{
    Constraint, Direction, Id, Linkage, PagedQuery, PrimitiveProjector, QuerySpec, SortKey, Value,
};
use std::cmp::Ordering;
use testutils::drive::page;
use testutils::test_fixture::TestFixture;

/// Every matching id in sorted order, ties broken by iteration order
fn full_sort(fixture: &TestFixture, constraint: &Constraint, direction: Direction, keys: &[SortKey]) -> Vec<Id> {
    let arrivals = fixture.expected(constraint, fixture.full_range(), direction);
    let mut rows: Vec<(usize, Id, Vec<Value>)> = arrivals
        .iter()
        .enumerate()
        .map(|(arrival, id)| {
            let primitive = fixture.primitive(*id).unwrap();
            let values = keys
                .iter()
                .map(|key| PrimitiveProjector::field(primitive, &key.field))
                .collect();
            (arrival, *id, values)
        })
        .collect();
    rows.sort_by(|a, b| {
        keys.iter()
            .enumerate()
            .map(|(k, key)| key.order(&a.2[k], &b.2[k]))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    rows.into_iter().map(|(_, id, _)| id).collect()
}

/// Fetch pages of the given sizes until the cursor runs out
fn page_through(
    fixture: &TestFixture,
    constraint: &Constraint,
    direction: Direction,
    keys: &[SortKey],
    mut page_size: impl FnMut() -> usize,
    turn_budget: i64,
) -> (Vec<Id>, usize) {
    let mut ids = Vec::new();
    let mut cursor = None;
    let mut pages = 0;
    loop {
        let spec = QuerySpec::page(page_size())
            .with_sort(keys.to_vec())
            .with_cursor(cursor);
        let iter = fixture.compile(constraint, None, direction);
        let mut query =
            PagedQuery::new(iter, spec, PrimitiveProjector::new(fixture.env()), fixture.env()).unwrap();
        let result = page(&mut query, turn_budget);
        pages += 1;
        ids.extend(result.ids());
        match result.cursor {
            Some(next) => cursor = Some(next),
            None => return (ids, pages),
        }
    }
}

#[test]
fn test_equal_keys_across_pages() {
    let fixture = TestFixture::with_values(&[(1, "5"), (2, "3"), (3, "3"), (4, "1")]);
    let keys = vec![SortKey::asc("value")];
    let run = |cursor: Option<String>| {
        let spec = QuerySpec::page(2).with_sort(keys.clone()).with_cursor(cursor);
        let iter = fixture.compile(&Constraint::All, None, Direction::Forward);
        let mut query =
            PagedQuery::new(iter, spec, PrimitiveProjector::new(fixture.env()), fixture.env()).unwrap();
        page(&mut query, 30)
    };

    let first = run(None);
    assert_eq!(first.ids(), vec![4, 2]);
    assert_eq!(first.cursor.as_deref(), Some("sort:n3;1"));

    let second = run(first.cursor);
    assert_eq!(second.ids(), vec![3, 1]);
    assert_eq!(second.rows[0].keys, vec![Value::Number(3.0)]);
    assert_eq!(second.cursor.as_deref(), Some("sort:n5;0"));

    let third = run(second.cursor);
    assert!(third.rows.is_empty());
    assert!(third.cursor.is_none());
}

#[test]
fn test_random_paging_matches_full_sort() {
    let key_sets = [
        vec![SortKey::asc("value")],
        vec![SortKey::desc("value")],
        vec![SortKey::asc("name"), SortKey::desc("id")],
        vec![SortKey::asc("scope"), SortKey::desc("value")],
        vec![SortKey::desc("left"), SortKey::asc("type")],
    ];
    let constraints = [
        Constraint::All,
        Constraint::Glob {
            pattern: "ap*".into(),
        },
        Constraint::Linked {
            role: Linkage::Scope,
            endpoint: 3,
            type_id: None,
        },
    ];
    let fixture = TestFixture::with_seed(17, 250);
    let mut rng = fastrand::Rng::with_seed(99);

    for keys in &key_sets {
        for constraint in &constraints {
            for direction in [Direction::Forward, Direction::Backward] {
                let want = full_sort(&fixture, constraint, direction, keys);
                let (got, pages) =
                    page_through(&fixture, constraint, direction, keys, || rng.usize(1..40), 300);
                assert_eq!(got, want, "{:?} {:?} {:?}", keys, constraint, direction);
                assert!(pages >= 1);
            }
        }
    }
}

#[test]
fn test_single_row_pages() {
    let fixture = TestFixture::with_seed(23, 60);
    let keys = vec![SortKey::desc("value")];
    let want = full_sort(&fixture, &Constraint::All, Direction::Forward, &keys);
    let (got, pages) = page_through(&fixture, &Constraint::All, Direction::Forward, &keys, || 1, 50);
    assert_eq!(got, want);
    assert_eq!(pages, want.len() + 1);
}

#[test]
fn test_id_order_pages_match_iteration() {
    let fixture = TestFixture::new();
    for (key, direction) in [
        (SortKey::asc("id"), Direction::Forward),
        (SortKey::desc("id"), Direction::Backward),
    ] {
        let want = fixture.expected(&Constraint::All, fixture.full_range(), direction);
        let (got, _) = page_through(&fixture, &Constraint::All, direction, &[key], || 25, 500);
        assert_eq!(got, want);
    }
}

#[test]
fn test_start_skips_sorted_rows() {
    let fixture = TestFixture::with_seed(31, 120);
    let keys = vec![SortKey::asc("name"), SortKey::asc("id")];
    let want = full_sort(&fixture, &Constraint::All, Direction::Forward, &keys);

    let spec = QuerySpec::page(10).with_start(15).with_sort(keys);
    let iter = fixture.compile(&Constraint::All, None, Direction::Forward);
    let mut query = PagedQuery::new(iter, spec, PrimitiveProjector::new(fixture.env()), fixture.env()).unwrap();
    let result = page(&mut query, 1_000);
    assert_eq!(result.ids(), want[15..25].to_vec());
    assert!(result.cursor.is_some());

    let stats = result.sort_stats.unwrap();
    assert_eq!(stats.window, 25);
    assert!(stats.arrivals >= 25);
    assert!(stats.accepted >= 25);
}

#[test]
fn test_oversized_window_gives_empty_page() {
    let fixture = TestFixture::new();
    let spec = QuerySpec::page(10)
        .with_start(fixture.env().config.sort.max_window)
        .with_sort(vec![SortKey::asc("value")]);
    let iter = fixture.compile(&Constraint::All, None, Direction::Forward);
    let mut query = PagedQuery::new(iter, spec, PrimitiveProjector::new(fixture.env()), fixture.env()).unwrap();
    let result = page(&mut query, 1_000);
    assert!(result.rows.is_empty());
    assert!(result.cursor.is_none());
}
