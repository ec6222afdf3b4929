#![forbid(unsafe_code)]

//! Reference oracles for the conformance suites: small, obviously-correct
//! renditions of the engine's operations, built on ordered maps and
//! quadratic scans. The property tests compare the sort-based engine
//! against these for arbitrary inputs.

use std::collections::{BTreeMap, BTreeSet};

use ki_types::{Key, Keys};

/// Materialize every element of a key sequence as an owned row vector.
/// Flat keys become single-field rows.
#[must_use]
pub fn rows_of(keys: &Keys) -> Vec<Vec<Key>> {
    (0..keys.len()).map(|i| keys.row(i)).collect()
}

/// Sorted distinct rows, through an ordered set.
#[must_use]
pub fn naive_unique(keys: &Keys) -> Vec<Vec<Key>> {
    rows_of(keys)
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Occurrence count of each element within its own sequence, quadratically.
#[must_use]
pub fn naive_multiplicity(keys: &Keys) -> Vec<usize> {
    let rows = rows_of(keys);
    rows.iter()
        .map(|row| rows.iter().filter(|other| *other == row).count())
        .collect()
}

/// Values bucketed per key, groups in sorted key order, values in original
/// order within each group.
#[must_use]
pub fn naive_group_lists(keys: &Keys, values: &[f64]) -> BTreeMap<Vec<Key>, Vec<f64>> {
    let mut groups: BTreeMap<Vec<Key>, Vec<f64>> = BTreeMap::new();
    for (row, value) in rows_of(keys).into_iter().zip(values) {
        groups.entry(row).or_default().push(*value);
    }
    groups
}

/// Per-group sums in sorted key order.
#[must_use]
pub fn naive_group_sums(keys: &Keys, values: &[f64]) -> BTreeMap<Vec<Key>, f64> {
    naive_group_lists(keys, values)
        .into_iter()
        .map(|(key, group)| (key, group.iter().sum()))
        .collect()
}

fn row_sets(sets: &[Keys]) -> Vec<BTreeSet<Vec<Key>>> {
    sets.iter()
        .map(|s| rows_of(s).into_iter().collect())
        .collect()
}

/// Rows present in any operand, sorted.
#[must_use]
pub fn naive_union(sets: &[Keys]) -> Vec<Vec<Key>> {
    let mut out = BTreeSet::new();
    for set in row_sets(sets) {
        out.extend(set);
    }
    out.into_iter().collect()
}

/// Rows present in every operand, sorted.
#[must_use]
pub fn naive_intersection(sets: &[Keys]) -> Vec<Vec<Key>> {
    let sets = row_sets(sets);
    naive_union_sets(&sets)
        .into_iter()
        .filter(|row| sets.iter().all(|s| s.contains(row)))
        .collect()
}

/// Rows present in exactly one operand, sorted.
#[must_use]
pub fn naive_exclusive(sets: &[Keys]) -> Vec<Vec<Key>> {
    let sets = row_sets(sets);
    naive_union_sets(&sets)
        .into_iter()
        .filter(|row| sets.iter().filter(|s| s.contains(row)).count() == 1)
        .collect()
}

/// Rows of the head operand absent from every tail operand, sorted.
#[must_use]
pub fn naive_difference(sets: &[Keys]) -> Vec<Vec<Key>> {
    let sets = row_sets(sets);
    let Some((head, tail)) = sets.split_first() else {
        return Vec::new();
    };
    head.iter()
        .filter(|row| tail.iter().all(|s| !s.contains(*row)))
        .cloned()
        .collect()
}

fn naive_union_sets(sets: &[BTreeSet<Vec<Key>>]) -> BTreeSet<Vec<Key>> {
    let mut out = BTreeSet::new();
    for set in sets {
        out.extend(set.iter().cloned());
    }
    out
}

/// Membership of each element of `queries` in `haystack`.
#[must_use]
pub fn naive_membership(haystack: &Keys, queries: &Keys) -> Vec<bool> {
    let rows: BTreeSet<Vec<Key>> = rows_of(haystack).into_iter().collect();
    rows_of(queries)
        .into_iter()
        .map(|row| rows.contains(&row))
        .collect()
}
