#![forbid(unsafe_code)]

//! Set operations over key sequences, expressed purely through index
//! construction, concatenation and multiplicity filtering: build one
//! combined index over the concatenated unique representatives and select
//! the keys whose multiplicity matches a target (every operand for
//! intersection, exactly one for exclusive, unfiltered for union).

use thiserror::Error;

use ki_codec::encode_rows;
use ki_funcs::{multiplicity, FuncsError};
use ki_index::{as_index, Index, IndexError, IndexOptions, IndexSource, KeyIndex};
use ki_types::{Axis, Keys, ShapeOrTypeError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetsError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    ShapeOrType(#[from] ShapeOrTypeError),
    #[error(transparent)]
    Funcs(#[from] FuncsError),
    #[error("set operation requires at least one operand")]
    MissingOperands,
    #[error("composite key tuples are not supported by in_")]
    CompositeKeys,
    #[error("index does not carry position mappings")]
    MissingPositions,
}

/// Options shared by the n-ary set operations.
///
/// `assume_unique` skips the per-operand deduplication pass entirely; the
/// caller asserts each operand already holds distinct keys. Passing operands
/// with repeats under this flag skews the multiplicity filter and with it
/// the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    pub assume_unique: bool,
}

/// Which optional parallel outputs [`unique`] should compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UniqueOptions {
    pub return_index: bool,
    pub return_inverse: bool,
    pub return_count: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueResult {
    /// Unique keys in sorted order.
    pub unique: Keys,
    /// Original position of each unique key's first occurrence.
    pub index: Option<Vec<usize>>,
    /// Per-element group id, `unique[inverse] == keys`.
    pub inverse: Option<Vec<usize>>,
    /// Occurrences of each unique key.
    pub count: Option<Vec<usize>>,
}

/// The set of unique keys, with optional first-occurrence, inverse and
/// count outputs. Position-carrying outputs force a stable indirect sort;
/// otherwise the minimal index suffices.
pub fn unique(
    keys: impl Into<IndexSource>,
    axis: Axis,
    options: UniqueOptions,
) -> Result<UniqueResult, SetsError> {
    let stable = options.return_index || options.return_inverse;
    let index = as_index(
        keys,
        axis,
        IndexOptions {
            base: !stable,
            stable,
        },
    )?;
    let first = if options.return_index {
        Some(index.first_occurrence().ok_or(SetsError::MissingPositions)?)
    } else {
        None
    };
    let inverse = if options.return_inverse {
        Some(index.inverse().ok_or(SetsError::MissingPositions)?)
    } else {
        None
    };
    let count = options.return_count.then(|| index.count());
    Ok(UniqueResult {
        unique: index.unique(),
        index: first,
        inverse,
        count,
    })
}

/// Upcast each operand to its unique representative, unless the caller
/// asserts uniqueness.
fn set_preprocess(
    sets: &[Keys],
    axis: Axis,
    options: SetOptions,
) -> Result<Vec<Keys>, SetsError> {
    if options.assume_unique {
        return Ok(sets.to_vec());
    }
    sets.iter()
        .map(|s| {
            let index = as_index(
                s.clone(),
                axis,
                IndexOptions {
                    base: true,
                    stable: false,
                },
            )?;
            Ok(index.unique())
        })
        .collect()
}

/// One combined minimal index over the concatenated representatives.
fn combined_index(sets: &[Keys]) -> Result<Index, SetsError> {
    let concatenated = Keys::concat(sets)?;
    Ok(as_index(
        concatenated,
        Axis(0),
        IndexOptions {
            base: true,
            stable: false,
        },
    )?)
}

fn select_where(keys: &Keys, mask: impl Iterator<Item = bool>) -> Keys {
    let picks: Vec<usize> = mask
        .enumerate()
        .filter_map(|(i, selected)| selected.then_some(i))
        .collect();
    keys.select_rows(&picks)
}

/// Unique keys whose multiplicity over the preprocessed operands equals
/// `target`; the shared tail of intersection and exclusive.
fn set_count(
    sets: &[Keys],
    target: usize,
    axis: Axis,
    options: SetOptions,
) -> Result<Keys, SetsError> {
    if sets.is_empty() {
        return Err(SetsError::MissingOperands);
    }
    let sets = set_preprocess(sets, axis, options)?;
    let index = combined_index(&sets)?;
    let unique = index.unique();
    Ok(select_where(
        &unique,
        index.count().into_iter().map(|c| c == target),
    ))
}

/// All keys occurring in any operand.
pub fn union(sets: &[Keys], axis: Axis, options: SetOptions) -> Result<Keys, SetsError> {
    if sets.is_empty() {
        return Err(SetsError::MissingOperands);
    }
    let sets = set_preprocess(sets, axis, options)?;
    Ok(combined_index(&sets)?.unique())
}

/// Keys present in every operand.
pub fn intersection(sets: &[Keys], axis: Axis, options: SetOptions) -> Result<Keys, SetsError> {
    set_count(sets, sets.len(), axis, options)
}

/// Keys exclusive to exactly one operand; the n-ary generalization of
/// symmetric difference.
pub fn exclusive(sets: &[Keys], axis: Axis, options: SetOptions) -> Result<Keys, SetsError> {
    set_count(sets, 1, axis, options)
}

/// Keys of the head operand minus every tail operand.
pub fn difference(sets: &[Keys], axis: Axis, options: SetOptions) -> Result<Keys, SetsError> {
    let Some((head, tail)) = sets.split_first() else {
        return Err(SetsError::MissingOperands);
    };
    let head_unique = as_index(
        head.clone(),
        axis,
        IndexOptions {
            base: true,
            stable: false,
        },
    )?
    .unique();
    let mut operands = vec![head_unique.clone()];
    for t in tail {
        operands.push(intersection(
            &[head_unique.clone(), t.clone()],
            axis,
            options,
        )?);
    }
    // every operand is unique by construction at this point
    exclusive(
        &operands,
        Axis(0),
        SetOptions {
            assume_unique: true,
        },
    )
}

/// How often each element of `b` occurs in `a`, by subtracting `b`'s own
/// multiplicity from the multiplicity over the concatenation.
pub fn count_selected(a: &Keys, b: &Keys, axis: Axis) -> Result<Vec<usize>, SetsError> {
    let a_index = as_index(a.clone(), axis, IndexOptions::default())?;
    let b_index = as_index(b.clone(), axis, IndexOptions::default())?;
    let a_keys = a_index.keys();
    let b_keys = b_index.keys();
    let query = multiplicity(b_keys.clone(), Axis(0))?;
    let joint = multiplicity(Keys::concat(&[b_keys, a_keys])?, Axis(0))?;
    Ok(joint[..query.len()]
        .iter()
        .zip(query)
        .map(|(j, q)| j - q)
        .collect())
}

/// Membership of each element of `b` in `a`: "does `a` contain it?"
pub fn contains(a: &Keys, b: &Keys, axis: Axis) -> Result<Vec<bool>, SetsError> {
    Ok(count_selected(a, b, axis)?
        .into_iter()
        .map(|c| c > 0)
        .collect())
}

/// Membership of each element of `a` in `b`, via the gap between the left
/// and right insertion points in `b`'s sorted order. Composite column
/// tuples have no searchable flat order here.
pub fn in_(a: &Keys, b: &Keys, axis: Axis) -> Result<Vec<bool>, SetsError> {
    let b_index = as_index(
        b.clone(),
        axis,
        IndexOptions {
            base: true,
            stable: false,
        },
    )?;
    match (&a, &b_index) {
        (Keys::Flat(queries), Index::Base(ix)) => {
            let sorted = ix.sorted_keys();
            Ok(queries
                .iter()
                .map(|q| {
                    let left = sorted.partition_point(|k| k < q);
                    let right = sorted.partition_point(|k| k <= q);
                    right > left
                })
                .collect())
        }
        (Keys::Table(table), Index::Row(ix)) => {
            let table = if axis.0 == 1 { table.transposed()? } else { table.clone() };
            if table.cols() != ix.table().cols() {
                return Err(ShapeOrTypeError::WidthMismatch {
                    left: ix.table().cols(),
                    right: table.cols(),
                }
                .into());
            }
            let sorted = ix.sorted_tokens();
            Ok(encode_rows(&table)
                .iter()
                .map(|q| {
                    let left = sorted.partition_point(|t| t < q);
                    let right = sorted.partition_point(|t| t <= q);
                    right > left
                })
                .collect())
        }
        (Keys::Columns(_), _) | (_, Index::Lex(_)) => Err(SetsError::CompositeKeys),
        _ => Err(ShapeOrTypeError::ShapeMismatch.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        contains, count_selected, difference, exclusive, in_, intersection, union, unique,
        SetOptions, SetsError, UniqueOptions,
    };
    use ki_types::{Axis, Key, KeyTable, Keys};

    fn ints(values: &[i64]) -> Keys {
        Keys::from_i64(values.to_vec())
    }

    #[test]
    fn binary_set_operations_match_expectations() {
        let opts = SetOptions::default();
        assert_eq!(
            exclusive(&[ints(&[1, 2, 3]), ints(&[2, 3, 4])], Axis(0), opts).expect("exclusive"),
            ints(&[1, 4])
        );
        assert_eq!(
            intersection(&[ints(&[1, 2, 3]), ints(&[2, 3, 4])], Axis(0), opts)
                .expect("intersection"),
            ints(&[2, 3])
        );
        assert_eq!(
            union(&[ints(&[1, 2]), ints(&[2, 3])], Axis(0), opts).expect("union"),
            ints(&[1, 2, 3])
        );
        assert_eq!(
            difference(&[ints(&[1, 2, 3]), ints(&[2])], Axis(0), opts).expect("difference"),
            ints(&[1, 3])
        );
    }

    #[test]
    fn three_way_exclusive_generalizes_xor() {
        let sets = [ints(&[1, 2]), ints(&[2, 3]), ints(&[3, 4])];
        assert_eq!(
            exclusive(&sets, Axis(0), SetOptions::default()).expect("exclusive"),
            ints(&[1, 4])
        );
        assert_eq!(
            intersection(&sets, Axis(0), SetOptions::default()).expect("intersection"),
            ints(&[])
        );
    }

    #[test]
    fn operands_with_repeats_are_deduplicated_by_default() {
        // multiplicity within one operand must not leak into the filter
        assert_eq!(
            intersection(&[ints(&[1, 1, 2]), ints(&[1, 3])], Axis(0), SetOptions::default())
                .expect("intersection"),
            ints(&[1])
        );
    }

    #[test]
    fn assume_unique_skips_deduplication() {
        // with the flag, the repeated 1 counts twice and reaches the target
        // multiplicity on its own
        let skewed = intersection(
            &[ints(&[1, 1]), ints(&[2])],
            Axis(0),
            SetOptions {
                assume_unique: true,
            },
        )
        .expect("intersection");
        assert_eq!(skewed, ints(&[1]));
    }

    #[test]
    fn set_operations_support_row_keys() {
        let a = Keys::Table(
            KeyTable::from_rows(vec![
                vec![Key::from(1_i64), Key::from(2_i64)],
                vec![Key::from(3_i64), Key::from(4_i64)],
            ])
            .expect("a"),
        );
        let b = Keys::Table(
            KeyTable::from_rows(vec![vec![Key::from(3_i64), Key::from(4_i64)]]).expect("b"),
        );
        let both = intersection(&[a.clone(), b], Axis(0), SetOptions::default())
            .expect("intersection");
        match both {
            Keys::Table(t) => {
                assert_eq!(t.rows(), 1);
                assert_eq!(t.row(0), &[Key::from(3_i64), Key::from(4_i64)]);
            }
            other => panic!("unexpected shape: {other:?}"),
        }
        assert_eq!(
            union(&[a.clone(), a], Axis(0), SetOptions::default())
                .expect("union")
                .len(),
            2
        );
    }

    #[test]
    fn no_operands_is_an_error()  {
        assert_eq!(
            union(&[], Axis(0), SetOptions::default()).unwrap_err(),
            SetsError::MissingOperands
        );
    }

    #[test]
    fn contains_counts_matches_in_the_left_operand() {
        let hits = contains(&ints(&[1, 2, 2, 1, 3, 1]), &ints(&[1]), Axis(0)).expect("contains");
        assert_eq!(hits, vec![true]);

        let counts =
            count_selected(&ints(&[1, 2, 2, 1, 3, 1]), &ints(&[1, 2, 9]), Axis(0))
                .expect("count_selected");
        assert_eq!(counts, vec![3, 2, 0]);
    }

    #[test]
    fn in_tests_membership_per_left_element() {
        let hits = in_(&ints(&[1, 9, 2, 9]), &ints(&[2, 1]), Axis(0)).expect("in_");
        assert_eq!(hits, vec![true, false, true, false]);
    }

    #[test]
    fn unique_returns_requested_parallel_arrays() {
        let result = unique(
            Keys::from_i64(vec![3, 1, 3, 2, 1]),
            Axis(0),
            UniqueOptions {
                return_index: true,
                return_inverse: true,
                return_count: true,
            },
        )
        .expect("unique");
        assert_eq!(result.unique, ints(&[1, 2, 3]));
        assert_eq!(result.index, Some(vec![1, 3, 0]));
        assert_eq!(result.inverse, Some(vec![2, 0, 2, 1, 0]));
        assert_eq!(result.count, Some(vec![2, 1, 2]));
    }

    #[test]
    fn unique_is_idempotent() {
        let once = unique(
            Keys::from_i64(vec![2, 2, 1, 2]),
            Axis(0),
            UniqueOptions::default(),
        )
        .expect("once")
        .unique;
        let twice = unique(once.clone(), Axis(0), UniqueOptions::default())
            .expect("twice")
            .unique;
        assert_eq!(once, twice);
    }
}
