#![forbid(unsafe_code)]

//! Grouping and segmented reduction over an immutable key index. A
//! [`GroupBy`] pairs an index with a parallel values sequence and offers
//! value splitting (eager and lazy) plus the per-group reductions.

use std::collections::HashMap;

use thiserror::Error;

use ki_index::{as_index, Index, IndexError, IndexOptions, IndexSource, KeyIndex};
use ki_types::{Axis, Key, Keys};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GroupByError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("values of length {found} do not match {expected} keys")]
    LengthMismatch { expected: usize, found: usize },
    #[error("array split requires uniform group sizes")]
    NonUniformGroups,
    #[error("index does not carry position mappings")]
    MissingPositions,
}

/// Grouping handle: a position-carrying index over the keys, with the
/// sorter and inverse mappings cached. Immutable once built.
#[derive(Debug, Clone)]
pub struct GroupBy {
    index: Index,
    sorter: Vec<usize>,
    inverse: Vec<usize>,
}

/// Construct a [`GroupBy`] over the given keys.
pub fn group_by(keys: impl Into<IndexSource>, axis: Axis) -> Result<GroupBy, GroupByError> {
    GroupBy::new(keys, axis)
}

/// One-shot grouping: reduce `values` by key and return `(key row, result)`
/// pairs in unique-key order.
pub fn group_apply<T, R>(
    keys: impl Into<IndexSource>,
    axis: Axis,
    values: &[T],
    f: impl Fn(&[T]) -> R,
) -> Result<Vec<(Vec<Key>, R)>, GroupByError>
where
    T: Clone,
{
    let grouping = GroupBy::new(keys, axis)?;
    let (unique, reduced) = grouping.reduce(values, f)?;
    Ok(reduced
        .into_iter()
        .enumerate()
        .map(|(g, r)| (unique.row(g), r))
        .collect())
}

impl GroupBy {
    /// Grouping always needs position mappings and first-occurrence
    /// semantics, so the index is built indirect and stable.
    pub fn new(keys: impl Into<IndexSource>, axis: Axis) -> Result<Self, GroupByError> {
        let index = as_index(
            keys,
            axis,
            IndexOptions {
                base: false,
                stable: true,
            },
        )?;
        Self::from_index(index)
    }

    pub fn from_index(index: Index) -> Result<Self, GroupByError> {
        let index = as_index(index, Axis(0), IndexOptions::default())?;
        let sorter = index
            .sorter()
            .ok_or(GroupByError::MissingPositions)?
            .to_vec();
        let inverse = index.inverse().ok_or(GroupByError::MissingPositions)?;
        Ok(Self {
            index,
            sorter,
            inverse,
        })
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn unique(&self) -> Keys {
        self.index.unique()
    }

    #[must_use]
    pub fn count(&self) -> Vec<usize> {
        self.index.count()
    }

    #[must_use]
    pub fn groups(&self) -> usize {
        self.index.groups()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn inverse(&self) -> &[usize] {
        &self.inverse
    }

    fn check_len(&self, found: usize) -> Result<(), GroupByError> {
        let expected = self.len();
        if found != expected {
            return Err(GroupByError::LengthMismatch { expected, found });
        }
        Ok(())
    }

    /// Values permuted into sorted-key order.
    fn permuted<T: Clone>(&self, values: &[T]) -> Vec<T> {
        self.sorter.iter().map(|&i| values[i].clone()).collect()
    }

    fn segments(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.index.slices().windows(2).map(|w| (w[0], w[1]))
    }

    // ── splitting ──────────────────────────────────────────────────────

    /// Split into a dense `[groups][group_size]` shape. Only valid when all
    /// groups share one size; non-uniform grouping is a distinct error, not
    /// a fallback to the list split.
    pub fn split_as_array<T: Clone>(&self, values: &[T]) -> Result<Vec<Vec<T>>, GroupByError> {
        self.check_len(values.len())?;
        if !self.index.uniform() {
            return Err(GroupByError::NonUniformGroups);
        }
        Ok(self.split_chunks(values))
    }

    /// Split into one chunk per group; always valid.
    pub fn split_as_list<T: Clone>(&self, values: &[T]) -> Result<Vec<Vec<T>>, GroupByError> {
        self.check_len(values.len())?;
        Ok(self.split_chunks(values))
    }

    fn split_chunks<T: Clone>(&self, values: &[T]) -> Vec<Vec<T>> {
        let permuted = self.permuted(values);
        self.segments()
            .map(|(start, stop)| permuted[start..stop].to_vec())
            .collect()
    }

    /// Lazily split a value stream into per-group chunks in unique-key
    /// order. Elements arriving before their sorted position is reached are
    /// buffered; worst case (last input element sorts first) buffers the
    /// whole stream.
    pub fn split_ordered<T, I>(&self, values: I) -> OrderedSplit<T, I::IntoIter>
    where
        I: IntoIterator<Item = T>,
    {
        OrderedSplit {
            source: values.into_iter().enumerate(),
            buffered: HashMap::new(),
            sorter: self.sorter.clone(),
            counts: self.count(),
            group: 0,
            cursor: 0,
        }
    }

    /// Lazily split a value stream, yielding each `(key row, chunk)` as soon
    /// as the group's count target is met, regardless of key order. Buffers
    /// only incomplete groups.
    pub fn split_unordered<T, I>(&self, values: I) -> UnorderedSplit<T, I::IntoIter>
    where
        I: IntoIterator<Item = T>,
    {
        let unique = self.unique();
        UnorderedSplit {
            source: values.into_iter(),
            buffered: HashMap::new(),
            inverse: self.inverse.clone(),
            counts: self.count(),
            key_rows: (0..self.groups()).map(|g| unique.row(g)).collect(),
            position: 0,
        }
    }

    // ── segmented reductions ───────────────────────────────────────────

    /// Fold an arbitrary function over each group, in unique-key order.
    pub fn reduce<T, R>(
        &self,
        values: &[T],
        f: impl Fn(&[T]) -> R,
    ) -> Result<(Keys, Vec<R>), GroupByError>
    where
        T: Clone,
    {
        self.check_len(values.len())?;
        let permuted = self.permuted(values);
        let reduced = self
            .segments()
            .map(|(start, stop)| f(&permuted[start..stop]))
            .collect();
        Ok((self.unique(), reduced))
    }

    pub fn sum(&self, values: &[f64]) -> Result<(Keys, Vec<f64>), GroupByError> {
        self.reduce(values, |group| group.iter().sum())
    }

    pub fn prod(&self, values: &[f64]) -> Result<(Keys, Vec<f64>), GroupByError> {
        self.reduce(values, |group| group.iter().product())
    }

    /// Per-group mean, optionally weighted: `sum(v*w) / sum(w)`.
    pub fn mean(
        &self,
        values: &[f64],
        weights: Option<&[f64]>,
    ) -> Result<(Keys, Vec<f64>), GroupByError> {
        Ok((self.unique(), self.mean_values(values, weights)?))
    }

    fn mean_values(&self, values: &[f64], weights: Option<&[f64]>) -> Result<Vec<f64>, GroupByError> {
        self.check_len(values.len())?;
        if let Some(w) = weights {
            self.check_len(w.len())?;
        }
        let means = self
            .segments()
            .map(|(start, stop)| {
                let mut num = 0.0;
                let mut den = 0.0;
                for i in start..stop {
                    let original = self.sorter[i];
                    let w = weights.map_or(1.0, |w| w[original]);
                    num += values[original] * w;
                    den += w;
                }
                num / den
            })
            .collect();
        Ok(means)
    }

    /// Per-group variance, two-pass, biased: the denominator is the group
    /// size (or weight sum) with no bias correction.
    pub fn var(
        &self,
        values: &[f64],
        weights: Option<&[f64]>,
    ) -> Result<(Keys, Vec<f64>), GroupByError> {
        let means = self.mean_values(values, weights)?;
        let reduced = self
            .segments()
            .enumerate()
            .map(|(g, (start, stop))| {
                let mut num = 0.0;
                let mut den = 0.0;
                for i in start..stop {
                    let original = self.sorter[i];
                    let w = weights.map_or(1.0, |w| w[original]);
                    let err = values[original] - means[g];
                    num += w * err * err;
                    den += w;
                }
                num / den
            })
            .collect();
        Ok((self.unique(), reduced))
    }

    pub fn std(
        &self,
        values: &[f64],
        weights: Option<&[f64]>,
    ) -> Result<(Keys, Vec<f64>), GroupByError> {
        let (unique, var) = self.var(values, weights)?;
        Ok((unique, var.into_iter().map(f64::sqrt).collect()))
    }

    /// Per-group median. Each group's values get a secondary in-segment
    /// ordering (group contiguity is never broken); even-sized groups
    /// average the two central elements when `average` is set and take the
    /// upper central element otherwise.
    pub fn median(&self, values: &[f64], average: bool) -> Result<(Keys, Vec<f64>), GroupByError> {
        self.reduce(values, |group| {
            let mut ordered = group.to_vec();
            ordered.sort_by(f64::total_cmp);
            let lo = (ordered.len() - 1) / 2;
            let hi = ordered.len() / 2;
            if average {
                (ordered[lo] + ordered[hi]) / 2.0
            } else {
                ordered[hi]
            }
        })
    }

    pub fn min(&self, values: &[f64]) -> Result<(Keys, Vec<f64>), GroupByError> {
        self.reduce(values, |group| {
            group.iter().copied().fold(f64::INFINITY, f64::min)
        })
    }

    pub fn max(&self, values: &[f64]) -> Result<(Keys, Vec<f64>), GroupByError> {
        self.reduce(values, |group| {
            group.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        })
    }

    /// Value at the first original occurrence of each key. Relies on the
    /// stable sort underneath the index.
    pub fn first<T: Clone>(&self, values: &[T]) -> Result<(Keys, Vec<T>), GroupByError> {
        self.check_len(values.len())?;
        let picked = self
            .index
            .start()
            .iter()
            .map(|&s| values[self.sorter[s]].clone())
            .collect();
        Ok((self.unique(), picked))
    }

    /// Value at the last original occurrence of each key.
    pub fn last<T: Clone>(&self, values: &[T]) -> Result<(Keys, Vec<T>), GroupByError> {
        self.check_len(values.len())?;
        let picked = self
            .index
            .stop()
            .iter()
            .map(|&s| values[self.sorter[s - 1]].clone())
            .collect();
        Ok((self.unique(), picked))
    }

    /// True for groups where any value is nonzero (`sum > 0` over the 0/1
    /// coercion).
    pub fn any(&self, values: &[f64]) -> Result<(Keys, Vec<bool>), GroupByError> {
        self.reduce(values, |group| group.iter().any(|&v| v != 0.0))
    }

    /// True for groups where every value is nonzero (`product != 0`).
    pub fn all(&self, values: &[f64]) -> Result<(Keys, Vec<bool>), GroupByError> {
        self.reduce(values, |group| group.iter().all(|&v| v != 0.0))
    }

    /// Original index of the first occurrence of each group's minimum.
    pub fn argmin(&self, values: &[f64]) -> Result<(Keys, Vec<usize>), GroupByError> {
        self.arg_extremum(values, |v, best| v.total_cmp(best).is_lt())
    }

    /// Original index of the first occurrence of each group's maximum.
    pub fn argmax(&self, values: &[f64]) -> Result<(Keys, Vec<usize>), GroupByError> {
        self.arg_extremum(values, |v, best| v.total_cmp(best).is_gt())
    }

    fn arg_extremum(
        &self,
        values: &[f64],
        beats: impl Fn(f64, &f64) -> bool,
    ) -> Result<(Keys, Vec<usize>), GroupByError> {
        self.check_len(values.len())?;
        let picked = self
            .segments()
            .map(|(start, stop)| {
                let mut best = values[self.sorter[start]];
                for i in start + 1..stop {
                    let v = values[self.sorter[i]];
                    if beats(v, &best) {
                        best = v;
                    }
                }
                // among positions attaining the extremum, the smallest
                // original index
                (start..stop)
                    .map(|i| self.sorter[i])
                    .filter(|&original| values[original].total_cmp(&best).is_eq())
                    .min()
                    .unwrap_or(self.sorter[start])
            })
            .collect();
        Ok((self.unique(), picked))
    }
}

/// Iterator behind [`GroupBy::split_ordered`].
pub struct OrderedSplit<T, I: Iterator<Item = T>> {
    source: std::iter::Enumerate<I>,
    buffered: HashMap<usize, T>,
    sorter: Vec<usize>,
    counts: Vec<usize>,
    group: usize,
    cursor: usize,
}

impl<T, I: Iterator<Item = T>> Iterator for OrderedSplit<T, I> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Vec<T>> {
        if self.group >= self.counts.len() {
            return None;
        }
        let take = self.counts[self.group];
        let mut chunk = Vec::with_capacity(take);
        for _ in 0..take {
            let target = self.sorter[self.cursor];
            self.cursor += 1;
            let value = match self.buffered.remove(&target) {
                Some(value) => value,
                None => loop {
                    // a short stream simply ends the iteration
                    let (i, value) = self.source.next()?;
                    if i == target {
                        break value;
                    }
                    self.buffered.insert(i, value);
                },
            };
            chunk.push(value);
        }
        self.group += 1;
        Some(chunk)
    }
}

/// Iterator behind [`GroupBy::split_unordered`].
pub struct UnorderedSplit<T, I: Iterator<Item = T>> {
    source: I,
    buffered: HashMap<usize, Vec<T>>,
    inverse: Vec<usize>,
    counts: Vec<usize>,
    key_rows: Vec<Vec<Key>>,
    position: usize,
}

impl<T, I: Iterator<Item = T>> Iterator for UnorderedSplit<T, I> {
    type Item = (Vec<Key>, Vec<T>);

    fn next(&mut self) -> Option<(Vec<Key>, Vec<T>)> {
        loop {
            if self.position >= self.inverse.len() {
                return None;
            }
            let value = self.source.next()?;
            let group = self.inverse[self.position];
            self.position += 1;
            let chunk = self.buffered.entry(group).or_default();
            chunk.push(value);
            if chunk.len() == self.counts[group] {
                let chunk = self.buffered.remove(&group).unwrap_or_default();
                return Some((self.key_rows[group].clone(), chunk));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{group_apply, group_by, GroupBy, GroupByError};
    use ki_types::{Axis, Key, Keys};

    fn grouping(keys: Vec<i64>) -> GroupBy {
        group_by(Keys::from_i64(keys), Axis(0)).expect("group_by")
    }

    #[test]
    fn median_averages_even_groups() {
        let g = grouping(vec![1, 1, 2, 2, 2]);
        let (unique, medians) = g
            .median(&[10.0, 20.0, 1.0, 2.0, 3.0], true)
            .expect("median");
        assert_eq!(unique, Keys::from_i64(vec![1, 2]));
        assert_eq!(medians, vec![15.0, 2.0]);
    }

    #[test]
    fn median_without_averaging_takes_upper_central() {
        let g = grouping(vec![1, 1]);
        let (_, medians) = g.median(&[10.0, 20.0], false).expect("median");
        assert_eq!(medians, vec![20.0]);
    }

    #[test]
    fn sum_prod_mean_over_groups() {
        let g = grouping(vec![2, 1, 2, 1]);
        let values = [1.0, 10.0, 3.0, 30.0];
        assert_eq!(g.sum(&values).expect("sum").1, vec![40.0, 4.0]);
        assert_eq!(g.prod(&values).expect("prod").1, vec![300.0, 3.0]);
        assert_eq!(g.mean(&values, None).expect("mean").1, vec![20.0, 2.0]);
    }

    #[test]
    fn variance_is_biased() {
        // group sizes 2 and 1; biased variance of [1, 3] is 1.0, of [5] is 0.
        let g = grouping(vec![1, 1, 2]);
        let (_, var) = g.var(&[1.0, 3.0, 5.0], None).expect("var");
        assert_eq!(var, vec![1.0, 0.0]);
        let (_, std) = g.std(&[1.0, 3.0, 5.0], None).expect("std");
        assert_eq!(std, vec![1.0, 0.0]);
    }

    #[test]
    fn unit_weights_match_unweighted() {
        let g = grouping(vec![1, 2, 1, 2, 1]);
        let values = [3.0, 8.0, 5.0, 2.0, 7.0];
        let unit = [1.0; 5];
        assert_eq!(
            g.mean(&values, None).expect("mean").1,
            g.mean(&values, Some(&unit)).expect("weighted mean").1
        );
        assert_eq!(
            g.var(&values, None).expect("var").1,
            g.var(&values, Some(&unit)).expect("weighted var").1
        );
    }

    #[test]
    fn weighted_mean_uses_weight_sums() {
        let g = grouping(vec![1, 1]);
        let (_, mean) = g.mean(&[10.0, 40.0], Some(&[3.0, 1.0])).expect("mean");
        assert_eq!(mean, vec![(30.0 + 40.0) / 4.0]);
    }

    #[test]
    fn first_and_last_respect_original_order() {
        let g = grouping(vec![2, 1, 2, 1]);
        let values = ["a", "b", "c", "d"];
        assert_eq!(g.first(&values).expect("first").1, vec!["b", "a"]);
        assert_eq!(g.last(&values).expect("last").1, vec!["d", "c"]);
    }

    #[test]
    fn min_max_any_all() {
        let g = grouping(vec![1, 1, 2, 2]);
        let values = [3.0, -1.0, 0.0, 0.0];
        assert_eq!(g.min(&values).expect("min").1, vec![-1.0, 0.0]);
        assert_eq!(g.max(&values).expect("max").1, vec![3.0, 0.0]);
        assert_eq!(g.any(&values).expect("any").1, vec![true, false]);
        assert_eq!(g.all(&values).expect("all").1, vec![false, false]);
    }

    #[test]
    fn argmin_returns_first_original_occurrence() {
        // key 1 occurs at 0, 2, 4 with values 5, 1, 1: tie on the minimum,
        // first original position is 2.
        let g = grouping(vec![1, 2, 1, 2, 1]);
        let values = [5.0, 9.0, 1.0, 9.0, 1.0];
        assert_eq!(g.argmin(&values).expect("argmin").1, vec![2, 1]);
        assert_eq!(g.argmax(&values).expect("argmax").1, vec![0, 1]);
    }

    #[test]
    fn split_as_array_requires_uniform_groups() {
        let g = grouping(vec![1, 2, 1, 2]);
        let chunks = g.split_as_array(&[10, 20, 30, 40]).expect("split");
        assert_eq!(chunks, vec![vec![10, 30], vec![20, 40]]);

        let skewed = grouping(vec![1, 1, 2]);
        assert_eq!(
            skewed.split_as_array(&[1, 2, 3]).unwrap_err(),
            GroupByError::NonUniformGroups
        );
        // the list split remains valid on the same grouping
        assert_eq!(
            skewed.split_as_list(&[1, 2, 3]).expect("list"),
            vec![vec![1, 2], vec![3]]
        );
    }

    #[test]
    fn lazy_splits_agree_with_eager_list_split() {
        let keys = vec![3, 1, 3, 2, 1, 3];
        let values = [0, 1, 2, 3, 4, 5];
        let g = grouping(keys);
        let eager = g.split_as_list(&values).expect("list");

        let ordered: Vec<Vec<i32>> = g.split_ordered(values.iter().copied()).collect();
        assert_eq!(ordered, eager);

        let mut unordered: Vec<(Vec<Key>, Vec<i32>)> =
            g.split_unordered(values.iter().copied()).collect();
        assert_eq!(unordered.len(), g.groups());
        unordered.sort_by(|a, b| a.0.cmp(&b.0));
        let unique = g.unique();
        for (g_id, (key_row, chunk)) in unordered.iter().enumerate() {
            assert_eq!(key_row, &unique.row(g_id));
            assert_eq!(chunk, &eager[g_id]);
        }
    }

    #[test]
    fn unordered_split_yields_completed_groups_early() {
        // group 1 completes after the third element, before group 3 does
        let g = grouping(vec![3, 1, 1, 3]);
        let first = g
            .split_unordered([9, 7, 8, 6].into_iter())
            .next()
            .expect("one group");
        assert_eq!(first, (vec![Key::from(1_i64)], vec![7, 8]));
    }

    #[test]
    fn empty_input_reduces_to_empty_output() {
        let g = grouping(vec![]);
        let (unique, sums) = g.sum(&[]).expect("sum");
        assert_eq!(unique, Keys::Flat(vec![]));
        assert!(sums.is_empty());
        assert!(g.split_as_list::<f64>(&[]).expect("split").is_empty());
        let (_, medians) = g.median(&[], true).expect("median");
        assert!(medians.is_empty());
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let g = grouping(vec![1, 2]);
        assert_eq!(
            g.sum(&[1.0]).unwrap_err(),
            GroupByError::LengthMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn group_apply_pairs_keys_with_reductions() {
        let pairs = group_apply(
            Keys::from_utf8(vec!["b", "a", "b"]),
            Axis(0),
            &[1.0, 2.0, 3.0],
            |group| group.iter().sum::<f64>(),
        )
        .expect("group_apply");
        assert_eq!(
            pairs,
            vec![
                (vec![Key::from("a")], 2.0),
                (vec![Key::from("b")], 4.0),
            ]
        );
    }
}
