#![forbid(unsafe_code)]

//! Key-indexing engine: precomputed sorts over key sequences exposing group
//! boundaries, per-group counts and position mappings. Four variants share
//! the [`KeyIndex`] contract; the indirectly sorted ones additionally
//! implement [`PositionIndex`]. [`as_index`] performs input-driven variant
//! selection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ki_codec::{decode_rows, encode_rows, CodecError, RowToken};
use ki_types::{uniform_dtype, Axis, Key, KeyColumn, KeyTable, Keys, ShapeOrTypeError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error(transparent)]
    ShapeOrType(#[from] ShapeOrTypeError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("invalid value {value} for option {option}")]
    InvalidOption { option: &'static str, value: String },
}

/// Capability shared by every index variant: group boundaries and everything
/// derivable from them.
pub trait KeyIndex {
    /// Monotone group-boundary offsets into sorted order; `slices[0] == 0`,
    /// `slices[last] == len`. A single `[0]` for empty input.
    fn slices(&self) -> &[usize];

    /// Unique keys, one logical row per group, in sorted order.
    fn unique(&self) -> Keys;

    fn len(&self) -> usize {
        *self.slices().last().unwrap_or(&0)
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start offset of every group.
    fn start(&self) -> &[usize] {
        let slices = self.slices();
        &slices[..slices.len().saturating_sub(1)]
    }

    /// Stop offset of every group.
    fn stop(&self) -> &[usize] {
        let slices = self.slices();
        if slices.len() > 1 { &slices[1..] } else { &[] }
    }

    fn groups(&self) -> usize {
        self.slices().len().saturating_sub(1)
    }

    /// Occurrences of each unique key; sums to `len`.
    fn count(&self) -> Vec<usize> {
        self.slices().windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// True when all groups share one size (vacuously true for no groups).
    fn uniform(&self) -> bool {
        let count = self.count();
        count.windows(2).all(|w| w[0] == w[1])
    }

    /// Group id of each sorted position.
    fn sorted_group_ids(&self) -> Vec<usize> {
        let mut ids = vec![0; self.len()];
        for (g, w) in self.slices().windows(2).enumerate() {
            for id in &mut ids[w[0]..w[1]] {
                *id = g;
            }
        }
        ids
    }
}

/// Extended capability of the indirectly sorted variants: the permutation
/// relating original and sorted order, and its derivatives.
pub trait PositionIndex: KeyIndex {
    /// Permutation with `sorted[i] == keys[sorter[i]]`.
    fn sorter(&self) -> &[usize];

    /// Original position -> group id; satisfies `unique[inverse] == keys`.
    fn inverse(&self) -> Vec<usize> {
        let ids = self.sorted_group_ids();
        let mut inverse = vec![0; self.len()];
        for (i, &original) in self.sorter().iter().enumerate() {
            inverse[original] = ids[i];
        }
        inverse
    }

    /// Original position -> sorted position; a permutation of `[0, len)`.
    fn rank(&self) -> Vec<usize> {
        let mut rank = vec![0; self.len()];
        for (i, &original) in self.sorter().iter().enumerate() {
            rank[original] = i;
        }
        rank
    }

    /// Original position of the first occurrence of each unique key.
    /// Meaningful as "first" only under a stable sort.
    fn first_occurrence(&self) -> Vec<usize> {
        self.start().iter().map(|&s| self.sorter()[s]).collect()
    }
}

fn argsort_by<T: Ord>(items: &[T], stable: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    if stable {
        order.sort_by(|&a, &b| items[a].cmp(&items[b]));
    } else {
        order.sort_unstable_by(|&a, &b| items[a].cmp(&items[b]));
    }
    order
}

/// Shared boundary derivation: `[0] ++ (adjacent-inequality positions)+1 ++ [n]`.
fn boundary_slices<T: PartialEq>(sorted: &[T]) -> Vec<usize> {
    if sorted.is_empty() {
        return vec![0];
    }
    let mut slices = Vec::with_capacity(2);
    slices.push(0);
    for i in 1..sorted.len() {
        if sorted[i - 1] != sorted[i] {
            slices.push(i);
        }
    }
    slices.push(sorted.len());
    slices
}

/// Minimal index: direct sort, no permutation stored. Cheapest construction;
/// cannot report original positions. Retains its input keys so it can be
/// upgraded by [`as_index`] when positions turn out to be needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseIndex {
    keys: Vec<Key>,
    sorted: Vec<Key>,
    slices: Vec<usize>,
}

impl BaseIndex {
    pub fn new(keys: Vec<Key>) -> Result<Self, IndexError> {
        uniform_dtype(&keys)?;
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        let slices = boundary_slices(&sorted);
        Ok(Self { keys, sorted, slices })
    }

    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    #[must_use]
    pub fn sorted_keys(&self) -> &[Key] {
        &self.sorted
    }
}

impl KeyIndex for BaseIndex {
    fn slices(&self) -> &[usize] {
        &self.slices
    }

    fn unique(&self) -> Keys {
        Keys::Flat(self.start().iter().map(|&s| self.sorted[s].clone()).collect())
    }
}

/// Indirect index over flat keys. With `stable == true` ties preserve input
/// order, which is what gives `first`/`last` and index-returning unique their
/// first-occurrence meaning; with `stable == false` any correct sort goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgIndex {
    keys: Vec<Key>,
    sorter: Vec<usize>,
    sorted: Vec<Key>,
    slices: Vec<usize>,
    stable: bool,
}

impl ArgIndex {
    pub fn new(keys: Vec<Key>, stable: bool) -> Result<Self, IndexError> {
        uniform_dtype(&keys)?;
        let sorter = argsort_by(&keys, stable);
        let sorted: Vec<Key> = sorter.iter().map(|&i| keys[i].clone()).collect();
        let slices = boundary_slices(&sorted);
        Ok(Self {
            keys,
            sorter,
            sorted,
            slices,
            stable,
        })
    }

    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    #[must_use]
    pub fn sorted_keys(&self) -> &[Key] {
        &self.sorted
    }

    #[must_use]
    pub fn stable(&self) -> bool {
        self.stable
    }
}

impl KeyIndex for ArgIndex {
    fn slices(&self) -> &[usize] {
        &self.slices
    }

    fn unique(&self) -> Keys {
        Keys::Flat(self.start().iter().map(|&s| self.sorted[s].clone()).collect())
    }
}

impl PositionIndex for ArgIndex {
    fn sorter(&self) -> &[usize] {
        &self.sorter
    }
}

/// Index over the rows of a table: each row passes through the codec to one
/// token, then an indirect token sort. `unique` decodes the leading token of
/// each group back into rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIndex {
    table: KeyTable,
    sorter: Vec<usize>,
    sorted_tokens: Vec<RowToken>,
    slices: Vec<usize>,
    unique: KeyTable,
}

impl RowIndex {
    pub fn new(table: KeyTable, stable: bool) -> Result<Self, IndexError> {
        let tokens = encode_rows(&table);
        let sorter = argsort_by(&tokens, stable);
        let sorted_tokens: Vec<RowToken> = sorter.iter().map(|i| tokens[*i].clone()).collect();
        let slices = boundary_slices(&sorted_tokens);
        let leading: Vec<RowToken> = slices[..slices.len().saturating_sub(1)]
            .iter()
            .map(|&s| sorted_tokens[s].clone())
            .collect();
        let unique = decode_rows(&leading, table.cols())?;
        Ok(Self {
            table,
            sorter,
            sorted_tokens,
            slices,
            unique,
        })
    }

    #[must_use]
    pub fn table(&self) -> &KeyTable {
        &self.table
    }

    #[must_use]
    pub fn sorted_tokens(&self) -> &[RowToken] {
        &self.sorted_tokens
    }
}

impl KeyIndex for RowIndex {
    fn slices(&self) -> &[usize] {
        &self.slices
    }

    fn unique(&self) -> Keys {
        Keys::Table(self.unique.clone())
    }
}

impl PositionIndex for RowIndex {
    fn sorter(&self) -> &[usize] {
        &self.sorter
    }
}

/// Sortable stand-in for one composite column: flat columns compare by key,
/// table columns by the group id of their row token (rows that compare equal
/// share an id, and ids order like the tokens).
#[derive(Debug, Clone)]
enum ColumnRepr {
    Plain(Vec<Key>),
    Reduced(Vec<usize>),
}

impl ColumnRepr {
    fn compare(&self, a: usize, b: usize) -> std::cmp::Ordering {
        match self {
            Self::Plain(keys) => keys[a].cmp(&keys[b]),
            Self::Reduced(ids) => ids[a].cmp(&ids[b]),
        }
    }

    fn differ(&self, a: usize, b: usize) -> bool {
        self.compare(a, b).is_ne()
    }
}

/// Index over a tuple of parallel columns forming one composite key per row.
/// Ordering is lexicographic with the **leftmost column most significant**;
/// this direction is externally visible in `unique` and is fixed by design.
/// Group boundaries are the OR of per-column adjacent inequality.
#[derive(Debug, Clone)]
pub struct LexIndex {
    columns: Vec<KeyColumn>,
    sorter: Vec<usize>,
    slices: Vec<usize>,
}

impl LexIndex {
    pub fn new(columns: Vec<KeyColumn>, stable: bool) -> Result<Self, IndexError> {
        let rows = columns.first().map_or(0, KeyColumn::len);
        for column in &columns {
            if column.len() != rows {
                return Err(ShapeOrTypeError::LengthMismatch {
                    left: rows,
                    right: column.len(),
                }
                .into());
            }
        }
        let reprs = columns
            .iter()
            .map(|column| match column {
                KeyColumn::Flat(keys) => {
                    uniform_dtype(keys)?;
                    Ok(ColumnRepr::Plain(keys.clone()))
                }
                // Multi-dimensional columns bootstrap through a nested token
                // index; the inverse mapping is their primitive stand-in.
                KeyColumn::Table(table) => {
                    let nested = RowIndex::new(table.clone(), true)?;
                    Ok(ColumnRepr::Reduced(nested.inverse()))
                }
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        let compare = |&a: &usize, &b: &usize| {
            reprs
                .iter()
                .map(|repr| repr.compare(a, b))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        };
        let mut sorter: Vec<usize> = (0..rows).collect();
        if stable {
            sorter.sort_by(compare);
        } else {
            sorter.sort_unstable_by(compare);
        }

        let slices = if rows == 0 {
            vec![0]
        } else {
            let mut slices = vec![0];
            for i in 1..rows {
                let (a, b) = (sorter[i - 1], sorter[i]);
                if reprs.iter().any(|repr| repr.differ(a, b)) {
                    slices.push(i);
                }
            }
            slices.push(rows);
            slices
        };

        Ok(Self {
            columns,
            sorter,
            slices,
        })
    }

    #[must_use]
    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }
}

impl KeyIndex for LexIndex {
    fn slices(&self) -> &[usize] {
        &self.slices
    }

    fn unique(&self) -> Keys {
        let picks: Vec<usize> = self.start().iter().map(|&s| self.sorter[s]).collect();
        Keys::Columns(self.columns.iter().map(|c| c.select_rows(&picks)).collect())
    }
}

impl PositionIndex for LexIndex {
    fn sorter(&self) -> &[usize] {
        &self.sorter
    }
}

/// Any index variant, as produced by [`as_index`].
#[derive(Debug, Clone)]
pub enum Index {
    Base(BaseIndex),
    Arg(ArgIndex),
    Row(RowIndex),
    Lex(LexIndex),
}

impl KeyIndex for Index {
    fn slices(&self) -> &[usize] {
        match self {
            Self::Base(ix) => ix.slices(),
            Self::Arg(ix) => ix.slices(),
            Self::Row(ix) => ix.slices(),
            Self::Lex(ix) => ix.slices(),
        }
    }

    fn unique(&self) -> Keys {
        match self {
            Self::Base(ix) => ix.unique(),
            Self::Arg(ix) => ix.unique(),
            Self::Row(ix) => ix.unique(),
            Self::Lex(ix) => ix.unique(),
        }
    }
}

impl Index {
    /// The position-mapping view, absent for the minimal variant.
    #[must_use]
    pub fn positions(&self) -> Option<&dyn PositionIndex> {
        match self {
            Self::Base(_) => None,
            Self::Arg(ix) => Some(ix),
            Self::Row(ix) => Some(ix),
            Self::Lex(ix) => Some(ix),
        }
    }

    #[must_use]
    pub fn sorter(&self) -> Option<&[usize]> {
        self.positions().map(PositionIndex::sorter)
    }

    #[must_use]
    pub fn inverse(&self) -> Option<Vec<usize>> {
        self.positions().map(PositionIndex::inverse)
    }

    #[must_use]
    pub fn rank(&self) -> Option<Vec<usize>> {
        self.positions().map(PositionIndex::rank)
    }

    #[must_use]
    pub fn first_occurrence(&self) -> Option<Vec<usize>> {
        self.positions().map(PositionIndex::first_occurrence)
    }

    /// The original key sequence this index was built over.
    #[must_use]
    pub fn keys(&self) -> Keys {
        match self {
            Self::Base(ix) => Keys::Flat(ix.keys().to_vec()),
            Self::Arg(ix) => Keys::Flat(ix.keys().to_vec()),
            Self::Row(ix) => Keys::Table(ix.table().clone()),
            Self::Lex(ix) => Keys::Columns(ix.columns().to_vec()),
        }
    }
}

/// Construction options: `base` requests the cheapest variant (no position
/// mappings); `stable` demands order-preserving ties, mandatory whenever
/// first-occurrence semantics are relied on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub base: bool,
    pub stable: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            base: false,
            stable: true,
        }
    }
}

/// Raw material for [`as_index`]: either a key sequence or an index built
/// earlier, which is reused (and upgraded if position mappings are needed).
#[derive(Debug, Clone)]
pub enum IndexSource {
    Keys(Keys),
    Index(Index),
}

impl From<Keys> for IndexSource {
    fn from(keys: Keys) -> Self {
        Self::Keys(keys)
    }
}

impl From<Index> for IndexSource {
    fn from(index: Index) -> Self {
        Self::Index(index)
    }
}

impl From<Vec<Key>> for IndexSource {
    fn from(keys: Vec<Key>) -> Self {
        Self::Keys(Keys::Flat(keys))
    }
}

impl From<KeyTable> for IndexSource {
    fn from(table: KeyTable) -> Self {
        Self::Keys(Keys::Table(table))
    }
}

impl From<Vec<KeyColumn>> for IndexSource {
    fn from(columns: Vec<KeyColumn>) -> Self {
        Self::Keys(Keys::Columns(columns))
    }
}

fn require_axis(axis: Axis, max: usize) -> Result<(), IndexError> {
    if axis.0 > max {
        return Err(IndexError::InvalidOption {
            option: "axis",
            value: axis.0.to_string(),
        });
    }
    Ok(())
}

/// Casting rules from raw input to an index.
///
/// An existing index is reused, upgrading a minimal one when positions are
/// required. Column tuples become a [`LexIndex`], tables a [`RowIndex`]
/// (oriented by `axis`), flat sequences a [`BaseIndex`] or [`ArgIndex`]
/// depending on `options.base`. The axis is always explicit; nothing is
/// silently flattened.
pub fn as_index(
    source: impl Into<IndexSource>,
    axis: Axis,
    options: IndexOptions,
) -> Result<Index, IndexError> {
    match source.into() {
        IndexSource::Index(index) => match index {
            Index::Base(base) if !options.base => Ok(Index::Arg(ArgIndex::new(
                base.keys().to_vec(),
                options.stable,
            )?)),
            other => Ok(other),
        },
        IndexSource::Keys(Keys::Columns(columns)) => {
            require_axis(axis, 0)?;
            Ok(Index::Lex(LexIndex::new(columns, options.stable)?))
        }
        IndexSource::Keys(Keys::Table(table)) => {
            require_axis(axis, 1)?;
            let table = if axis.0 == 1 { table.transposed()? } else { table };
            Ok(Index::Row(RowIndex::new(table, options.stable)?))
        }
        IndexSource::Keys(Keys::Flat(keys)) => {
            require_axis(axis, 0)?;
            if options.base {
                Ok(Index::Base(BaseIndex::new(keys)?))
            } else {
                Ok(Index::Arg(ArgIndex::new(keys, options.stable)?))
            }
        }
    }
}
