#![forbid(unsafe_code)]

//! Positional lookup and counting built on the key-indexing engine:
//! `indices` (binary-search lookup with three missing-key policies),
//! `count`, `count_table`, `multiplicity` and `rank`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ki_codec::encode_rows;
use ki_index::{as_index, Index, IndexError, IndexOptions, IndexSource, KeyIndex};
use ki_types::{Axis, Key, Keys, ShapeOrTypeError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FuncsError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    ShapeOrType(#[from] ShapeOrTypeError),
    #[error("key {key} at position {position} not present in lookup target")]
    KeyNotFound { position: usize, key: String },
    #[error("invalid value {value} for option {option}")]
    InvalidOption { option: &'static str, value: String },
    #[error("composite key tuples are not supported by indices")]
    CompositeKeys,
    #[error("index does not carry position mappings")]
    MissingPositions,
}

/// What to do when an element of the query is absent from the lookup target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Fail with [`FuncsError::KeyNotFound`].
    Raise,
    /// Caller asserts containment; positions are returned unverified.
    Ignore,
    /// Absent elements become masked-out entries.
    Mask,
}

impl FromStr for MissingPolicy {
    type Err = FuncsError;

    fn from_str(s: &str) -> Result<Self, FuncsError> {
        match s {
            "raise" => Ok(Self::Raise),
            "ignore" => Ok(Self::Ignore),
            "mask" => Ok(Self::Mask),
            other => Err(FuncsError::InvalidOption {
                option: "missing",
                value: other.to_owned(),
            }),
        }
    }
}

/// Result of [`indices`]: dense positions for the raise/ignore policies, a
/// masked array for the mask policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Located {
    Dense(Vec<usize>),
    Masked(Vec<Option<usize>>),
}

fn format_row(row: &[Key]) -> String {
    let fields: Vec<String> = row.iter().map(ToString::to_string).collect();
    fields.join(", ")
}

/// For each element of `b`, its position in `a`, found by binary search of
/// the left insertion point against `a`'s sorted keys and mapped back
/// through `a`'s sorter. The stable sort makes the reported position the
/// first original occurrence. Composite column tuples are unsupported.
pub fn indices(
    a: impl Into<IndexSource>,
    b: &Keys,
    axis: Axis,
    missing: MissingPolicy,
) -> Result<Located, FuncsError> {
    let a_index = as_index(a, axis, IndexOptions::default())?;
    // (left insertion point, exact match) per query element
    let lookups: Vec<(usize, bool)> = match &a_index {
        Index::Lex(_) => return Err(FuncsError::CompositeKeys),
        Index::Base(_) => return Err(FuncsError::MissingPositions),
        Index::Arg(ix) => {
            let Keys::Flat(queries) = b else {
                return Err(ShapeOrTypeError::ShapeMismatch.into());
            };
            let sorted = ix.sorted_keys();
            queries
                .iter()
                .map(|q| {
                    let at = sorted.partition_point(|k| k < q);
                    (at, at < sorted.len() && &sorted[at] == q)
                })
                .collect()
        }
        Index::Row(ix) => {
            let table = match b {
                Keys::Table(table) if axis.0 == 1 => table.transposed()?,
                Keys::Table(table) => table.clone(),
                _ => return Err(ShapeOrTypeError::ShapeMismatch.into()),
            };
            if table.cols() != ix.table().cols() {
                return Err(ShapeOrTypeError::WidthMismatch {
                    left: ix.table().cols(),
                    right: table.cols(),
                }
                .into());
            }
            let sorted = ix.sorted_tokens();
            encode_rows(&table)
                .iter()
                .map(|q| {
                    let at = sorted.partition_point(|t| t < q);
                    (at, at < sorted.len() && &sorted[at] == q)
                })
                .collect()
        }
    };

    let sorter = a_index.sorter().ok_or(FuncsError::MissingPositions)?;
    let not_found = |position: usize| FuncsError::KeyNotFound {
        position,
        key: format_row(&b.row(position)),
    };
    match missing {
        MissingPolicy::Raise => {
            let mut out = Vec::with_capacity(lookups.len());
            for (position, (at, found)) in lookups.into_iter().enumerate() {
                if !found {
                    return Err(not_found(position));
                }
                out.push(sorter[at]);
            }
            Ok(Located::Dense(out))
        }
        MissingPolicy::Ignore => {
            // unverified: absent keys land on their clamped insertion point
            let mut out = Vec::with_capacity(lookups.len());
            for (position, (at, _)) in lookups.into_iter().enumerate() {
                match sorter.get(at.min(sorter.len().saturating_sub(1))) {
                    Some(&original) => out.push(original),
                    None => return Err(not_found(position)),
                }
            }
            Ok(Located::Dense(out))
        }
        MissingPolicy::Mask => Ok(Located::Masked(
            lookups
                .into_iter()
                .map(|(at, found)| found.then(|| sorter[at]))
                .collect(),
        )),
    }
}

/// Unique keys and how often each occurs.
pub fn count(keys: impl Into<IndexSource>, axis: Axis) -> Result<(Keys, Vec<usize>), FuncsError> {
    let index = as_index(
        keys,
        axis,
        IndexOptions {
            base: true,
            stable: false,
        },
    )?;
    Ok((index.unique(), index.count()))
}

/// Dense n-dimensional cross-tabulation, row-major, zero-filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountTable {
    shape: Vec<usize>,
    data: Vec<u64>,
}

impl CountTable {
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn get(&self, at: &[usize]) -> u64 {
        let mut offset = 0;
        for (dim, &i) in at.iter().enumerate() {
            offset = offset * self.shape[dim] + i;
        }
        self.data[offset]
    }

    #[must_use]
    pub fn data(&self) -> &[u64] {
        &self.data
    }
}

/// Cross-tabulate parallel flat columns: the cell at each combination of
/// per-column unique ids counts its co-occurrences.
pub fn count_table(columns: &[Vec<Key>]) -> Result<(Vec<Vec<Key>>, CountTable), FuncsError> {
    if columns.is_empty() {
        return Ok((
            Vec::new(),
            CountTable {
                shape: Vec::new(),
                data: Vec::new(),
            },
        ));
    }
    let rows = columns[0].len();
    for column in columns {
        if column.len() != rows {
            return Err(ShapeOrTypeError::LengthMismatch {
                left: rows,
                right: column.len(),
            }
            .into());
        }
    }

    let mut uniques = Vec::with_capacity(columns.len());
    let mut inverses = Vec::with_capacity(columns.len());
    let mut shape = Vec::with_capacity(columns.len());
    for column in columns {
        let index = as_index(column.clone(), Axis(0), IndexOptions::default())?;
        let Keys::Flat(unique) = index.unique() else {
            return Err(ShapeOrTypeError::ShapeMismatch.into());
        };
        shape.push(index.groups());
        inverses.push(index.inverse().ok_or(FuncsError::MissingPositions)?);
        uniques.push(unique);
    }

    let cells = shape.iter().product();
    let mut data = vec![0_u64; cells];
    for row in 0..rows {
        let mut offset = 0;
        for (dim, inverse) in inverses.iter().enumerate() {
            offset = offset * shape[dim] + inverse[row];
        }
        data[offset] += 1;
    }
    Ok((uniques, CountTable { shape, data }))
}

/// Per-element count of occurrences of its own key.
pub fn multiplicity(keys: impl Into<IndexSource>, axis: Axis) -> Result<Vec<usize>, FuncsError> {
    let index = as_index(keys, axis, IndexOptions::default())?;
    let count = index.count();
    let inverse = index.inverse().ok_or(FuncsError::MissingPositions)?;
    Ok(inverse.into_iter().map(|g| count[g]).collect())
}

/// Per-element position in sorted order.
pub fn rank(keys: impl Into<IndexSource>, axis: Axis) -> Result<Vec<usize>, FuncsError> {
    let index = as_index(keys, axis, IndexOptions::default())?;
    index.rank().ok_or(FuncsError::MissingPositions)
}
