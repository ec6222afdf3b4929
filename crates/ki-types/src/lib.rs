#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyDType {
    Bool,
    Int64,
    Float64,
    Utf8,
}

/// One atomic, comparable key value.
///
/// The order is total: floats compare by `total_cmp`, so NaN compares equal
/// to itself and every pair of keys is ordered. Cross-dtype comparison is
/// defined (by dtype rank) so that `Ord` holds unconditionally, but key
/// sequences mixing dtypes are rejected before any index is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Key {
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl Key {
    #[must_use]
    pub fn dtype(&self) -> KeyDType {
        match self {
            Self::Bool(_) => KeyDType::Bool,
            Self::Int64(_) => KeyDType::Int64,
            Self::Float64(_) => KeyDType::Float64,
            Self::Utf8(_) => KeyDType::Utf8,
        }
    }

    fn dtype_rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int64(_) => 1,
            Self::Float64(_) => 2,
            Self::Utf8(_) => 3,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            // Bit equality keeps Eq reflexive for NaN and consistent with Ord.
            (Self::Float64(a), Self::Float64(b)) => a.to_bits() == b.to_bits(),
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dtype_rank().hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.to_bits().hash(state),
            Self::Utf8(v) => v.hash(state),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Float64(a), Self::Float64(b)) => a.total_cmp(b),
            (Self::Utf8(a), Self::Utf8(b)) => a.cmp(b),
            _ => self.dtype_rank().cmp(&other.dtype_rank()),
        }
    }
}

impl From<bool> for Key {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Key {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

/// Which dimension of the input enumerates the keys. Always explicit; there
/// is no flatten default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis(pub usize);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeOrTypeError {
    #[error("key sequence mixes dtypes: expected {expected:?}, found {found:?} at position {position}")]
    MixedDType {
        expected: KeyDType,
        found: KeyDType,
        position: usize,
    },
    #[error("table data of length {len} is not divisible into rows of width {cols}")]
    RaggedRows { len: usize, cols: usize },
    #[error("row {row} has width {found}, expected {expected}")]
    RowWidthMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("cell at row {row}, column {column} has dtype {found:?}, expected {expected:?}")]
    CellDType {
        row: usize,
        column: usize,
        expected: KeyDType,
        found: KeyDType,
    },
    #[error("cannot transpose a table with heterogeneous column dtypes")]
    HeterogeneousTranspose,
    #[error("parallel sequences have mismatched lengths: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("cannot concatenate tables of width {left} and {right}")]
    WidthMismatch { left: usize, right: usize },
    #[error("cannot concatenate key sequences of different shapes")]
    ShapeMismatch,
    #[error("composite operands have {left} and {right} columns")]
    ColumnCountMismatch { left: usize, right: usize },
}

/// Verify that a flat key sequence uses a single dtype; returns it, or `None`
/// for an empty sequence.
pub fn uniform_dtype(keys: &[Key]) -> Result<Option<KeyDType>, ShapeOrTypeError> {
    let Some(first) = keys.first() else {
        return Ok(None);
    };
    let expected = first.dtype();
    for (position, key) in keys.iter().enumerate().skip(1) {
        let found = key.dtype();
        if found != expected {
            return Err(ShapeOrTypeError::MixedDType {
                expected,
                found,
                position,
            });
        }
    }
    Ok(Some(expected))
}

/// Dense rows x cols matrix of keys with a per-column dtype signature.
/// Every row has the same width and column dtypes (fixed-shape rows).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTable {
    data: Vec<Key>,
    rows: usize,
    cols: usize,
    signature: Vec<KeyDType>,
}

impl KeyTable {
    /// Build a table from row-major data with the given row width. The
    /// signature is inferred from the first row and enforced on the rest.
    pub fn new(data: Vec<Key>, cols: usize) -> Result<Self, ShapeOrTypeError> {
        if cols == 0 {
            if data.is_empty() {
                return Ok(Self {
                    data,
                    rows: 0,
                    cols: 0,
                    signature: Vec::new(),
                });
            }
            return Err(ShapeOrTypeError::RaggedRows {
                len: data.len(),
                cols,
            });
        }
        if data.len() % cols != 0 {
            return Err(ShapeOrTypeError::RaggedRows {
                len: data.len(),
                cols,
            });
        }
        let rows = data.len() / cols;
        let signature: Vec<KeyDType> = if rows == 0 {
            Vec::new()
        } else {
            data[..cols].iter().map(Key::dtype).collect()
        };
        for row in 1..rows {
            for column in 0..cols {
                let found = data[row * cols + column].dtype();
                if found != signature[column] {
                    return Err(ShapeOrTypeError::CellDType {
                        row,
                        column,
                        expected: signature[column],
                        found,
                    });
                }
            }
        }
        Ok(Self {
            data,
            rows,
            cols,
            signature,
        })
    }

    pub fn from_rows(rows: Vec<Vec<Key>>) -> Result<Self, ShapeOrTypeError> {
        let cols = rows.first().map_or(0, Vec::len);
        for (row, r) in rows.iter().enumerate() {
            if r.len() != cols {
                return Err(ShapeOrTypeError::RowWidthMismatch {
                    row,
                    expected: cols,
                    found: r.len(),
                });
            }
        }
        Self::new(rows.into_iter().flatten().collect(), cols)
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    #[must_use]
    pub fn signature(&self) -> &[KeyDType] {
        &self.signature
    }

    #[must_use]
    pub fn row(&self, i: usize) -> &[Key] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[Key]> {
        self.data.chunks_exact(self.cols.max(1)).take(self.rows)
    }

    #[must_use]
    pub fn select_rows(&self, picks: &[usize]) -> Self {
        let data: Vec<Key> = picks
            .iter()
            .flat_map(|&i| self.row(i).iter().cloned())
            .collect();
        Self {
            data,
            rows: picks.len(),
            cols: self.cols,
            signature: if picks.is_empty() {
                Vec::new()
            } else {
                self.signature.clone()
            },
        }
    }

    /// True when every column shares one dtype; only such tables can be
    /// transposed.
    #[must_use]
    pub fn has_uniform_signature(&self) -> bool {
        self.signature.windows(2).all(|w| w[0] == w[1])
    }

    pub fn transposed(&self) -> Result<Self, ShapeOrTypeError> {
        if !self.has_uniform_signature() {
            return Err(ShapeOrTypeError::HeterogeneousTranspose);
        }
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..self.cols {
            for r in 0..self.rows {
                data.push(self.data[r * self.cols + c].clone());
            }
        }
        Self::new(data, self.rows)
    }

    pub fn concat(&self, other: &Self) -> Result<Self, ShapeOrTypeError> {
        if self.rows == 0 {
            return Ok(other.clone());
        }
        if other.rows == 0 {
            return Ok(self.clone());
        }
        if self.cols != other.cols {
            return Err(ShapeOrTypeError::WidthMismatch {
                left: self.cols,
                right: other.cols,
            });
        }
        if self.signature != other.signature {
            return Err(ShapeOrTypeError::ShapeMismatch);
        }
        let mut data = self.data.clone();
        data.extend(other.data.iter().cloned());
        Self::new(data, self.cols)
    }
}

/// One column of a composite key: a flat key sequence, or a table whose rows
/// are the per-element column values (a multi-dimensional column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum KeyColumn {
    Flat(Vec<Key>),
    Table(KeyTable),
}

impl KeyColumn {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(keys) => keys.len(),
            Self::Table(table) => table.rows(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn select_rows(&self, picks: &[usize]) -> Self {
        match self {
            Self::Flat(keys) => Self::Flat(picks.iter().map(|&i| keys[i].clone()).collect()),
            Self::Table(table) => Self::Table(table.select_rows(picks)),
        }
    }

    pub fn concat(&self, other: &Self) -> Result<Self, ShapeOrTypeError> {
        match (self, other) {
            (Self::Flat(a), Self::Flat(b)) => {
                let mut keys = a.clone();
                keys.extend(b.iter().cloned());
                uniform_dtype(&keys)?;
                Ok(Self::Flat(keys))
            }
            (Self::Table(a), Self::Table(b)) => Ok(Self::Table(a.concat(b)?)),
            _ => Err(ShapeOrTypeError::ShapeMismatch),
        }
    }

    /// The key fields this column contributes to logical row `i`.
    #[must_use]
    pub fn row(&self, i: usize) -> Vec<Key> {
        match self {
            Self::Flat(keys) => vec![keys[i].clone()],
            Self::Table(table) => table.row(i).to_vec(),
        }
    }
}

/// The three shapes a key sequence can take: a flat sequence of scalars, a
/// table whose rows are keys, or a tuple of parallel columns forming one
/// composite lexicographic key per row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Keys {
    Flat(Vec<Key>),
    Table(KeyTable),
    Columns(Vec<KeyColumn>),
}

impl Keys {
    #[must_use]
    pub fn from_i64(values: Vec<i64>) -> Self {
        Self::Flat(values.into_iter().map(Key::from).collect())
    }

    #[must_use]
    pub fn from_f64(values: Vec<f64>) -> Self {
        Self::Flat(values.into_iter().map(Key::from).collect())
    }

    #[must_use]
    pub fn from_utf8(values: Vec<&str>) -> Self {
        Self::Flat(values.into_iter().map(Key::from).collect())
    }

    /// Number of logical keys (rows) in the sequence.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(keys) => keys.len(),
            Self::Table(table) => table.rows(),
            Self::Columns(columns) => columns.first().map_or(0, KeyColumn::len),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All key fields of logical row `i`, flattened across columns.
    #[must_use]
    pub fn row(&self, i: usize) -> Vec<Key> {
        match self {
            Self::Flat(keys) => vec![keys[i].clone()],
            Self::Table(table) => table.row(i).to_vec(),
            Self::Columns(columns) => columns.iter().flat_map(|c| c.row(i)).collect(),
        }
    }

    #[must_use]
    pub fn select_rows(&self, picks: &[usize]) -> Self {
        match self {
            Self::Flat(keys) => Self::Flat(picks.iter().map(|&i| keys[i].clone()).collect()),
            Self::Table(table) => Self::Table(table.select_rows(picks)),
            Self::Columns(columns) => {
                Self::Columns(columns.iter().map(|c| c.select_rows(picks)).collect())
            }
        }
    }

    /// Concatenate key sequences of matching shape and dtype into one.
    pub fn concat(parts: &[Keys]) -> Result<Keys, ShapeOrTypeError> {
        let mut parts = parts.iter();
        let Some(first) = parts.next() else {
            return Ok(Keys::Flat(Vec::new()));
        };
        let mut out = first.clone();
        for part in parts {
            out = match (&out, part) {
                (Self::Flat(a), Self::Flat(b)) => {
                    let mut keys = a.clone();
                    keys.extend(b.iter().cloned());
                    uniform_dtype(&keys)?;
                    Self::Flat(keys)
                }
                (Self::Table(a), Self::Table(b)) => Self::Table(a.concat(b)?),
                (Self::Columns(a), Self::Columns(b)) => {
                    if a.len() != b.len() {
                        return Err(ShapeOrTypeError::ColumnCountMismatch {
                            left: a.len(),
                            right: b.len(),
                        });
                    }
                    Self::Columns(
                        a.iter()
                            .zip(b.iter())
                            .map(|(x, y)| x.concat(y))
                            .collect::<Result<_, _>>()?,
                    )
                }
                _ => return Err(ShapeOrTypeError::ShapeMismatch),
            };
        }
        Ok(out)
    }
}
