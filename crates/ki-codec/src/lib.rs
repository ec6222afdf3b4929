#![forbid(unsafe_code)]

//! Key codec: reversible mapping from multi-field key rows to atomic,
//! totally ordered byte tokens, so a plain token sort can stand in for
//! structural row comparison. Byte order over tokens agrees with the
//! field-wise lexicographic order of the rows they encode.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ki_types::{Key, KeyColumn, KeyTable, ShapeOrTypeError};

const TAG_BOOL: u8 = 0x01;
const TAG_INT64: u8 = 0x02;
const TAG_FLOAT64: u8 = 0x03;
const TAG_UTF8: u8 = 0x04;

const SIGN_BIT: u64 = 1 << 63;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("token truncated at byte {at}")]
    Truncated { at: usize },
    #[error("unknown dtype tag {tag:#04x} at byte {at}")]
    UnknownTag { tag: u8, at: usize },
    #[error("invalid escape byte {byte:#04x} at byte {at}")]
    BadEscape { byte: u8, at: usize },
    #[error("decoded string is not valid utf-8")]
    InvalidUtf8,
    #[error(transparent)]
    ShapeOrType(#[from] ShapeOrTypeError),
}

/// Opaque byte token for one key row. `Ord` is plain byte order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowToken(Vec<u8>);

impl RowToken {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Append the order-preserving encoding of one key field.
pub fn encode_key(key: &Key, out: &mut Vec<u8>) {
    match key {
        Key::Bool(v) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*v));
        }
        Key::Int64(v) => {
            // Flipping the sign bit makes unsigned byte order match i64 order.
            out.push(TAG_INT64);
            out.extend_from_slice(&((*v as u64) ^ SIGN_BIT).to_be_bytes());
        }
        Key::Float64(v) => {
            // Total-order bit transform, the byte-level mirror of total_cmp:
            // negatives invert entirely, non-negatives set the sign bit.
            let bits = v.to_bits();
            let mapped = if bits & SIGN_BIT != 0 { !bits } else { bits | SIGN_BIT };
            out.push(TAG_FLOAT64);
            out.extend_from_slice(&mapped.to_be_bytes());
        }
        Key::Utf8(v) => {
            // 0x00 is escaped as 0x00 0xFF and the field ends with 0x00 0x00,
            // so the terminator sorts before any continuation byte and
            // shorter strings order before their extensions.
            out.push(TAG_UTF8);
            for &b in v.as_bytes() {
                if b == 0x00 {
                    out.push(0x00);
                    out.push(0xFF);
                } else {
                    out.push(b);
                }
            }
            out.push(0x00);
            out.push(0x00);
        }
    }
}

/// Decode one key field starting at `*pos`, advancing `*pos` past it.
pub fn decode_key(bytes: &[u8], pos: &mut usize) -> Result<Key, CodecError> {
    let tag = *bytes.get(*pos).ok_or(CodecError::Truncated { at: *pos })?;
    *pos += 1;
    match tag {
        TAG_BOOL => {
            let b = *bytes.get(*pos).ok_or(CodecError::Truncated { at: *pos })?;
            *pos += 1;
            Ok(Key::Bool(b != 0))
        }
        TAG_INT64 => {
            let raw = read_u64(bytes, pos)?;
            Ok(Key::Int64((raw ^ SIGN_BIT) as i64))
        }
        TAG_FLOAT64 => {
            let mapped = read_u64(bytes, pos)?;
            let bits = if mapped & SIGN_BIT != 0 { mapped & !SIGN_BIT } else { !mapped };
            Ok(Key::Float64(f64::from_bits(bits)))
        }
        TAG_UTF8 => {
            let mut buf = Vec::new();
            loop {
                let b = *bytes.get(*pos).ok_or(CodecError::Truncated { at: *pos })?;
                *pos += 1;
                if b != 0x00 {
                    buf.push(b);
                    continue;
                }
                let next = *bytes.get(*pos).ok_or(CodecError::Truncated { at: *pos })?;
                *pos += 1;
                match next {
                    0x00 => break,
                    0xFF => buf.push(0x00),
                    byte => return Err(CodecError::BadEscape { byte, at: *pos - 1 }),
                }
            }
            String::from_utf8(buf)
                .map(Key::Utf8)
                .map_err(|_| CodecError::InvalidUtf8)
        }
        tag => Err(CodecError::UnknownTag { tag, at: *pos - 1 }),
    }
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64, CodecError> {
    let end = *pos + 8;
    let slice = bytes
        .get(*pos..end)
        .ok_or(CodecError::Truncated { at: bytes.len() })?;
    let mut raw = [0_u8; 8];
    raw.copy_from_slice(slice);
    *pos = end;
    Ok(u64::from_be_bytes(raw))
}

/// Encode every row of a table into one token. Element-wise equal rows
/// produce bit-identical tokens; rows differing in any field differ.
#[must_use]
pub fn encode_rows(table: &KeyTable) -> Vec<RowToken> {
    table
        .iter_rows()
        .map(|row| {
            let mut bytes = Vec::with_capacity(row.len() * 9);
            for key in row {
                encode_key(key, &mut bytes);
            }
            RowToken(bytes)
        })
        .collect()
}

/// Exact inverse of [`encode_rows`]: `decode_rows(&encode_rows(t), t.cols()) == t`.
pub fn decode_rows(tokens: &[RowToken], cols: usize) -> Result<KeyTable, CodecError> {
    let mut data = Vec::with_capacity(tokens.len() * cols);
    for token in tokens {
        let bytes = token.as_bytes();
        let mut pos = 0;
        for _ in 0..cols {
            data.push(decode_key(bytes, &mut pos)?);
        }
        if pos != bytes.len() {
            return Err(CodecError::Truncated { at: pos });
        }
    }
    Ok(KeyTable::new(data, cols)?)
}

/// Pack parallel columns into one row-wise composite table, an alternative
/// to `Keys::Columns` when a single flat row representation is wanted.
/// Table columns contribute all of their fields to each packed row.
pub fn pack_columns(columns: &[KeyColumn]) -> Result<KeyTable, ShapeOrTypeError> {
    let rows = columns.first().map_or(0, KeyColumn::len);
    for column in columns {
        if column.len() != rows {
            return Err(ShapeOrTypeError::LengthMismatch {
                left: rows,
                right: column.len(),
            });
        }
    }
    let mut packed = Vec::with_capacity(rows);
    for i in 0..rows {
        packed.push(
            columns
                .iter()
                .flat_map(|c| c.row(i))
                .collect::<Vec<Key>>(),
        );
    }
    KeyTable::from_rows(packed)
}
