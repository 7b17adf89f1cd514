//! Row marshal: serializes and deserializes a typed [`Row`] to/from bytes
//! for a given [`Schema`].
//!
//! Layout: a `u64` null bitmap (bit `i` set iff column `i` is null), then
//! each non-null field in schema order. Fixed-length strings occupy exactly
//! their declared length, zero-padded. Variable-length strings store an
//! inline `(length: u32, offset: u32)` pointing at raw bytes appended to a
//! tail region that follows the fixed region. The source stores a raw
//! in-memory `uint8_t*` there instead; an absolute byte offset into the
//! same buffer is the disk-safe equivalent spec.md's own prose calls for.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

use crate::value::{ColumnType, Row, Schema, Value};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("row has {actual} values but schema declares {expected}")]
    RowSchemaMismatch { expected: usize, actual: usize },
    #[error("column {column} expected a value of type {expected} but got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: Value,
    },
    #[error("serialized row needs {needed} bytes but the buffer is only {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn fixed_field_size(t: &ColumnType) -> usize {
    match t {
        ColumnType::Boolean => 1,
        ColumnType::UInt64 => 8,
        ColumnType::Int64 => 8,
        ColumnType::Varchar(n) => *n as usize,
        // inline (length: u32, offset: u32); the bytes themselves live in
        // the tail region.
        ColumnType::String => 8,
    }
}

/// Serializes/deserializes rows conformant to one fixed [`Schema`].
pub struct RowMarshal {
    schema: Schema,
    fixed_row_space: usize,
}

impl RowMarshal {
    pub fn new(schema: Schema) -> Self {
        let fixed_row_space =
            8 + schema.columns().iter().map(fixed_field_size).sum::<usize>();
        RowMarshal {
            schema,
            fixed_row_space,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Bytes needed for a non-null row with no variable extensions: the
    /// floor every row of this schema occupies.
    pub fn fixed_row_space(&self) -> usize {
        self.fixed_row_space
    }

    fn nulls_bitmap(&self, row: &Row) -> u64 {
        let mut nulls = 0u64;
        for (i, v) in row.values.iter().enumerate() {
            if v.is_null() {
                nulls |= 1 << i;
            }
        }
        nulls
    }

    fn fixed_space_for_nulls(&self, nulls: u64) -> usize {
        let mut total = 8;
        for (i, col) in self.schema.columns().iter().enumerate() {
            if nulls & (1 << i) != 0 {
                continue;
            }
            total += fixed_field_size(&col.column_type);
        }
        total
    }

    fn check_row(&self, row: &Row) -> Result<(), Error> {
        if row.len() != self.schema.len() {
            return Err(Error::RowSchemaMismatch {
                expected: self.schema.len(),
                actual: row.len(),
            });
        }
        Ok(())
    }

    /// Bytes this specific row needs, including variable payloads.
    pub fn row_space(&self, row: &Row) -> Result<usize, Error> {
        self.check_row(row)?;
        let nulls = self.nulls_bitmap(row);
        let mut total = self.fixed_space_for_nulls(nulls);
        for (i, col) in self.schema.columns().iter().enumerate() {
            if nulls & (1 << i) != 0 {
                continue;
            }
            if let (ColumnType::String, Value::VarString(s)) = (&col.column_type, &row.values[i])
            {
                total += s.as_bytes().len();
            }
        }
        Ok(total)
    }

    /// Writes `row` into `buffer`, which must be at least `row_space(row)`
    /// bytes (it may be larger: callers typically pass a page-sized
    /// region).
    pub fn serialize(&self, buffer: &mut [u8], row: &Row) -> Result<(), Error> {
        self.check_row(row)?;
        let nulls = self.nulls_bitmap(row);
        let needed = self.row_space(row)?;
        if buffer.len() < needed {
            return Err(Error::BufferTooSmall {
                needed,
                available: buffer.len(),
            });
        }
        let fixed_space = self.fixed_space_for_nulls(nulls);
        let mut tail_offset = fixed_space as u32;
        {
            let mut cursor = Cursor::new(&mut buffer[..]);
            cursor.write_u64::<LittleEndian>(nulls)?;
        }
        let mut pos = 8usize;
        for (i, col) in self.schema.columns().iter().enumerate() {
            if nulls & (1 << i) != 0 {
                continue;
            }
            match (&col.column_type, &row.values[i]) {
                (ColumnType::Boolean, Value::Boolean(b)) => {
                    buffer[pos] = *b as u8;
                    pos += 1;
                }
                (ColumnType::UInt64, Value::UInt64(u)) => {
                    (&mut buffer[pos..pos + 8]).write_u64::<LittleEndian>(*u)?;
                    pos += 8;
                }
                (ColumnType::Int64, Value::Int64(x)) => {
                    (&mut buffer[pos..pos + 8]).write_i64::<LittleEndian>(*x)?;
                    pos += 8;
                }
                (ColumnType::Varchar(len), Value::FixedString(s, _)) => {
                    let len = *len as usize;
                    let bytes = s.as_bytes();
                    let n = bytes.len().min(len);
                    buffer[pos..pos + n].copy_from_slice(&bytes[..n]);
                    for b in buffer[pos + n..pos + len].iter_mut() {
                        *b = 0;
                    }
                    pos += len;
                }
                (ColumnType::String, Value::VarString(s)) => {
                    let bytes = s.as_bytes();
                    (&mut buffer[pos..pos + 4]).write_u32::<LittleEndian>(bytes.len() as u32)?;
                    (&mut buffer[pos + 4..pos + 8]).write_u32::<LittleEndian>(tail_offset)?;
                    pos += 8;
                    let tpos = tail_offset as usize;
                    buffer[tpos..tpos + bytes.len()].copy_from_slice(bytes);
                    tail_offset += bytes.len() as u32;
                }
                (expected, actual) => {
                    return Err(Error::TypeMismatch {
                        column: col.name.clone(),
                        expected: expected.type_name(),
                        actual: actual.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Inverse of [`serialize`](Self::serialize).
    pub fn deserialize(&self, buffer: &[u8]) -> Result<Row, Error> {
        let mut cursor = Cursor::new(buffer);
        let nulls = cursor.read_u64::<LittleEndian>()?;
        let mut values = Vec::with_capacity(self.schema.len());
        for (i, col) in self.schema.columns().iter().enumerate() {
            if nulls & (1 << i) != 0 {
                values.push(Value::Null);
                continue;
            }
            let v = match &col.column_type {
                ColumnType::Boolean => Value::Boolean(cursor.read_u8()? != 0),
                ColumnType::UInt64 => Value::UInt64(cursor.read_u64::<LittleEndian>()?),
                ColumnType::Int64 => Value::Int64(cursor.read_i64::<LittleEndian>()?),
                ColumnType::Varchar(len) => {
                    let len = *len as usize;
                    let pos = cursor.position() as usize;
                    let raw = &buffer[pos..pos + len];
                    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
                    let s = String::from_utf8_lossy(&raw[..end]).into_owned();
                    cursor.set_position((pos + len) as u64);
                    Value::FixedString(s, *len as u16)
                }
                ColumnType::String => {
                    let length = cursor.read_u32::<LittleEndian>()? as usize;
                    let offset = cursor.read_u32::<LittleEndian>()? as usize;
                    let raw = &buffer[offset..offset + length];
                    Value::VarString(String::from_utf8_lossy(raw).into_owned())
                }
            };
            values.push(v);
        }
        Ok(Row::new(values))
    }
}
