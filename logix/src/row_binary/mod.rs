//! # RowBinary encoder
//!
//! Forward-only writer producing the row layout accepted by the store's
//! `FORMAT RowBinary` insert endpoint:
//!
//! - `UInt16` / `UInt64`: fixed width, little-endian
//! - `Enum8`: one tag byte
//! - `DateTime64(3)`: raw epoch millis as little-endian `Int64`
//! - `String`: LEB128 length prefix followed by the UTF-8 bytes
//!
//! Nulls are written as the type's zero value. The format has no null marker,
//! so a null and a zero read back the same.


use std::io::Write;

use crate::error::Result;

/// A value that serializes itself as one RowBinary row.
///
/// Field order must match the insert column list of its table exactly.
pub trait RowBinary {
  fn write_row<W: Write>(&self, encoder: &mut RowBinaryEncoder<W>) -> Result<()>;
}

#[derive(Debug)]
pub struct RowBinaryEncoder<W: Write> {
  out: W,
}

impl RowBinaryEncoder<Vec<u8>> {
  /// Encoder over an in-memory buffer pre-sized for `capacity` bytes.
  pub fn with_capacity(capacity: usize) -> Self {
    Self::new(Vec::with_capacity(capacity))
  }
}

impl<W: Write> RowBinaryEncoder<W> {
  pub fn new(out: W) -> Self {
    Self { out }
  }

  pub fn into_inner(self) -> W {
    self.out
  }

  pub fn write_u16(&mut self, value: Option<u16>) -> Result<()> {
    self.out.write_all(&value.unwrap_or(0).to_le_bytes())?;
    Ok(())
  }

  pub fn write_u64(&mut self, value: Option<u64>) -> Result<()> {
    self.out.write_all(&value.unwrap_or(0).to_le_bytes())?;
    Ok(())
  }

  pub fn write_enum8(&mut self, code: u8) -> Result<()> {
    self.out.write_all(&[code])?;
    Ok(())
  }

  /// `DateTime64(3)` column value.
  pub fn write_datetime64_millis(&mut self, epoch_millis: Option<i64>) -> Result<()> {
    self.out.write_all(&epoch_millis.unwrap_or(0).to_le_bytes())?;
    Ok(())
  }

  pub fn write_string(&mut self, value: Option<&str>) -> Result<()> {
    let bytes = value.unwrap_or("").as_bytes();
    self.write_var_uint(bytes.len() as u64)?;
    self.out.write_all(bytes)?;
    Ok(())
  }

  /// Unsigned LEB128: 7 bits per byte, low group first, high bit = more.
  pub fn write_var_uint(&mut self, mut value: u64) -> Result<()> {
    let mut buf = [0u8; 10];
    let mut len = 0;
    loop {
      let byte = (value & 0x7F) as u8;
      value >>= 7;
      if value == 0 {
        buf[len] = byte;
        len += 1;
        break;
      }
      buf[len] = byte | 0x80;
      len += 1;
    }
    self.out.write_all(&buf[..len])?;
    Ok(())
  }

  /// Append one row.
  pub fn write_row<R: RowBinary + ?Sized>(&mut self, row: &R) -> Result<()> {
    row.write_row(self)
  }

  pub fn flush(&mut self) -> Result<()> {
    self.out.flush()?;
    Ok(())
  }
}

/// Bytes taken by the LEB128 form of `value`.
pub fn var_uint_len(value: u64) -> usize {
  let bits = 64 - value.leading_zeros() as usize;
  bits.div_ceil(7).max(1)
}
