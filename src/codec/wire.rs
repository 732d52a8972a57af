//! Byte-level primitives for rollup payloads
//!
//! Integers are written as protobuf-style base-128 varints (least significant
//! group first, high bit set on every byte but the last). Doubles are 8 bytes
//! IEEE754 little-endian. Strings are a varint length followed by UTF-8.
//!
//! Writers are sized up front: every encoder computes the exact payload length
//! before writing, and [`WireWriter::finish`] rejects a mismatch.
//!
//! # Example
//! ```
//! use kuba_rollup::codec::wire::{varint64_size, WireReader, WireWriter};
//!
//! let mut writer = WireWriter::with_capacity(1 + varint64_size(300));
//! writer.put_u8(7);
//! writer.put_varint64(300);
//! let bytes = writer.finish().unwrap();
//! assert_eq!(&bytes[..], &[7, 0xAC, 0x02]);
//!
//! let mut reader = WireReader::new(&bytes);
//! assert_eq!(reader.read_u8().unwrap(), 7);
//! assert_eq!(reader.read_varint64().unwrap(), 300);
//! assert!(reader.expect_end().is_ok());
//! ```

use super::{B_DOUBLE, B_I32, B_I64, B_STR};
use crate::error::CodecError;
use crate::types::Number;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Longest varint encoding of a 64-bit value
const MAX_VARINT_LEN: usize = 10;

/// Encoded length of a 32-bit varint (the unsigned bit pattern of `value`)
#[inline]
pub fn varint32_size(value: i32) -> usize {
    unsigned_varint_size(value as u32 as u64)
}

/// Encoded length of a 64-bit varint (the unsigned bit pattern of `value`)
#[inline]
pub fn varint64_size(value: i64) -> usize {
    unsigned_varint_size(value as u64)
}

#[inline]
fn unsigned_varint_size(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Encoded length of a length-prefixed string
#[inline]
pub fn string_size(value: &str) -> usize {
    varint32_size(value.len() as i32) + value.len()
}

/// Encoded length of a `[type][value]` number
#[inline]
pub fn number_size(value: Number) -> usize {
    1 + match value {
        Number::Long(v) => varint64_size(v),
        Number::Double(_) => 8,
    }
}

/// Sized writer over [`BytesMut`]
#[derive(Debug)]
pub struct WireWriter {
    buf: BytesMut,
    expected: usize,
}

impl WireWriter {
    /// Create a writer for a payload of exactly `expected` bytes
    pub fn with_capacity(expected: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(expected),
            expected,
        }
    }

    /// Write one raw byte
    #[inline]
    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Write a 32-bit varint
    #[inline]
    pub fn put_varint32(&mut self, value: i32) {
        self.put_unsigned_varint(value as u32 as u64);
    }

    /// Write a 64-bit varint
    #[inline]
    pub fn put_varint64(&mut self, value: i64) {
        self.put_unsigned_varint(value as u64);
    }

    fn put_unsigned_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    /// Write a little-endian double
    #[inline]
    pub fn put_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    /// Write a length-prefixed UTF-8 string
    pub fn put_str(&mut self, value: &str) {
        self.put_varint32(value.len() as i32);
        self.buf.put_slice(value.as_bytes());
    }

    /// Write `[I64|DOUBLE][value]`
    pub fn put_number(&mut self, value: Number) {
        match value {
            Number::Long(v) => {
                self.put_u8(B_I64);
                self.put_varint64(v);
            }
            Number::Double(v) => {
                self.put_u8(B_DOUBLE);
                self.put_f64(v);
            }
        }
    }

    /// Finish, checking that exactly the pre-computed size was written
    pub fn finish(self) -> Result<Bytes, CodecError> {
        if self.buf.len() != self.expected {
            return Err(CodecError::SizeMismatch {
                expected: self.expected,
                actual: self.buf.len(),
            });
        }
        Ok(self.buf.freeze())
    }
}

/// Bounds-checked reader over a byte slice
///
/// Every read that would run past the end returns
/// [`CodecError::MalformedBuffer`].
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    /// Read from the start of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes left to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// True when every byte has been consumed
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }

    fn need(&self, n: usize, what: &str) -> Result<(), CodecError> {
        if self.buf.remaining() < n {
            return Err(CodecError::MalformedBuffer(format!(
                "need {} bytes for {}, {} left",
                n,
                what,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Read one raw byte
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.need(1, "byte")?;
        Ok(self.buf.get_u8())
    }

    fn read_unsigned_varint(&mut self) -> Result<u64, CodecError> {
        let mut result = 0u64;
        for i in 0..MAX_VARINT_LEN {
            self.need(1, "varint")?;
            let byte = self.buf.get_u8();
            result |= ((byte & 0x7F) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(CodecError::MalformedBuffer("varint longer than 10 bytes".into()))
    }

    /// Read a 32-bit varint; longer encodings are truncated to 32 bits
    pub fn read_varint32(&mut self) -> Result<i32, CodecError> {
        Ok(self.read_unsigned_varint()? as u32 as i32)
    }

    /// Read a 64-bit varint
    pub fn read_varint64(&mut self) -> Result<i64, CodecError> {
        Ok(self.read_unsigned_varint()? as i64)
    }

    /// Read a little-endian double
    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        self.need(8, "double")?;
        Ok(self.buf.get_f64_le())
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_varint32()? as u32 as usize;
        self.need(len, "string")?;
        let (head, tail) = self.buf.split_at(len);
        let s = std::str::from_utf8(head)
            .map_err(|e| CodecError::MalformedBuffer(format!("invalid utf-8: {}", e)))?
            .to_string();
        self.buf = tail;
        Ok(s)
    }

    /// Read a value whose type byte has already been consumed
    pub fn read_typed_number(&mut self, type_byte: u8) -> Result<Number, CodecError> {
        match type_byte {
            B_I32 => Ok(Number::Long(self.read_varint32()? as i64)),
            B_I64 => Ok(Number::Long(self.read_varint64()?)),
            B_DOUBLE => Ok(Number::Double(self.read_f64()?)),
            B_STR => Err(CodecError::UnexpectedValueKind(
                "string value in numeric payload".into(),
            )),
            other => Err(CodecError::MalformedBuffer(format!(
                "unknown value type 0x{:02x}",
                other
            ))),
        }
    }

    /// Read `[type][value]`
    pub fn read_number(&mut self) -> Result<Number, CodecError> {
        let type_byte = self.read_u8()?;
        self.read_typed_number(type_byte)
    }

    /// Fail if any bytes remain
    pub fn expect_end(&self) -> Result<(), CodecError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::MalformedBuffer(format!(
                "{} trailing bytes",
                self.remaining()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(f: impl FnOnce(&mut WireWriter), size: usize) -> Bytes {
        let mut w = WireWriter::with_capacity(size);
        f(&mut w);
        w.finish().unwrap()
    }

    #[test]
    fn test_varint_sizes() {
        assert_eq!(varint64_size(0), 1);
        assert_eq!(varint64_size(127), 1);
        assert_eq!(varint64_size(128), 2);
        assert_eq!(varint64_size(-1), 10);
        assert_eq!(varint32_size(-1), 5);
        assert_eq!(varint32_size(i32::MAX), 5);
    }

    #[test]
    fn test_negative_varint32_is_five_bytes() {
        let bytes = write(|w| w.put_varint32(-1), 5);
        assert_eq!(&bytes[..], &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(WireReader::new(&bytes).read_varint32().unwrap(), -1);
    }

    #[test]
    fn test_varint32_accepts_sign_extended_encoding() {
        // ten byte form written by 64-bit encoders for negative ints
        let bytes = write(|w| w.put_varint64(-2), 10);
        assert_eq!(WireReader::new(&bytes).read_varint32().unwrap(), -2);
    }

    #[test]
    fn test_double_little_endian() {
        let bytes = write(|w| w.put_f64(2.0), 8);
        assert_eq!(&bytes[..], &[0, 0, 0, 0, 0, 0, 0, 0x40]);
    }

    #[test]
    fn test_string() {
        let bytes = write(|w| w.put_str("50"), string_size("50"));
        assert_eq!(&bytes[..], &[2, b'5', b'0']);
        assert_eq!(WireReader::new(&bytes).read_string().unwrap(), "50");
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut w = WireWriter::with_capacity(3);
        w.put_u8(1);
        assert_eq!(
            w.finish(),
            Err(CodecError::SizeMismatch {
                expected: 3,
                actual: 1
            })
        );
    }

    #[test]
    fn test_short_reads_are_malformed() {
        let mut r = WireReader::new(&[0x80]);
        assert!(matches!(r.read_varint64(), Err(CodecError::MalformedBuffer(_))));
        let mut r = WireReader::new(&[1, 2, 3]);
        assert!(matches!(r.read_f64(), Err(CodecError::MalformedBuffer(_))));
        let mut r = WireReader::new(&[5, b'a']);
        assert!(matches!(r.read_string(), Err(CodecError::MalformedBuffer(_))));
    }

    #[test]
    fn test_overlong_varint_rejected() {
        let mut r = WireReader::new(&[0xFF; 11]);
        assert!(matches!(r.read_varint64(), Err(CodecError::MalformedBuffer(_))));
    }

    #[test]
    fn test_number_tags() {
        let size = number_size(Number::Long(5)) + number_size(Number::Double(1.5));
        let bytes = write(
            |w| {
                w.put_number(Number::Long(5));
                w.put_number(Number::Double(1.5));
            },
            size,
        );
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.read_number().unwrap(), Number::Long(5));
        assert_eq!(r.read_number().unwrap(), Number::Double(1.5));
        assert!(r.expect_end().is_ok());
    }
}
