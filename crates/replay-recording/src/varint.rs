// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unsigned LEB128 variable-length integers.
//!
//! Each byte carries 7 data bits, least significant group first. Bit 7 is the
//! continuation flag and is set on every byte except the last.
//!
//! ```
//! use replay_recording::varint::{decode_varint, encode_varint};
//!
//! let mut buf = Vec::new();
//! encode_varint(300, &mut buf);
//! assert_eq!(buf, [0xAC, 0x02]);
//!
//! let (value, consumed) = decode_varint(&buf).unwrap();
//! assert_eq!(value, 300);
//! assert_eq!(consumed, 2);
//! ```

use std::io::{self, Read};
use thiserror::Error;

/// Maximum bytes needed to encode a u64.
pub const MAX_VARINT_LEN: usize = 10;

const CONTINUATION_BIT: u8 = 0x80;
const DATA_MASK: u8 = 0x7F;

/// Varint decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarintError {
    /// Input ended before a terminating byte was read.
    #[error("unexpected end of input while reading varint")]
    UnexpectedEof,

    /// Value does not fit into 64 bits.
    #[error("varint overflows 64 bits")]
    Overflow,
}

/// Append the encoding of `value` to `out`, returning the number of bytes written.
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    loop {
        let byte = (value & u64::from(DATA_MASK)) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out.len() - start;
        }
        out.push(byte | CONTINUATION_BIT);
    }
}

/// Encode `value` into a fresh buffer.
pub fn varint_bytes(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(varint_len(value));
    encode_varint(value, &mut out);
    out
}

/// Number of bytes `value` occupies once encoded.
#[inline]
#[must_use]
pub const fn varint_len(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Decode a varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut decoder = Decoder::default();
    for (i, &byte) in buf.iter().enumerate() {
        if let Some(value) = decoder.push(byte)? {
            return Ok((value, i + 1));
        }
    }
    Err(VarintError::UnexpectedEof)
}

/// Read a single varint from a byte stream.
///
/// A stream that ends mid-value yields [`VarintError::UnexpectedEof`] wrapped
/// in an `InvalidData` error. A stream that ends *before* the first byte
/// yields a plain `UnexpectedEof` I/O error so callers can tell a clean end
/// of stream from a truncated one.
pub fn read_varint<R: Read + ?Sized>(r: &mut R) -> io::Result<u64> {
    let mut decoder = Decoder::default();
    let mut byte = [0u8; 1];
    let mut first = true;
    loop {
        match r.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !first => {
                return Err(VarintError::UnexpectedEof.into());
            }
            Err(e) => return Err(e),
        }
        first = false;
        if let Some(value) = decoder.push(byte[0])? {
            return Ok(value);
        }
    }
}

impl From<VarintError> for io::Error {
    fn from(e: VarintError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

/// Incremental decoder state shared by the slice and stream paths.
#[derive(Default)]
struct Decoder {
    value: u64,
    shift: u32,
    count: usize,
}

impl Decoder {
    fn push(&mut self, byte: u8) -> Result<Option<u64>, VarintError> {
        if self.count >= MAX_VARINT_LEN {
            return Err(VarintError::Overflow);
        }
        let data = u64::from(byte & DATA_MASK);
        // At shift 63 only the lowest bit still fits.
        if self.shift == 63 && data > 1 {
            return Err(VarintError::Overflow);
        }
        self.value |= data << self.shift;
        self.count += 1;
        if byte & CONTINUATION_BIT == 0 {
            return Ok(Some(self.value));
        }
        self.shift += 7;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_known_encodings() {
        assert_eq!(varint_bytes(0), [0x00]);
        assert_eq!(varint_bytes(1), [0x01]);
        assert_eq!(varint_bytes(127), [0x7F]);
        assert_eq!(varint_bytes(128), [0x80, 0x01]);
        assert_eq!(varint_bytes(300), [0xAC, 0x02]);
        assert_eq!(varint_bytes(16384), [0x80, 0x80, 0x01]);
        assert_eq!(varint_bytes(u64::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn test_roundtrip_boundaries() {
        let values = [
            0,
            1,
            127,
            128,
            16383,
            16384,
            u64::from(u32::MAX),
            1 << 62,
            u64::MAX - 1,
            u64::MAX,
        ];
        for value in values {
            let bytes = varint_bytes(value);
            assert_eq!(bytes.len(), varint_len(value), "len for {value}");
            let (decoded, consumed) = decode_varint(&bytes).expect("decode");
            assert_eq!(decoded, value);
            assert_eq!(consumed, bytes.len());
        }
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let (value, consumed) = decode_varint(&[0xAC, 0x02, 0xFF, 0xFF]).expect("decode");
        assert_eq!(value, 300);
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_decode_truncated() {
        assert_eq!(decode_varint(&[]), Err(VarintError::UnexpectedEof));
        assert_eq!(decode_varint(&[0x80, 0x80]), Err(VarintError::UnexpectedEof));
    }

    #[test]
    fn test_decode_overflow() {
        // 10th byte carries more than one significant bit.
        let mut too_big = vec![0xFF; 9];
        too_big.push(0x02);
        assert_eq!(decode_varint(&too_big), Err(VarintError::Overflow));

        // 11 bytes never terminate within range.
        let too_long = [0x80; 11];
        assert_eq!(decode_varint(&too_long), Err(VarintError::Overflow));
    }

    #[test]
    fn test_read_varint_stream() {
        let mut buf = Vec::new();
        encode_varint(1, &mut buf);
        encode_varint(300, &mut buf);
        let mut cursor = Cursor::new(buf);

        assert_eq!(read_varint(&mut cursor).expect("first"), 1);
        assert_eq!(read_varint(&mut cursor).expect("second"), 300);

        let end = read_varint(&mut cursor).expect_err("clean end");
        assert_eq!(end.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_varint_truncated_stream() {
        let mut cursor = Cursor::new(vec![0x80]);
        let err = read_varint(&mut cursor).expect_err("truncated");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
