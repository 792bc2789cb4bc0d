//! Zig-zag variable-length integers.
//!
//! The sign is folded into the low bit (`0 → 0, -1 → 1, 1 → 2, -2 → 3, ...`)
//! and the result is written seven bits per byte, least significant group
//! first, with the high bit set on every byte except the last.  A 64-bit
//! value never takes more than ten bytes.

use super::DecodeError;

pub const MAX_VARINT_LEN: usize = 10;

#[inline]
pub fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
pub fn unzigzag(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

pub fn write_long(out: &mut Vec<u8>, v: i64) {
    let mut u = zigzag(v);
    while u >= 0x80 {
        out.push((u as u8) | 0x80);
        u >>= 7;
    }
    out.push(u as u8);
}

/// Decode one varint from the front of `input`.
/// Returns the value and the number of bytes it occupied.
pub fn read_long(input: &[u8]) -> Result<(i64, usize), DecodeError> {
    let mut acc: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = *input.get(i).ok_or(DecodeError::Truncated)?;
        // the tenth byte may only contribute the single remaining bit
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(DecodeError::InvalidEncoding("varint overflows 64 bits".into()));
        }
        acc |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((unzigzag(acc), i + 1));
        }
    }
    Err(DecodeError::InvalidEncoding("varint longer than 10 bytes".into()))
}

/// Encoded size of `v` in bytes.
pub fn long_len(v: i64) -> usize {
    let bits = 64 - zigzag(v).leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}
