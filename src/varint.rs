//! # Chainstate VARINT and amount compression
//!
//! The chainstate does not use CompactSize. Integers are written MSB-first in
//! 7-bit groups, every byte but the last has bit 0x80 set, and each
//! continuation adds one to the accumulator. That "+1" makes every value
//! have exactly one encoding, so `0x80 0x00` is 128 and `0x81 0x00` is 256
//! where plain base-128 would give 128 and 128.
//!
//! Amounts are additionally squeezed by CompressAmount before being written.
//!
//! ## References
//!
//! - Bitcoin Core: src/serialize.h (WriteVarInt / ReadVarInt)
//! - Bitcoin Core: src/compressor.cpp (CompressAmount / DecompressAmount)

use crate::error::{ChainstateError, Result};

/// Decode a complete VARINT span, as returned by [`parse_varint`].
///
/// Stops at the first byte without the continuation bit; trailing bytes are
/// ignored. An empty span, a span that never terminates, or a value that does
/// not fit in 64 bits is a malformed record.
pub fn decode_b128(data: &[u8]) -> Result<u64> {
    let mut n: u64 = 0;
    for &b in data {
        if n > (u64::MAX >> 7) {
            return Err(ChainstateError::malformed("varint overflows 64 bits"));
        }
        n = (n << 7) | u64::from(b & 0x7F);
        if b & 0x80 == 0 {
            return Ok(n);
        }
        n = n
            .checked_add(1)
            .ok_or_else(|| ChainstateError::malformed("varint overflows 64 bits"))?;
    }
    Err(ChainstateError::malformed(format!(
        "unterminated varint ({} bytes)",
        data.len()
    )))
}

/// Scan one VARINT starting at `offset`.
///
/// Returns the raw span (continuation bytes plus the terminating byte) and
/// the offset of the byte right after it.
pub fn parse_varint(buf: &[u8], offset: usize) -> Result<(&[u8], usize)> {
    let mut pos = offset;
    loop {
        let b = *buf.get(pos).ok_or_else(|| {
            ChainstateError::malformed(format!(
                "varint at offset {} runs past end of {}-byte buffer",
                offset,
                buf.len()
            ))
        })?;
        pos += 1;
        if b & 0x80 == 0 {
            return Ok((&buf[offset..pos], pos));
        }
    }
}

/// [`parse_varint`] followed by [`decode_b128`].
pub fn read_varint(buf: &[u8], offset: usize) -> Result<(u64, usize)> {
    let (raw, next) = parse_varint(buf, offset)?;
    Ok((decode_b128(raw)?, next))
}

/// Inverse of [`decode_b128`]; used to build fixtures and by the store tests.
pub fn encode_b128(mut n: u64) -> Vec<u8> {
    let mut tmp = Vec::with_capacity(10);
    let mut first = true;
    loop {
        let mut b = (n & 0x7F) as u8;
        if !first {
            b |= 0x80;
        }
        tmp.push(b);
        first = false;
        if n <= 0x7F {
            break;
        }
        n = (n >> 7) - 1;
    }
    tmp.reverse();
    tmp
}

/// Expand a compressed amount back to satoshis.
///
/// ```text
/// x == 0           -> 0
/// x -= 1; e = x % 10; x /= 10
/// e < 9            -> n = (x / 9) * 10 + (x % 9) + 1
/// e == 9           -> n = x + 1
/// result           =  n * 10^e
/// ```
///
/// All divisions truncate. A value that would exceed `u64` cannot have been
/// written by a node and is reported as malformed.
pub fn decompress_amount(x: u64) -> Result<u64> {
    if x == 0 {
        return Ok(0);
    }
    let x = x - 1;
    let e = (x % 10) as u32;
    let x = x / 10;

    let n = if e < 9 {
        let d = (x % 9) + 1;
        (x / 9) * 10 + d
    } else {
        x + 1
    };

    n.checked_mul(10u64.pow(e))
        .ok_or_else(|| ChainstateError::malformed(format!("compressed amount {} overflows", x)))
}

/// CompressAmount, the inverse of [`decompress_amount`].
pub fn compress_amount(mut n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let mut e = 0u64;
    while n % 10 == 0 && e < 9 {
        n /= 10;
        e += 1;
    }
    if e < 9 {
        let d = n % 10;
        n /= 10;
        1 + (n * 9 + d - 1) * 10 + e
    } else {
        1 + (n - 1) * 10 + 9
    }
}
