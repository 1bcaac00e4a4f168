//! # Per-transaction chainstate entries (node 0.8 - 0.14)
//!
//! ```text
//! key:   'c' | txid (32, LE)
//! value: VARINT(version)
//!        VARINT(code)
//!        unspentness bit-vector for vout[2..], least significant byte first
//!        for each unspent output: VARINT(compressed amount) VARINT(type) script
//!        VARINT(height)
//! ```
//!
//! `code` packs:
//! - bit 1 (0x01): coinbase
//! - bit 2 (0x02): vout[0] unspent
//! - bit 4 (0x04): vout[1] unspent
//! - higher bits: N, the number of non-zero bytes in the bit-vector. When
//!   both vout[0] and vout[1] are spent the stored value is N - 1, since at
//!   least one output must be unspent.
//!
//! Zero bytes inside the bit-vector are consumed but do not count toward N.
//!
//! ## References
//!
//! - Bitcoin Core 0.14: src/coins.h (CCoins serialization comment and examples)

use tracing::trace;

use crate::error::{ChainstateError, Result};
use crate::record::{height_from_u64, read_compressed_output, txid_from_key, UtxoRecord, LEGACY_PREFIX};
use crate::varint::read_varint;

/// Unspent output indexes encoded by `code` and the following bit-vector.
///
/// Returns the indexes in ascending order and the offset after the bit-vector.
pub fn unspent_indexes(value: &[u8], code: u64, offset: usize) -> Result<(Vec<u32>, usize)> {
    let vout0 = code & 0x02 != 0;
    let vout1 = code & 0x04 != 0;

    let mut indexes = Vec::new();
    if vout0 {
        indexes.push(0);
    }
    if vout1 {
        indexes.push(1);
    }

    let mut remaining = if !vout0 && !vout1 { (code >> 3) + 1 } else { code >> 3 };

    let mut pos = offset;
    let mut byte_index: u32 = 0;
    while remaining > 0 {
        let b = *value.get(pos).ok_or_else(|| {
            ChainstateError::malformed(format!(
                "bit-vector runs past end of record ({} non-zero bytes still expected)",
                remaining
            ))
        })?;
        pos += 1;
        if b != 0 {
            remaining -= 1;
        }
        for bit in 0..8u32 {
            if (b >> bit) & 1 == 1 {
                let vout = byte_index
                    .checked_mul(8)
                    .and_then(|i| i.checked_add(bit + 2))
                    .ok_or_else(|| ChainstateError::malformed("bit-vector index overflow"))?;
                indexes.push(vout);
            }
        }
        byte_index += 1;
    }

    Ok((indexes, pos))
}

/// Decode one per-transaction entry.
pub fn decode(key: &[u8], value: &[u8]) -> Result<UtxoRecord> {
    if key.first() != Some(&LEGACY_PREFIX) {
        return Err(ChainstateError::malformed(format!(
            "key does not start with 0x{:02x}",
            LEGACY_PREFIX
        )));
    }
    let txid = txid_from_key(key)?;

    let (version, offset) = read_varint(value, 0)?;
    let (code, offset) = read_varint(value, offset)?;
    let is_coinbase = code & 0x01 == 1;

    let (indexes, mut offset) = unspent_indexes(value, code, offset)?;

    let mut outputs = Vec::with_capacity(indexes.len());
    for index in indexes {
        let (output, next) = read_compressed_output(value, offset, index)?;
        outputs.push(output);
        offset = next;
    }

    let (height, offset) = read_varint(value, offset)?;
    if offset != value.len() {
        return Err(ChainstateError::malformed(format!(
            "decoded {} of {} bytes",
            offset,
            value.len()
        )));
    }

    trace!(version, outputs = outputs.len(), height, "decoded coins");

    Ok(UtxoRecord {
        txid,
        height: height_from_u64(height)?,
        is_coinbase,
        version: Some(version),
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ScriptType;
    use crate::varint::{compress_amount, encode_b128};

    fn key() -> Vec<u8> {
        let mut k = vec![b'c'];
        k.extend_from_slice(&[0x5a; 32]);
        k
    }

    fn p2pkh_output(amount: u64, hash_byte: u8) -> Vec<u8> {
        let mut v = encode_b128(compress_amount(amount));
        v.push(0x00);
        v.extend_from_slice(&[hash_byte; 20]);
        v
    }

    #[test]
    fn test_decode_core_example_vout1() {
        // coins.h example: version 1, code 4, vout[1] 600 BTC P2PKH, height 203998
        let value = hex::decode("0104835800816115944e077fe7c803cfa57f29b36bf87c1d358bb85e").unwrap();
        let rec = decode(&key(), &value).unwrap();
        assert_eq!(rec.version, Some(1));
        assert!(!rec.is_coinbase);
        assert_eq!(rec.height, 203_998);
        assert_eq!(rec.txid, [0x5a; 32]);
        assert_eq!(rec.outputs.len(), 1);
        let out = &rec.outputs[0];
        assert_eq!(out.index, 1);
        assert_eq!(out.amount, 60_000_000_000);
        assert_eq!(out.script_type, ScriptType::P2pkh);
        assert_eq!(hex::encode(&out.script_data), "816115944e077fe7c803cfa57f29b36bf87c1d35");
    }

    #[test]
    fn test_decode_core_example_bitvector() {
        // coins.h example: coinbase, vout[0] and vout[1] spent, code 9 stores N-1 = 1,
        // bit-vector 0x04 0x40 -> vout[4] and vout[16], height 120891
        let value = hex::decode(
            "0109044086ef97d5790061b01caab50f1b8e9c50a5057eb43c2d9563a4eebbd123008c988f1a4a4de2161e0f50aac7f17e7f9555caa486af3b",
        )
        .unwrap();
        let rec = decode(&key(), &value).unwrap();
        assert!(rec.is_coinbase);
        assert_eq!(rec.height, 120_891);
        let idx: Vec<u32> = rec.outputs.iter().map(|o| o.index).collect();
        assert_eq!(idx, vec![4, 16]);
        assert_eq!(rec.outputs[0].amount, 234_925_952);
        assert_eq!(hex::encode(&rec.outputs[0].script_data), "61b01caab50f1b8e9c50a5057eb43c2d9563a4ee");
        assert_eq!(rec.outputs[1].amount, 110_397);
        assert_eq!(hex::encode(&rec.outputs[1].script_data), "8c988f1a4a4de2161e0f50aac7f17e7f9555caa4");
    }

    #[test]
    fn test_both_first_outputs_spent_stores_n_minus_one() {
        // code 0: N - 1 = 0, so one non-zero bit-vector byte follows; 0x01 -> vout[2]
        let mut value = vec![0x01, 0x00, 0x01];
        value.extend(p2pkh_output(1000, 0x77));
        value.extend(encode_b128(42));
        let rec = decode(&key(), &value).unwrap();
        assert_eq!(rec.outputs.len(), 1);
        assert_eq!(rec.outputs[0].index, 2);
        assert_eq!(rec.outputs[0].amount, 1000);
        assert_eq!(rec.height, 42);

        // read as N instead of N - 1 there would be no bit-vector at all
        let (idx, next) = unspent_indexes(&value, 0, 2).unwrap();
        assert_eq!(idx, vec![2]);
        assert_eq!(next, 3);
    }

    #[test]
    fn test_zero_bitvector_bytes_do_not_count() {
        // code 0 -> one non-zero byte; 0x00 is skipped, 0x02 sets bit 1 of byte 1 -> vout 8+1+2
        let (idx, next) = unspent_indexes(&[0x00, 0x02, 0xff], 0, 0).unwrap();
        assert_eq!(idx, vec![11]);
        assert_eq!(next, 2);
    }

    #[test]
    fn test_flags_and_bitvector_combined() {
        // vout0 + vout1 unspent, N = 1: code = 1 << 3 | 0x04 | 0x02
        let code = (1 << 3) | 0x04 | 0x02;
        let (idx, next) = unspent_indexes(&[0x81], code, 0).unwrap();
        assert_eq!(idx, vec![0, 1, 2, 9]);
        assert_eq!(next, 1);
    }

    #[test]
    fn test_two_outputs_vout0_and_vout1() {
        let mut value = vec![0x01, 0x06];
        value.extend(p2pkh_output(10, 0x01));
        value.extend(p2pkh_output(20, 0x02));
        value.extend(encode_b128(7));
        let rec = decode(&key(), &value).unwrap();
        let got: Vec<(u32, u64)> = rec.outputs.iter().map(|o| (o.index, o.amount)).collect();
        assert_eq!(got, vec![(0, 10), (1, 20)]);
    }

    #[test]
    fn test_trailing_bytes_are_fatal() {
        let mut value = hex::decode("0104835800816115944e077fe7c803cfa57f29b36bf87c1d358bb85e").unwrap();
        value.push(0x00);
        assert!(matches!(decode(&key(), &value), Err(ChainstateError::MalformedRecord(_))));
    }

    #[test]
    fn test_truncated_record_is_fatal() {
        let value = hex::decode("0104835800816115944e077fe7c803cfa57f29b36bf87c").unwrap();
        assert!(matches!(decode(&key(), &value), Err(ChainstateError::MalformedRecord(_))));

        // bit-vector promised but missing
        assert!(decode(&key(), &[0x01, 0x00]).is_err());
    }

    #[test]
    fn test_short_key_is_fatal() {
        let value = hex::decode("0104835800816115944e077fe7c803cfa57f29b36bf87c1d358bb85e").unwrap();
        assert!(decode(&[b'c', 0x01], &value).is_err());
    }

    #[test]
    fn test_per_output_key_is_rejected() {
        let value = hex::decode("0104835800816115944e077fe7c803cfa57f29b36bf87c1d358bb85e").unwrap();
        let mut modern_key = key();
        modern_key[0] = b'C';
        assert!(matches!(decode(&modern_key, &value), Err(ChainstateError::MalformedRecord(_))));
    }
}
