//! Per-output chainstate entries (node 0.15+).
//!
//! ```text
//! key:   'C' | txid (32, LE) | VARINT(vout)
//! value: VARINT(height * 2 + coinbase) | VARINT(compressed amount) | VARINT(type) | script
//! ```
//!
//! The script occupies the rest of the value and its length is fixed by the
//! type (see [`ScriptType::data_len`]).

use tracing::trace;

use crate::error::{ChainstateError, Result};
use crate::record::{height_from_u64, read_compressed_output, txid_from_key, ScriptType, UtxoRecord, MODERN_PREFIX};
use crate::varint::read_varint;

/// Split a `C` key into txid and output index.
pub fn parse_key(key: &[u8]) -> Result<([u8; 32], u32)> {
    if key.first() != Some(&MODERN_PREFIX) {
        return Err(ChainstateError::malformed(format!(
            "key does not start with 0x{:02x}",
            MODERN_PREFIX
        )));
    }
    let txid = txid_from_key(key)?;
    let (vout, end) = read_varint(key, 33)?;
    if end != key.len() {
        return Err(ChainstateError::malformed(format!(
            "{} trailing bytes after output index in key",
            key.len() - end
        )));
    }
    let vout = u32::try_from(vout)
        .map_err(|_| ChainstateError::malformed(format!("output index {} out of range", vout)))?;
    Ok((txid, vout))
}

/// Decode one per-output entry.
pub fn decode(key: &[u8], value: &[u8]) -> Result<UtxoRecord> {
    let (txid, vout) = parse_key(key)?;

    let (code, offset) = read_varint(value, 0)?;
    let height = height_from_u64(code >> 1)?;
    let is_coinbase = code & 1 == 1;

    let (output, end) = read_compressed_output(value, offset, vout)?;
    if end != value.len() {
        return Err(script_len_mismatch(&output.script_type, value.len() - (end - output.script_data.len())));
    }

    trace!(vout, height, amount = output.amount, script_type = output.script_type.code(), "decoded coin");

    Ok(UtxoRecord { txid, height, is_coinbase, version: None, outputs: vec![output] })
}

fn script_len_mismatch(script_type: &ScriptType, actual: usize) -> ChainstateError {
    ChainstateError::malformed(format!(
        "script type {} implies {} script bytes, record has {}",
        script_type.code(),
        script_type.data_len(),
        actual
    ))
}
