//! # Decoded UTXO records
//!
//! Shared data model for both chainstate layouts plus the per-run format
//! selector. The two layouts are:
//!
//! - **Legacy** (node 0.8 - 0.14): one `c`-prefixed entry per transaction, all
//!   unspent outputs packed behind an unspentness bit-vector. See [`crate::legacy`].
//! - **Modern** (node 0.15+): one `C`-prefixed entry per output. See [`crate::modern`].
//!
//! Both produce the same [`UtxoRecord`].

use std::fmt;
use std::str::FromStr;

use crate::error::{ChainstateError, Result};
use crate::varint::{decompress_amount, read_varint};

/// Key prefix of per-transaction entries written by 0.8 - 0.14.
pub const LEGACY_PREFIX: u8 = b'c';
/// Key prefix of per-output entries written by 0.15+.
pub const MODERN_PREFIX: u8 = b'C';

/// Number of script types with a compacted encoding (ScriptCompression nSpecialScripts).
pub const N_SPECIAL_SCRIPTS: u64 = 6;

/// Compressed script classification, keyed off the script type varint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptType {
    /// 0: 20-byte pubkey hash.
    P2pkh,
    /// 1: 20-byte script hash.
    P2sh,
    /// 2..=5: 33 bytes, the type byte itself plus the 32-byte x coordinate.
    P2pk(u8),
    /// >= 6: uncompacted script of `code - 6` bytes.
    Custom { len: usize },
}

impl ScriptType {
    pub fn from_code(code: u64) -> Result<Self> {
        Ok(match code {
            0 => ScriptType::P2pkh,
            1 => ScriptType::P2sh,
            2..=5 => ScriptType::P2pk(code as u8),
            n => {
                let len = usize::try_from(n - N_SPECIAL_SCRIPTS).map_err(|_| {
                    ChainstateError::malformed(format!("script type {} too large", n))
                })?;
                ScriptType::Custom { len }
            }
        })
    }

    pub fn code(&self) -> u64 {
        match *self {
            ScriptType::P2pkh => 0,
            ScriptType::P2sh => 1,
            ScriptType::P2pk(t) => u64::from(t),
            ScriptType::Custom { len } => len as u64 + N_SPECIAL_SCRIPTS,
        }
    }

    /// Exact number of script bytes that must follow.
    pub fn data_len(&self) -> usize {
        match *self {
            ScriptType::P2pkh | ScriptType::P2sh => 20,
            ScriptType::P2pk(_) => 33,
            ScriptType::Custom { len } => len,
        }
    }

    /// P2PK keeps the type byte as the first byte of the key span.
    pub fn includes_type_byte(&self) -> bool {
        matches!(self, ScriptType::P2pk(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Output index (vout) within the transaction.
    pub index: u32,
    /// Satoshis.
    pub amount: u64,
    pub script_type: ScriptType,
    pub script_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoRecord {
    /// Transaction id as stored in the key (little-endian).
    pub txid: [u8; 32],
    pub height: u32,
    pub is_coinbase: bool,
    /// Transaction version; only the legacy layout stores it.
    pub version: Option<u64>,
    /// Unspent outputs in ascending index order. Always one for the modern layout.
    pub outputs: Vec<Output>,
}

/// Transaction id in the usual display order (keys store it little-endian).
pub fn txid_hex(txid: &[u8; 32]) -> String {
    let mut be = *txid;
    be.reverse();
    hex::encode(be)
}

/// Display txid of a record key, or `None` if the key is too short to hold one.
pub fn key_txid_hex(key: &[u8]) -> Option<String> {
    txid_from_key(key).ok().map(|txid| txid_hex(&txid))
}

/// Node version that wrote the chainstate, as `MAJOR.MINOR`.
///
/// `0.08` and `0.8` are the same version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeVersion {
    pub major: u32,
    pub minor: u32,
}

impl NodeVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Oldest layout we can read.
    pub const MINIMUM: NodeVersion = NodeVersion::new(0, 8);
    /// First release with per-output entries.
    pub const PER_OUTPUT: NodeVersion = NodeVersion::new(0, 15);
}

impl FromStr for NodeVersion {
    type Err = ChainstateError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || ChainstateError::Config(format!("invalid node version {:?}, expected MAJOR.MINOR", s));
        let s = s.trim().trim_start_matches('v');
        let (major, minor) = match s.split_once('.') {
            Some((major, minor)) => (major, minor.split('.').next().unwrap_or("0")),
            None => (s, "0"),
        };
        Ok(NodeVersion {
            major: major.parse().map_err(|_| bad())?,
            minor: minor.parse().map_err(|_| bad())?,
        })
    }
}

impl fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Record layout, chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Legacy,
    Modern,
}

impl RecordFormat {
    pub fn for_version(version: NodeVersion) -> Result<Self> {
        if version < NodeVersion::MINIMUM {
            Err(ChainstateError::UnsupportedFormatVersion { version: version.to_string() })
        } else if version < NodeVersion::PER_OUTPUT {
            Ok(RecordFormat::Legacy)
        } else {
            Ok(RecordFormat::Modern)
        }
    }

    pub fn key_prefix(self) -> u8 {
        match self {
            RecordFormat::Legacy => LEGACY_PREFIX,
            RecordFormat::Modern => MODERN_PREFIX,
        }
    }

    /// Decode one de-obfuscated entry.
    pub fn decode(self, key: &[u8], value: &[u8]) -> Result<UtxoRecord> {
        match self {
            RecordFormat::Legacy => crate::legacy::decode(key, value),
            RecordFormat::Modern => crate::modern::decode(key, value),
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordFormat::Legacy => write!(f, "legacy (per-transaction)"),
            RecordFormat::Modern => write!(f, "modern (per-output)"),
        }
    }
}

/// Read `VARINT(compressed amount) VARINT(type) script` starting at `offset`.
///
/// Returns the output and the offset right after the script bytes. Fails if
/// the buffer is shorter than the script type requires.
pub(crate) fn read_compressed_output(value: &[u8], offset: usize, index: u32) -> Result<(Output, usize)> {
    let (compressed, offset) = read_varint(value, offset)?;
    let amount = decompress_amount(compressed)?;

    let type_start = offset;
    let (code, offset) = read_varint(value, offset)?;
    let script_type = ScriptType::from_code(code)?;

    // P2PK: rewind over the type varint, it is the first byte of the key span
    let start = if script_type.includes_type_byte() { type_start } else { offset };
    let len = script_type.data_len();
    let end = start
        .checked_add(len)
        .filter(|&end| end <= value.len())
        .ok_or_else(|| {
            ChainstateError::malformed(format!(
                "script type {} needs {} bytes at offset {}, only {} left",
                code,
                len,
                start,
                value.len().saturating_sub(start)
            ))
        })?;

    Ok((
        Output { index, amount, script_type, script_data: value[start..end].to_vec() },
        end,
    ))
}

/// First 32 key bytes after the prefix.
pub(crate) fn txid_from_key(key: &[u8]) -> Result<[u8; 32]> {
    key.get(1..33)
        .and_then(|s| <[u8; 32]>::try_from(s).ok())
        .ok_or_else(|| ChainstateError::malformed(format!("key too short for txid: {} bytes", key.len())))
}

pub(crate) fn height_from_u64(h: u64) -> Result<u32> {
    u32::try_from(h).map_err(|_| ChainstateError::malformed(format!("height {} out of range", h)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_type_lengths() {
        assert_eq!(ScriptType::from_code(0).unwrap().data_len(), 20);
        assert_eq!(ScriptType::from_code(1).unwrap().data_len(), 20);
        for code in 2..=5 {
            let t = ScriptType::from_code(code).unwrap();
            assert_eq!(t.data_len(), 33);
            assert!(t.includes_type_byte());
        }
        assert_eq!(ScriptType::from_code(6).unwrap(), ScriptType::Custom { len: 0 });
        assert_eq!(ScriptType::from_code(28).unwrap().data_len(), 22);
        assert_eq!(ScriptType::from_code(28).unwrap().code(), 28);
    }

    #[test]
    fn test_node_version_parse() {
        assert_eq!("0.15".parse::<NodeVersion>().unwrap(), NodeVersion::new(0, 15));
        assert_eq!("0.08".parse::<NodeVersion>().unwrap(), NodeVersion::new(0, 8));
        assert_eq!("0.8".parse::<NodeVersion>().unwrap(), NodeVersion::new(0, 8));
        assert_eq!("22.0".parse::<NodeVersion>().unwrap(), NodeVersion::new(22, 0));
        assert_eq!("v0.14.2".parse::<NodeVersion>().unwrap(), NodeVersion::new(0, 14));
        assert_eq!("25".parse::<NodeVersion>().unwrap(), NodeVersion::new(25, 0));
        assert!("latest".parse::<NodeVersion>().is_err());
    }

    #[test]
    fn test_format_selection() {
        assert_eq!(RecordFormat::for_version(NodeVersion::new(0, 8)).unwrap(), RecordFormat::Legacy);
        assert_eq!(RecordFormat::for_version(NodeVersion::new(0, 14)).unwrap(), RecordFormat::Legacy);
        assert_eq!(RecordFormat::for_version(NodeVersion::new(0, 15)).unwrap(), RecordFormat::Modern);
        assert_eq!(RecordFormat::for_version(NodeVersion::new(26, 1)).unwrap(), RecordFormat::Modern);
        assert!(matches!(
            RecordFormat::for_version(NodeVersion::new(0, 7)),
            Err(ChainstateError::UnsupportedFormatVersion { .. })
        ));
        assert_eq!(RecordFormat::Legacy.key_prefix(), 0x63);
        assert_eq!(RecordFormat::Modern.key_prefix(), 0x43);
    }

    #[test]
    fn test_txid_hex_is_reversed() {
        let mut txid = [0u8; 32];
        txid[0] = 0xaa;
        txid[31] = 0x01;
        let hex = txid_hex(&txid);
        assert!(hex.starts_with("01"));
        assert!(hex.ends_with("aa"));

        let mut key = vec![b'C'];
        key.extend_from_slice(&txid);
        key.push(0x00);
        assert_eq!(key_txid_hex(&key), Some(hex));
        assert_eq!(key_txid_hex(&[b'C', 0x01]), None);
    }

    #[test]
    fn test_read_compressed_output_short_script() {
        // amount 1, type P2PKH, only 3 hash bytes
        let value = [0x01, 0x00, 0xaa, 0xbb, 0xcc];
        assert!(matches!(
            read_compressed_output(&value, 0, 0),
            Err(ChainstateError::MalformedRecord(_))
        ));
    }
}
