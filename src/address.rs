// address.rs

use sha2::{Digest, Sha256};
use serde::{de, Deserialize, Deserializer};
use std::fmt;

use crate::error::{ChainstateError, Result};
use crate::record::{Output, ScriptType};

/// Aggregation key for pay-to-pubkey outputs; the key is not turned into an address.
pub const P2PK_SENTINEL: &str = "P2PK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn pubkey_hash_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x6f,
        }
    }

    pub fn script_hash_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x05,
            Network::Testnet => 0xc4,
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            other => Err(format!("unknown network {:?} (expected mainnet or testnet)", other)),
        }
    }
}

// Settings go through the same parser as the command line.
impl<'de> Deserialize<'de> for Network {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Where an output's balance is accumulated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    /// Base58Check P2PKH or P2SH address.
    Base58(String),
    /// Pay-to-pubkey output; all of them share one bucket.
    PublicKey,
}

impl Address {
    pub fn as_str(&self) -> &str {
        match self {
            Address::Base58(s) => s,
            Address::PublicKey => P2PK_SENTINEL,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn sha256d(data: &[u8]) -> Vec<u8> {
    let first = Sha256::digest(data);
    Sha256::digest(&first).to_vec()
}

/// `version || hash` plus the first four bytes of its double SHA-256, in Base58.
pub fn hash_address(hash: &[u8], version: u8) -> String {
    let mut extended_hash = Vec::with_capacity(hash.len() + 5);
    extended_hash.push(version);
    extended_hash.extend_from_slice(hash);

    let checksum = sha256d(&extended_hash);
    extended_hash.extend_from_slice(&checksum[0..4]);

    bs58::encode(extended_hash).into_string()
}

pub fn derive_p2pkh_or_p2sh(hash160: &[u8], version: u8) -> Address {
    Address::Base58(hash_address(hash160, version))
}

pub fn derive_p2pk() -> Address {
    Address::PublicKey
}

/// Address for a decoded output, or `None` when the script type has no
/// address form here (uncompacted scripts).
pub fn derive_address(output: &Output, network: Network) -> Option<Address> {
    match output.script_type {
        ScriptType::P2pkh => Some(derive_p2pkh_or_p2sh(&output.script_data, network.pubkey_hash_version())),
        ScriptType::P2sh => Some(derive_p2pkh_or_p2sh(&output.script_data, network.script_hash_version())),
        ScriptType::P2pk(_) => Some(derive_p2pk()),
        ScriptType::Custom { .. } => None,
    }
}

/// Base58Check payload with the version byte and checksum stripped.
pub fn decode_base58check(address: &str) -> Result<Vec<u8>> {
    let raw = bs58::decode(address)
        .into_vec()
        .map_err(|e| ChainstateError::InvalidAddress(format!("{}: {}", address, e)))?;
    if raw.len() < 5 {
        return Err(ChainstateError::InvalidAddress(format!("{}: too short", address)));
    }
    let (body, checksum) = raw.split_at(raw.len() - 4);
    if sha256d(body)[0..4] != *checksum {
        return Err(ChainstateError::InvalidAddress(format!("{}: bad checksum", address)));
    }
    Ok(body[1..].to_vec())
}

/// Segwit addresses are recognised by their human-readable part.
pub fn is_bech32_address(address: &str) -> bool {
    let lower = address.to_ascii_lowercase();
    ["bc1", "tb1", "bcrt1"].iter().any(|p| lower.starts_with(p))
}

/// Witness program of a segwit address.
pub fn decode_witness_program(address: &str) -> Result<Vec<u8>> {
    let (_hrp, _version, program) = bech32::segwit::decode(address)
        .map_err(|e| ChainstateError::InvalidAddress(format!("{}: {}", address, e)))?;
    Ok(program)
}

/// Hex of the hash an address commits to: hash160 for Base58Check, the
/// witness program for bech32. The P2PK bucket has no hash and maps to "".
pub fn address_to_hash_hex(address: &str) -> Result<String> {
    if address == P2PK_SENTINEL {
        return Ok(String::new());
    }
    let hash = if is_bech32_address(address) {
        decode_witness_program(address)?
    } else {
        decode_base58check(address)?
    };
    Ok(hex::encode(hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_address_known_vectors() {
        assert_eq!(hash_address(&[0u8; 20], 0x00), "1111111111111111111114oLvT2");
        let h = hex::decode("010966776006953d5567439e5e39f86a0d273bee").unwrap();
        assert_eq!(hash_address(&h, 0x00), "16UwLL9Risc3QfPqBUvKofHmBQ7wMtjvM");
    }

    #[test]
    fn test_hash_address_is_deterministic_and_sensitive() {
        let h = hex::decode("816115944e077fe7c803cfa57f29b36bf87c1d35").unwrap();
        let a = hash_address(&h, 0x00);
        assert_eq!(a, hash_address(&h, 0x00));
        assert!(a.starts_with('1'));

        for i in 0..h.len() {
            let mut corrupted = h.clone();
            corrupted[i] ^= 0x01;
            assert_ne!(hash_address(&corrupted, 0x00), a, "byte {}", i);
        }
    }

    #[test]
    fn test_version_bytes() {
        let h = [0x42u8; 20];
        assert!(hash_address(&h, Network::Mainnet.script_hash_version()).starts_with('3'));
        let t = hash_address(&h, Network::Testnet.pubkey_hash_version());
        assert!(t.starts_with('m') || t.starts_with('n'));
        assert!(hash_address(&h, Network::Testnet.script_hash_version()).starts_with('2'));
    }

    #[test]
    fn test_derive_address_by_script_type() {
        let out = |script_type, script_data: Vec<u8>| Output { index: 0, amount: 1, script_type, script_data };
        assert_eq!(
            derive_address(&out(ScriptType::P2pkh, vec![0; 20]), Network::Mainnet),
            Some(Address::Base58("1111111111111111111114oLvT2".to_string()))
        );
        assert_eq!(
            derive_address(&out(ScriptType::P2pk(2), vec![2; 33]), Network::Mainnet),
            Some(Address::PublicKey)
        );
        assert_eq!(derive_address(&out(ScriptType::Custom { len: 3 }, vec![1, 2, 3]), Network::Mainnet), None);
        assert_eq!(Address::PublicKey.to_string(), "P2PK");
    }

    #[test]
    fn test_decode_base58check_round_trip() {
        let h = hex::decode("010966776006953d5567439e5e39f86a0d273bee").unwrap();
        assert_eq!(decode_base58check("16UwLL9Risc3QfPqBUvKofHmBQ7wMtjvM").unwrap(), h);
        let p2sh = hash_address(&h, 0x05);
        assert_eq!(decode_base58check(&p2sh).unwrap(), h);
    }

    #[test]
    fn test_decode_base58check_rejects_bad_checksum() {
        assert!(matches!(
            decode_base58check("16UwLL9Risc3QfPqBUvKofHmBQ7wMtjvN"),
            Err(ChainstateError::InvalidAddress(_))
        ));
        assert!(decode_base58check("0OIl").is_err());
    }

    #[test]
    fn test_bech32_witness_program() {
        let addr = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
        assert!(is_bech32_address(addr));
        assert!(!is_bech32_address("16UwLL9Risc3QfPqBUvKofHmBQ7wMtjvM"));
        assert_eq!(address_to_hash_hex(addr).unwrap(), "751e76e8199196d454941c45d1b3a323f1433bd6");
        assert!(decode_witness_program("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t5").is_err());
    }

    #[test]
    fn test_address_to_hash_hex() {
        assert_eq!(
            address_to_hash_hex("16UwLL9Risc3QfPqBUvKofHmBQ7wMtjvM").unwrap(),
            "010966776006953d5567439e5e39f86a0d273bee"
        );
        assert_eq!(address_to_hash_hex(P2PK_SENTINEL).unwrap(), "");
    }
}
