//! Chainstate value obfuscation.
//!
//! Since 0.12 the node XORs every value with a random per-database key, stored
//! under `0x0e 0x00 "obfuscate_key"`. The stored value is a one-byte length
//! followed by the key bytes. Databases created earlier have no key and values
//! are stored as-is.

use crate::error::{ChainstateError, Result};
use crate::store::ChainstateStore;

/// Reserved key holding the obfuscation key.
pub const OBFUSCATE_KEY_KEY: &[u8] = b"\x0e\x00obfuscate_key";

/// XOR keystream loaded once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObfuscationKey(Vec<u8>);

impl ObfuscationKey {
    pub fn new(key: Vec<u8>) -> Result<Self> {
        if key.is_empty() {
            return Err(ChainstateError::ObfuscationLengthMismatch { expected: 1, actual: 0 });
        }
        Ok(Self(key))
    }

    /// Look up the key; `None` means de-obfuscation is the identity.
    pub fn load<S: ChainstateStore + ?Sized>(store: &mut S) -> Result<Option<Self>> {
        match store.get(OBFUSCATE_KEY_KEY)? {
            None => Ok(None),
            Some(raw) => Self::from_stored(&raw).map(Some),
        }
    }

    /// Parse the stored `len || key` form.
    pub fn from_stored(raw: &[u8]) -> Result<Self> {
        let (&declared, key) = raw
            .split_first()
            .ok_or(ChainstateError::ObfuscationLengthMismatch { expected: 1, actual: 0 })?;
        if usize::from(declared) != key.len() {
            return Err(ChainstateError::ObfuscationLengthMismatch {
                expected: usize::from(declared),
                actual: key.len(),
            });
        }
        Self::new(key.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// XOR `value` with the key repeated to the value's length.
    ///
    /// XOR is its own inverse, so the same call obfuscates plain values.
    pub fn apply(&self, value: &[u8]) -> Result<Vec<u8>> {
        let out: Vec<u8> = value
            .iter()
            .zip(self.0.iter().cycle())
            .map(|(v, k)| v ^ k)
            .collect();
        if out.len() != value.len() {
            return Err(ChainstateError::ObfuscationLengthMismatch {
                expected: value.len(),
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

/// De-obfuscate with an optional key.
pub fn deobfuscate(key: Option<&ObfuscationKey>, value: Vec<u8>) -> Result<Vec<u8>> {
    match key {
        Some(k) => k.apply(&value),
        None => Ok(value),
    }
}
