//! Per-address unspent balances recovered from a node's chainstate LevelDB.
//!
//! Pipeline: iterate the store ([`store`]), strip the XOR obfuscation
//! ([`obfuscation`]), decode records ([`record`], [`legacy`], [`modern`]),
//! derive addresses ([`address`]), accumulate balances ([`aggregate`]) and
//! write them out ([`emit`]). [`scan`] wires the first four together.

pub mod address;
pub mod aggregate;
pub mod emit;
pub mod error;
pub mod legacy;
pub mod modern;
pub mod obfuscation;
pub mod record;
pub mod scan;
pub mod settings;
pub mod store;
pub mod telemetry;
pub mod varint;

pub use error::{ChainstateError, Result};
