//! Error type for chainstate decoding and balance aggregation
//!
//! Every decode step is fail-fast: a single bad offset invalidates the rest of
//! the record, so malformed input aborts the run instead of being skipped.
//! Outputs whose script type cannot be mapped to an address are not errors;
//! they are tallied in [`crate::scan::ScanSummary`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainstateError {
    /// Node version older than the oldest chainstate layout we can read.
    #[error("unsupported chainstate format version {version} (minimum is 0.8)")]
    UnsupportedFormatVersion { version: String },

    /// Any length mismatch or structurally invalid field inside a record.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("obfuscation key length mismatch: expected {expected} bytes, got {actual}")]
    ObfuscationLengthMismatch { expected: usize, actual: usize },

    #[error("chainstate store error: {0}")]
    Store(String),

    #[error("aggregation backend error: {0}")]
    Aggregation(String),

    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ChainstateError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ChainstateError::MalformedRecord(msg.into())
    }
}

impl From<rusqlite::Error> for ChainstateError {
    fn from(e: rusqlite::Error) -> Self {
        ChainstateError::Aggregation(e.to_string())
    }
}

impl From<config::ConfigError> for ChainstateError {
    fn from(e: config::ConfigError) -> Self {
        ChainstateError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChainstateError>;
