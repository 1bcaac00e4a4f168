//! # Chainstate scan
//!
//! Drives one pass over the store: iterate entries of the selected layout,
//! de-obfuscate, decode, classify each output and hand kept outputs to the
//! caller as [`Contribution`]s. Strictly sequential; the first fatal error
//! aborts the scan.

use tracing::{debug, info, warn};

use crate::address::{derive_address, Address, Network};
use crate::aggregate::{BalanceAggregator, BalanceSink, DrainOptions};
use crate::error::{ChainstateError, Result};
use crate::obfuscation::{deobfuscate, ObfuscationKey};
use crate::record::{key_txid_hex, RecordFormat, ScriptType};
use crate::store::ChainstateStore;
use crate::telemetry::{truncate_hex, ProgressCounter};

/// Which compacted script types are turned into balance rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepTypes {
    pub p2pkh: bool,
    pub p2sh: bool,
    /// All P2PK outputs land in one [`Address::PublicKey`] row.
    pub p2pk: bool,
}

impl Default for KeepTypes {
    fn default() -> Self {
        KeepTypes { p2pkh: true, p2sh: true, p2pk: false }
    }
}

impl KeepTypes {
    pub fn includes(&self, script_type: ScriptType) -> bool {
        match script_type {
            ScriptType::P2pkh => self.p2pkh,
            ScriptType::P2sh => self.p2sh,
            ScriptType::P2pk(_) => self.p2pk,
            ScriptType::Custom { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub format: RecordFormat,
    pub keep: KeepTypes,
    pub network: Network,
    pub progress_interval: u64,
}

impl ScanOptions {
    pub fn new(format: RecordFormat) -> Self {
        Self { format, keep: KeepTypes::default(), network: Network::Mainnet, progress_interval: 100_000 }
    }
}

/// One output's share of an address balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    pub address: Address,
    pub amount: u64,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub records: u64,
    pub outputs: u64,
    pub contributed: u64,
    /// Known script types the caller chose not to keep.
    pub skipped_outputs: u64,
    /// Uncompacted scripts with no address form here.
    pub undecoded_outputs: u64,
    pub undecoded_amount: u64,
    pub obfuscated: bool,
}

/// Scan every record of `opts.format` and pass kept outputs to `on_contribution`.
pub fn scan_chainstate<S, F>(store: &mut S, opts: &ScanOptions, mut on_contribution: F) -> Result<ScanSummary>
where
    S: ChainstateStore + ?Sized,
    F: FnMut(Contribution) -> Result<()>,
{
    let key = ObfuscationKey::load(store)?;
    match &key {
        Some(k) => info!(key = %hex::encode(k.as_bytes()), "obfuscation key found"),
        None => info!("no obfuscation key, values are stored in the clear"),
    }

    let mut summary = ScanSummary { obfuscated: key.is_some(), ..Default::default() };
    let progress = ProgressCounter::new(opts.progress_interval);
    let prefix = opts.format.key_prefix();

    info!(format = %opts.format, prefix = %format!("0x{:02x}", prefix), "scanning chainstate");

    for (raw_key, raw_value) in store.prefix_iter(prefix)? {
        let value = deobfuscate(key.as_ref(), raw_value)?;
        let record = opts.format.decode(&raw_key, &value).map_err(|e| {
            match key_txid_hex(&raw_key) {
                Some(txid) => warn!(%txid, error = %e, "failed to decode record"),
                None => warn!(key = %truncate_hex(&hex::encode(&raw_key), 16), error = %e, "failed to decode record"),
            }
            e
        })?;
        summary.records += 1;

        for output in record.outputs {
            if progress.should_log() {
                info!(outputs = summary.outputs, records = summary.records, "scan progress");
            }
            summary.outputs += 1;

            if !opts.keep.includes(output.script_type) {
                if let ScriptType::Custom { .. } = output.script_type {
                    summary.undecoded_outputs += 1;
                    summary.undecoded_amount =
                        summary.undecoded_amount.checked_add(output.amount).ok_or_else(|| {
                            ChainstateError::malformed(format!(
                                "undecoded total overflows adding {} satoshi",
                                output.amount
                            ))
                        })?;
                } else {
                    summary.skipped_outputs += 1;
                }
                continue;
            }

            let address = derive_address(&output, opts.network).ok_or_else(|| {
                ChainstateError::malformed(format!("no address form for script type {}", output.script_type.code()))
            })?;
            on_contribution(Contribution { address, amount: output.amount, height: record.height })?;
            summary.contributed += 1;
        }
    }

    debug!(?summary, "scan finished");
    info!(
        records = summary.records,
        outputs = summary.outputs,
        undecoded = summary.undecoded_outputs,
        undecoded_satoshi = summary.undecoded_amount,
        "chainstate scan complete"
    );
    Ok(summary)
}

/// Full run: scan `store` into `aggregator`, then drain it into `sink`.
///
/// Returns the scan summary and the number of rows handed to `sink`.
pub fn export_balances<S>(
    store: &mut S,
    opts: &ScanOptions,
    aggregator: &mut dyn BalanceAggregator,
    drain: DrainOptions,
    sink: &mut dyn BalanceSink,
) -> Result<(ScanSummary, usize)>
where
    S: ChainstateStore + ?Sized,
{
    info!(backend = aggregator.backend_type(), "aggregating balances");
    let summary = scan_chainstate(store, opts, |c| aggregator.contribute(&c.address, c.amount, c.height))?;
    let rows = aggregator.drain(drain, sink)?;
    info!(rows, sort = ?drain.order, "balances written");
    Ok((summary, rows))
}
