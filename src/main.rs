//! utxobal
//!
//! Dumps per-address balances from a Bitcoin node's chainstate LevelDB to CSV.
//!
//! ## Usage
//!
//! ```bash
//! # Stop the node (or copy the directory) first: LevelDB allows one opener.
//! cp -r ~/.bitcoin/chainstate /tmp/chainstate-copy
//!
//! utxobal /tmp/chainstate-copy balances.csv --sort DESC
//! utxobal /tmp/chainstate-copy balances.csv --node-version 0.14 --lowmem --keep-sqlite /tmp/balances.db
//! ```
//!
//! Settings come from `utxobal.toml` and `UTXOBAL_*` environment variables;
//! flags given here win.

use clap::{ArgAction, Parser};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;

use utxobal::address::Network;
use utxobal::aggregate::{BalanceAggregator, DrainOptions, InMemoryAggregator, SortOrder, SqliteAggregator};
use utxobal::emit::CsvBalanceWriter;
use utxobal::record::{NodeVersion, RecordFormat};
use utxobal::scan::{export_balances, KeepTypes, ScanOptions};
use utxobal::settings::Settings;
use utxobal::store::LevelDbChainstate;
use utxobal::telemetry::{init_tracing, TelemetryConfig};

#[derive(Parser, Debug)]
#[clap(name = "utxobal")]
#[clap(about = "Export address balances from a Bitcoin chainstate LevelDB to CSV", long_about = None)]
struct Args {
    /// Path to the chainstate directory
    #[clap(value_name = "PATH_TO_CHAINSTATE_DIR")]
    chainstate: String,

    /// Output CSV file
    #[clap(value_name = "OUTFILE")]
    out: String,

    /// Version of the node that wrote the chainstate (below 0.15 uses the per-transaction layout)
    #[clap(long, alias = "bitcoin-version")]
    node_version: Option<String>,

    /// mainnet or testnet address version bytes
    #[clap(long)]
    network: Option<Network>,

    /// Aggregate in a SQLite file instead of memory
    #[clap(long, default_value_t = false)]
    lowmem: bool,

    /// Keep the SQLite database at this path (requires --lowmem)
    #[clap(long, requires = "lowmem", value_name = "PATH_TO_SQLITE_FILE")]
    keep_sqlite: Option<String>,

    /// Include pay-to-pubkey-hash outputs
    #[clap(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    p2pkh: bool,

    /// Include pay-to-script-hash outputs
    #[clap(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    p2sh: bool,

    /// Include pay-to-pubkey outputs, summed under a single "P2PK" row
    #[clap(long, action = ArgAction::Set, default_value_t = false, value_name = "BOOL")]
    p2pk: bool,

    /// Sort rows by balance
    #[clap(long, value_name = "ASC/DESC")]
    sort: Option<SortOrder>,

    /// Config file name, without extension
    #[clap(long, default_value = "utxobal")]
    config: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let settings = Settings::load(&args.config)?;
    let _log_guard = init_tracing(TelemetryConfig::from(&settings))?;

    let version_str = args.node_version.clone().unwrap_or_else(|| settings.node_version.clone());
    let version: NodeVersion = version_str.parse()?;
    let format = RecordFormat::for_version(version)?;

    let chainstate_path = PathBuf::from(shellexpand::tilde(&args.chainstate).to_string());
    info!(path = %chainstate_path.display(), %version, %format, "opening chainstate");
    let mut store = LevelDbChainstate::open(&chainstate_path)?;

    let opts = ScanOptions {
        format,
        keep: KeepTypes { p2pkh: args.p2pkh, p2sh: args.p2sh, p2pk: args.p2pk },
        network: args.network.unwrap_or(settings.network),
        progress_interval: settings.progress_interval,
    };

    let keep_path = args.keep_sqlite.as_deref().map(|p| PathBuf::from(shellexpand::tilde(p).to_string()));
    let mut aggregator: Box<dyn BalanceAggregator> = if args.lowmem {
        Box::new(SqliteAggregator::open(keep_path.as_deref())?)
    } else {
        Box::new(InMemoryAggregator::new())
    };
    println!("reading chainstate database ({})", aggregator.backend_type());

    let out_path = shellexpand::tilde(&args.out).to_string();
    let mut writer = CsvBalanceWriter::new(BufWriter::new(File::create(&out_path)?))?;
    let drain = DrainOptions { order: args.sort, skip_zero: true };

    let (summary, _) = export_balances(&mut store, &opts, aggregator.as_mut(), drain, &mut writer)?;
    let rows = writer.finish()?;

    println!("\n📊 Summary:");
    println!("  Records:            {}", summary.records);
    println!("  Outputs:            {}", summary.outputs);
    println!("  Kept outputs:       {}", summary.contributed);
    println!("  Skipped outputs:    {}", summary.skipped_outputs);
    println!(
        "  Undecoded outputs:  {} ({} satoshi)",
        summary.undecoded_outputs, summary.undecoded_amount
    );
    println!("  Rows written:       {} -> {}", rows, out_path);
    if let Some(path) = keep_path {
        println!("  SQLite kept at:     {}", path.display());
    }

    Ok(())
}
