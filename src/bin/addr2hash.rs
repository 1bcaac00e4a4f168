//! Appends a `ripemd` column to a balance CSV written by `utxobal`.
//!
//! Base58 addresses get their hash160, bech32 addresses their witness
//! program, the `P2PK` row an empty field. Output goes to stdout.

use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};

use utxobal::emit::append_hash_column;

#[derive(Parser, Debug)]
#[clap(name = "addr2hash")]
#[clap(about = "Add the hash each address commits to as a last CSV column", long_about = None)]
struct Args {
    /// Balance CSV; first column is the address
    #[clap(value_name = "CSV_FILE")]
    csv: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let path = shellexpand::tilde(&args.csv).to_string();

    let reader = BufReader::new(File::open(&path)?);
    let stdout = io::stdout();
    append_hash_column(reader, BufWriter::new(stdout.lock()))?;
    Ok(())
}
