//! CSV output.
//!
//! [`CsvBalanceWriter`] is the sink the aggregators drain into;
//! [`append_hash_column`] re-reads such a file and appends the hash each
//! address commits to.

use std::io::{Read, Write};

use tracing::debug;

use crate::address::address_to_hash_hex;
use crate::aggregate::{BalanceEntry, BalanceSink};
use crate::error::Result;

pub const BALANCE_HEADER: [&str; 3] = ["address", "value_satoshi", "last_height"];
pub const HASH_COLUMN: &str = "ripemd";

/// Writes `address,value_satoshi,last_height` rows.
pub struct CsvBalanceWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl<W: Write> CsvBalanceWriter<W> {
    /// Wraps `inner` and writes the header row.
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(BALANCE_HEADER)?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flushes, terminates the output with one empty line and returns the row count.
    pub fn finish(self) -> Result<usize> {
        let mut inner = self.writer.into_inner().map_err(|e| e.into_error())?;
        inner.write_all(b"\n")?;
        inner.flush()?;
        debug!(rows = self.rows, "CSV output finished");
        Ok(self.rows)
    }
}

impl<W: Write> BalanceSink for CsvBalanceWriter<W> {
    fn write_entry(&mut self, entry: &BalanceEntry) -> Result<()> {
        self.writer.write_record(&[
            entry.address.clone(),
            entry.amount.to_string(),
            entry.last_height.to_string(),
        ])?;
        self.rows += 1;
        Ok(())
    }
}

/// Copies a balance CSV from `reader` to `writer` with an extra `ripemd`
/// column holding the hex hash of the first column's address. Blank lines are
/// dropped. Returns the number of data rows.
pub fn append_hash_column<R: Read, W: Write>(reader: R, writer: W) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(writer);

    let mut header = reader.headers()?.clone();
    header.push_field(HASH_COLUMN);
    writer.write_record(&header)?;

    let mut rows = 0;
    for record in reader.records() {
        let mut record = record?;
        let hash = address_to_hash_hex(record.get(0).unwrap_or_default())?;
        record.push_field(&hash);
        writer.write_record(&record)?;
        rows += 1;
    }
    writer.flush()?;
    Ok(rows)
}
