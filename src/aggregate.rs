//! # Balance aggregation
//!
//! Sums `(address, amount, height)` contributions into one row per address.
//! Two backends share the [`BalanceAggregator`] contract:
//!
//! - [`InMemoryAggregator`]: a `HashMap`, fastest, needs every address in RAM.
//! - [`SqliteAggregator`]: one SQLite table inside a single transaction, for
//!   chainstates whose address set does not fit in memory.
//!
//! `last_height` is overwritten by every contribution, not maximized, so it
//! reflects whichever output was processed last for that address.

use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::address::Address;
use crate::error::{ChainstateError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceEntry {
    pub address: String,
    /// Satoshis.
    pub amount: u64,
    pub last_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" | "ASCENDING" => Ok(SortOrder::Ascending),
            "DESC" | "DESCENDING" => Ok(SortOrder::Descending),
            _ => Err(format!("sort can be only \"ASC\" or \"DESC\", got {:?}", s)),
        }
    }
}

/// How [`BalanceAggregator::drain`] hands rows out.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainOptions {
    /// `None` leaves the backend's natural order. Ties are broken by address.
    pub order: Option<SortOrder>,
    /// Drop rows whose cumulative amount is exactly zero.
    pub skip_zero: bool,
}

/// Receives drained rows, e.g. the CSV writer.
pub trait BalanceSink {
    fn write_entry(&mut self, entry: &BalanceEntry) -> Result<()>;
}

impl BalanceSink for Vec<BalanceEntry> {
    fn write_entry(&mut self, entry: &BalanceEntry) -> Result<()> {
        self.push(entry.clone());
        Ok(())
    }
}

pub trait BalanceAggregator {
    /// Add `amount` to `address` and set its height to `height`.
    ///
    /// A cumulative balance above [`MAX_BALANCE`] is an `Aggregation` error.
    fn contribute(&mut self, address: &Address, amount: u64, height: u32) -> Result<()>;

    /// Emit every row into `sink` and finish the run. Returns the number of rows written.
    ///
    /// The aggregator is empty (in-memory) or committed (SQLite) afterwards.
    fn drain(&mut self, opts: DrainOptions, sink: &mut dyn BalanceSink) -> Result<usize>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}

/// Largest cumulative balance either backend accepts; SQLite integers are signed 64-bit.
pub const MAX_BALANCE: u64 = i64::MAX as u64;

fn balance_overflow(address: &Address, amount: u64) -> ChainstateError {
    ChainstateError::Aggregation(format!(
        "balance of {} overflows adding {} satoshi",
        address, amount
    ))
}

/// `current + amount`, failing past [`MAX_BALANCE`] instead of clamping.
fn add_balance(address: &Address, current: u64, amount: u64) -> Result<u64> {
    current
        .checked_add(amount)
        .filter(|&sum| sum <= MAX_BALANCE)
        .ok_or_else(|| balance_overflow(address, amount))
}

/// `HashMap` keyed by address.
#[derive(Debug, Default)]
pub struct InMemoryAggregator {
    balances: HashMap<Address, (u64, u32)>,
}

impl InMemoryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

impl BalanceAggregator for InMemoryAggregator {
    fn contribute(&mut self, address: &Address, amount: u64, height: u32) -> Result<()> {
        match self.balances.get_mut(address) {
            Some(entry) => {
                entry.0 = add_balance(address, entry.0, amount)?;
                entry.1 = height;
            }
            None => {
                let amount = add_balance(address, 0, amount)?;
                self.balances.insert(address.clone(), (amount, height));
            }
        }
        Ok(())
    }

    fn drain(&mut self, opts: DrainOptions, sink: &mut dyn BalanceSink) -> Result<usize> {
        let mut rows: Vec<BalanceEntry> = std::mem::take(&mut self.balances)
            .into_iter()
            .filter(|(_, (amount, _))| !(opts.skip_zero && *amount == 0))
            .map(|(address, (amount, last_height))| BalanceEntry {
                address: address.to_string(),
                amount,
                last_height,
            })
            .collect();

        match opts.order {
            Some(SortOrder::Ascending) => {
                rows.sort_by(|a, b| a.amount.cmp(&b.amount).then_with(|| a.address.cmp(&b.address)))
            }
            Some(SortOrder::Descending) => {
                rows.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.address.cmp(&b.address)))
            }
            None => {}
        }

        for row in &rows {
            sink.write_entry(row)?;
        }
        Ok(rows.len())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

const CREATE_TABLE: &str = "
    DROP TABLE IF EXISTS balance;
    CREATE TABLE balance (
        address TEXT PRIMARY KEY,
        amount BIGINT NOT NULL,
        height BIGINT NOT NULL
    );
";
const INSERT_IF_ABSENT: &str = "INSERT OR IGNORE INTO balance (address, amount, height) VALUES (?1, 0, 0)";
// ?4 is MAX_BALANCE - ?1: no row updated means the sum would pass MAX_BALANCE
const ADD_CONTRIBUTION: &str =
    "UPDATE balance SET amount = amount + ?1, height = ?2 WHERE address = ?3 AND amount <= ?4";

/// SQLite-backed aggregation.
///
/// The table is recreated on open and all contributions run inside one
/// transaction, committed by [`BalanceAggregator::drain`]. Without a persist
/// path the database lives in a temporary file that is removed on drop.
pub struct SqliteAggregator {
    conn: Connection,
    path: PathBuf,
    _temp: Option<NamedTempFile>,
    in_transaction: bool,
}

impl SqliteAggregator {
    pub fn open(persist: Option<&Path>) -> Result<Self> {
        let (path, temp) = match persist {
            Some(p) => (p.to_path_buf(), None),
            None => {
                let temp = NamedTempFile::new()?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        let conn = Connection::open(&path)?;
        conn.execute_batch(CREATE_TABLE)?;
        conn.execute_batch("BEGIN TRANSACTION")?;

        info!(path = %path.display(), persistent = persist.is_some(), "SQLite aggregation table created");

        Ok(Self { conn, path, _temp: temp, in_transaction: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn select_sql(opts: DrainOptions) -> String {
        let mut sql = String::from("SELECT address, amount, height FROM balance");
        if opts.skip_zero {
            sql.push_str(" WHERE amount != 0");
        }
        match opts.order {
            Some(SortOrder::Ascending) => sql.push_str(" ORDER BY amount ASC, address ASC"),
            Some(SortOrder::Descending) => sql.push_str(" ORDER BY amount DESC, address ASC"),
            None => {}
        }
        sql
    }
}


impl BalanceAggregator for SqliteAggregator {
    fn contribute(&mut self, address: &Address, amount: u64, height: u32) -> Result<()> {
        if !self.in_transaction {
            return Err(ChainstateError::Aggregation("contribution after drain".to_string()));
        }
        // same bound as the in-memory sum, checked here for the amount itself
        let amount = add_balance(address, 0, amount)? as i64;
        let addr = address.as_str();
        self.conn.prepare_cached(INSERT_IF_ABSENT)?.execute(params![addr])?;
        let updated = self
            .conn
            .prepare_cached(ADD_CONTRIBUTION)?
            .execute(params![amount, height, addr, i64::MAX - amount])?;
        if updated != 1 {
            return Err(balance_overflow(address, amount as u64));
        }
        Ok(())
    }

    fn drain(&mut self, opts: DrainOptions, sink: &mut dyn BalanceSink) -> Result<usize> {
        let sql = Self::select_sql(opts);
        debug!(%sql, "draining SQLite balances");

        let mut written = 0usize;
        {
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let amount: i64 = row.get(1)?;
                let height: i64 = row.get(2)?;
                let entry = BalanceEntry {
                    address: row.get(0)?,
                    amount: u64::try_from(amount)
                        .map_err(|_| ChainstateError::Aggregation(format!("negative amount {}", amount)))?,
                    last_height: u32::try_from(height)
                        .map_err(|_| ChainstateError::Aggregation(format!("height {} out of range", height)))?,
                };
                sink.write_entry(&entry)?;
                written += 1;
            }
        }

        if self.in_transaction {
            self.conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(written)
    }

    fn backend_type(&self) -> &'static str {
        "sqlite"
    }
}
