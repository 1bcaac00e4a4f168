use rusty_leveldb::{DBIterator, LdbIterator, Options, DB};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ChainstateError, Result};

/// Ordered key/value source for chainstate records.
///
/// Iteration is forward-only and single-pass; restarting means calling
/// [`ChainstateStore::prefix_iter`] again.
pub trait ChainstateStore {
    /// Point lookup of one key.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, in key order.
    fn prefix_iter<'a>(
        &'a mut self,
        prefix: u8,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>>;
}

/// Chainstate LevelDB opened read-only in spirit: the node must be stopped
/// (or the directory copied) before opening it.
pub struct LevelDbChainstate {
    db: DB,
}

impl LevelDbChainstate {
    pub fn open(chainstate_path: &Path) -> Result<Self> {
        if !chainstate_path.exists() {
            return Err(ChainstateError::Store(format!(
                "chainstate path does not exist: {}",
                chainstate_path.display()
            )));
        }
        let mut opts = Options::default();
        opts.create_if_missing = false;
        let db = DB::open(chainstate_path, opts)
            .map_err(|e| ChainstateError::Store(format!("open {}: {}", chainstate_path.display(), e)))?;
        Ok(Self { db })
    }
}

impl ChainstateStore for LevelDbChainstate {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key).map(|v| v.to_vec()))
    }

    fn prefix_iter<'a>(
        &'a mut self,
        prefix: u8,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>> {
        let mut iter = self
            .db
            .new_iter()
            .map_err(|e| ChainstateError::Store(format!("iterator: {}", e)))?;
        iter.seek(&[prefix]);
        Ok(Box::new(LevelDbPrefixIter { iter, prefix, positioned: true, done: false }))
    }
}

/// Starts at the first key `>= prefix` and stops at the first key past it.
///
/// `seek` leaves the iterator on its first entry, which `LdbIterator::next`
/// would skip, so that entry is read with `current` instead.
struct LevelDbPrefixIter {
    iter: DBIterator,
    prefix: u8,
    positioned: bool,
    done: bool,
}

impl LevelDbPrefixIter {
    fn step(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        if std::mem::take(&mut self.positioned) {
            let (mut key, mut value) = (Vec::new(), Vec::new());
            return if self.iter.valid() && self.iter.current(&mut key, &mut value) {
                Some((key, value))
            } else {
                None
            };
        }
        LdbIterator::next(&mut self.iter)
    }
}

impl Iterator for LevelDbPrefixIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Some((key, value)) if key.first() == Some(&self.prefix) => Some((key, value)),
            _ => {
                self.done = true;
                None
            }
        }
    }
}

/// In-memory store with the same ordering semantics as LevelDB.
/// Used for fixtures and for decoding dumps that were exported elsewhere.
#[derive(Debug, Default, Clone)]
pub struct MemoryChainstate {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryChainstate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ChainstateStore for MemoryChainstate {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn prefix_iter<'a>(
        &'a mut self,
        prefix: u8,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>> {
        Ok(Box::new(
            self.entries
                .range(vec![prefix]..)
                .take_while(move |(k, _)| k.first() == Some(&prefix))
                .map(|(k, v)| (k.clone(), v.clone())),
        ))
    }
}
