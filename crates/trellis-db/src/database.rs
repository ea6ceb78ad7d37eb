use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::codec;
use crate::error::{DbError, DbResult};
use crate::journal::{Journal, JournalConfig, JournalOp, JournalRecord};
use crate::trans::Trans;

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// Transactional table store.
///
/// Tables are created on first write. Reads never fail on missing tables;
/// they simply return nothing.
pub struct Database {
    tables: RwLock<HashMap<String, Table>>,
    journal: Option<Journal>,
    /// Id of the open transaction, if any.
    open_txn: Mutex<Option<u64>>,
    next_txn: AtomicU64,
}

impl Database {
    /// A database without a journal. Nothing survives a restart.
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            journal: None,
            open_txn: Mutex::new(None),
            next_txn: AtomicU64::new(1),
        }
    }

    /// Open a journaled database, replaying every committed transaction.
    pub fn open(path: &Path, config: JournalConfig) -> DbResult<Self> {
        let (journal, records) = Journal::open(path, config)?;

        let mut tables: HashMap<String, Table> = HashMap::new();
        let mut last_txn = 0;
        for record in &records {
            last_txn = last_txn.max(record.txn);
            for op in &record.ops {
                match op {
                    JournalOp::Put { table, key, value } => {
                        tables
                            .entry(table.clone())
                            .or_default()
                            .insert(key.clone(), value.clone());
                    }
                    JournalOp::Delete { table, key } => {
                        if let Some(t) = tables.get_mut(table) {
                            t.remove(key);
                        }
                    }
                }
            }
        }

        info!(
            path = %path.display(),
            transactions = records.len(),
            "database recovered"
        );

        Ok(Self {
            tables: RwLock::new(tables),
            journal: Some(journal),
            open_txn: Mutex::new(None),
            next_txn: AtomicU64::new(last_txn + 1),
        })
    }

    /// Begin the transaction scope.
    ///
    /// Fails with [`DbError::TransactionInProgress`] if another transaction
    /// is still open.
    pub fn begin(&self) -> DbResult<Trans<'_>> {
        let mut open = self.open_txn.lock().expect("lock poisoned");
        if let Some(id) = *open {
            return Err(DbError::TransactionInProgress(id));
        }
        let id = self.next_txn.fetch_add(1, Ordering::SeqCst);
        *open = Some(id);
        Ok(Trans::new(self, id))
    }

    /// Returns `true` while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.open_txn.lock().expect("lock poisoned").is_some()
    }

    /// Rewrite the journal as a single snapshot of the current tables.
    pub fn compact(&self) -> DbResult<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        if let Some(id) = *self.open_txn.lock().expect("lock poisoned") {
            return Err(DbError::TransactionInProgress(id));
        }

        let tables = self.tables.read().expect("lock poisoned");
        let mut ops = Vec::new();
        for (table, rows) in tables.iter() {
            for (key, value) in rows {
                ops.push(JournalOp::Put {
                    table: table.clone(),
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        let txn = self.next_txn.fetch_add(1, Ordering::SeqCst);
        journal.rewrite(&JournalRecord { txn, ops })?;
        info!(rows = tables.values().map(BTreeMap::len).sum::<usize>(), "database compacted");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    pub fn get(&self, table: &str, key: &[u8]) -> Option<Vec<u8>> {
        let tables = self.tables.read().expect("lock poisoned");
        tables.get(table).and_then(|t| t.get(key).cloned())
    }

    /// Read and decode a single row.
    pub fn get_value<T: DeserializeOwned>(&self, table: &str, key: &[u8]) -> DbResult<Option<T>> {
        self.get(table, key)
            .map(|bytes| codec::decode(table, &bytes))
            .transpose()
    }

    pub fn contains(&self, table: &str, key: &[u8]) -> bool {
        let tables = self.tables.read().expect("lock poisoned");
        tables.get(table).is_some_and(|t| t.contains_key(key))
    }

    /// All rows whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, table: &str, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.scan_from(table, prefix, prefix, usize::MAX)
    }

    /// Up to `limit` rows whose key starts with `prefix` and is `>= start`,
    /// in key order.
    pub fn scan_from(
        &self,
        table: &str,
        prefix: &[u8],
        start: &[u8],
        limit: usize,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let tables = self.tables.read().expect("lock poisoned");
        let Some(rows) = tables.get(table) else {
            return Vec::new();
        };
        let lower = if start < prefix { prefix } else { start };
        rows.range::<[u8], _>((Bound::Included(lower), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Decoded values of every row under `prefix`, in key order.
    pub fn scan_values<T: DeserializeOwned>(&self, table: &str, prefix: &[u8]) -> DbResult<Vec<T>> {
        self.scan_prefix(table, prefix)
            .into_iter()
            .map(|(_, v)| codec::decode(table, &v))
            .collect()
    }

    /// Decoded value of the first row under `prefix` that is `>= start`.
    pub fn first_value_from<T: DeserializeOwned>(
        &self,
        table: &str,
        prefix: &[u8],
        start: &[u8],
    ) -> DbResult<Option<T>> {
        self.scan_from(table, prefix, start, 1)
            .into_iter()
            .next()
            .map(|(_, v)| codec::decode(table, &v))
            .transpose()
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        let tables = self.tables.read().expect("lock poisoned");
        tables.get(table).map_or(0, BTreeMap::len)
    }

    // ---------------------------------------------------------------
    // Raw writes, only reachable through `Trans`
    // ---------------------------------------------------------------

    pub(crate) fn raw_put(&self, table: &str, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        let mut tables = self.tables.write().expect("lock poisoned");
        tables.entry(table.to_string()).or_default().insert(key, value)
    }

    pub(crate) fn raw_delete(&self, table: &str, key: &[u8]) -> Option<Vec<u8>> {
        let mut tables = self.tables.write().expect("lock poisoned");
        tables.get_mut(table).and_then(|t| t.remove(key))
    }

    pub(crate) fn journal_commit(&self, record: &JournalRecord) -> DbResult<()> {
        if let Some(journal) = &self.journal {
            if !record.ops.is_empty() {
                journal.append(record)?;
            }
        }
        Ok(())
    }

    pub(crate) fn close_txn(&self, id: u64) {
        let mut open = self.open_txn.lock().expect("lock poisoned");
        if *open == Some(id) {
            *open = None;
        }
        debug!(txn = id, "transaction closed");
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read().expect("lock poisoned");
        f.debug_struct("Database")
            .field("tables", &tables.len())
            .field("journaled", &self.journal.is_some())
            .finish()
    }
}
