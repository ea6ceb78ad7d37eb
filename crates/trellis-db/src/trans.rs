use serde::Serialize;
use tracing::warn;

use crate::codec;
use crate::database::Database;
use crate::error::DbResult;
use crate::journal::{JournalOp, JournalRecord};

/// Callbacks fired when a transaction finishes.
///
/// Listeners run after the outcome is final: `committed` after the journal
/// record is durable, in registration order; `aborted` after every write has
/// been rolled back, in reverse registration order. The
/// transaction scope is already closed when they run, so a listener may
/// begin a new one.
pub trait TransListener: Send {
    fn committed(&mut self) {}
    fn aborted(&mut self) {}
}

struct OnCommit<F: FnOnce() + Send>(Option<F>);

impl<F: FnOnce() + Send> TransListener for OnCommit<F> {
    fn committed(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

struct UndoEntry {
    table: String,
    key: Vec<u8>,
    previous: Option<Vec<u8>>,
}

/// An open transaction scope.
///
/// Writes take effect on the live tables immediately and are undone if the
/// scope ends without [`Trans::commit`]. Dropping the scope is the `end()`
/// of the begin/commit/end discipline: it always runs, on success or
/// failure.
pub struct Trans<'a> {
    db: &'a Database,
    id: u64,
    undo: Vec<UndoEntry>,
    redo: Vec<JournalOp>,
    listeners: Vec<Box<dyn TransListener>>,
    finished: bool,
}

impl<'a> Trans<'a> {
    pub(crate) fn new(db: &'a Database, id: u64) -> Self {
        Self {
            db,
            id,
            undo: Vec::new(),
            redo: Vec::new(),
            listeners: Vec::new(),
            finished: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The database this scope writes to.
    pub fn db(&self) -> &'a Database {
        self.db
    }

    pub fn put(&mut self, table: &str, key: Vec<u8>, value: Vec<u8>) {
        let previous = self.db.raw_put(table, key.clone(), value.clone());
        self.undo.push(UndoEntry {
            table: table.to_string(),
            key: key.clone(),
            previous,
        });
        self.redo.push(JournalOp::Put {
            table: table.to_string(),
            key,
            value,
        });
    }

    /// Encode and write a row.
    pub fn put_value<T: Serialize>(&mut self, table: &str, key: Vec<u8>, value: &T) -> DbResult<()> {
        let bytes = codec::encode(value)?;
        self.put(table, key, bytes);
        Ok(())
    }

    /// Delete a row. Returns `true` if it existed.
    pub fn delete(&mut self, table: &str, key: &[u8]) -> bool {
        let previous = self.db.raw_delete(table, key);
        let existed = previous.is_some();
        if existed {
            self.undo.push(UndoEntry {
                table: table.to_string(),
                key: key.to_vec(),
                previous,
            });
            self.redo.push(JournalOp::Delete {
                table: table.to_string(),
                key: key.to_vec(),
            });
        }
        existed
    }

    /// Delete every row under `prefix`. Returns the number removed.
    pub fn delete_prefix(&mut self, table: &str, prefix: &[u8]) -> usize {
        let keys: Vec<Vec<u8>> = self
            .db
            .scan_prefix(table, prefix)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        for key in &keys {
            self.delete(table, key);
        }
        keys.len()
    }

    pub fn add_listener(&mut self, listener: Box<dyn TransListener>) {
        self.listeners.push(listener);
    }

    /// Run `f` once the transaction has committed.
    pub fn on_commit(&mut self, f: impl FnOnce() + Send + 'static) {
        self.listeners.push(Box::new(OnCommit(Some(f))));
    }

    /// Commit the transaction.
    ///
    /// If the journal append fails, the writes are rolled back, abort
    /// listeners run, and the error is returned.
    pub fn commit(mut self) -> DbResult<()> {
        let record = JournalRecord {
            txn: self.id,
            ops: std::mem::take(&mut self.redo),
        };
        if let Err(e) = self.db.journal_commit(&record) {
            warn!(txn = self.id, error = %e, "commit failed; rolling back");
            self.rollback();
            return Err(e);
        }

        self.finished = true;
        self.undo.clear();
        self.db.close_txn(self.id);
        for mut listener in std::mem::take(&mut self.listeners) {
            listener.committed();
        }
        Ok(())
    }

    /// Abort explicitly. Equivalent to dropping the scope.
    pub fn abort(self) {}

    fn rollback(&mut self) {
        for entry in self.undo.drain(..).rev() {
            match entry.previous {
                Some(value) => {
                    self.db.raw_put(&entry.table, entry.key, value);
                }
                None => {
                    self.db.raw_delete(&entry.table, &entry.key);
                }
            }
        }
        self.redo.clear();
        self.finished = true;
        self.db.close_txn(self.id);
        for mut listener in std::mem::take(&mut self.listeners).into_iter().rev() {
            listener.aborted();
        }
    }
}

impl Drop for Trans<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback();
        }
    }
}
