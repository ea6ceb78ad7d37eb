//! Transactional table store for Trellis.
//!
//! Every persistent entity in Trellis (object attributes, ticks, meta
//! changes, remote links, buffered changes, queue cursors) lives in a named
//! table of ordered byte keys. All mutations happen inside a [`Trans`]:
//!
//! - writes are applied to the live tables immediately, so code running on
//!   the core sees its own uncommitted writes;
//! - [`Trans::commit`] appends the transaction's redo log to the
//!   [`Journal`] as one framed record, then runs commit listeners;
//! - dropping an uncommitted [`Trans`] rolls every write back and runs
//!   abort listeners.
//!
//! On [`Database::open`] the journal is replayed; a torn tail left by a
//! crash mid-commit is discarded, so a transaction is either fully present
//! or fully absent after restart.
//!
//! Only one transaction may be open at a time. Transactions must never be
//! held across a suspension point that releases the core.

pub mod codec;
pub mod database;
pub mod error;
pub mod journal;
pub mod key;
pub mod trans;

pub use database::Database;
pub use error::{DbError, DbResult};
pub use journal::{Journal, JournalConfig, JournalOp, JournalRecord, SyncMode};
pub use key::Key;
pub use trans::{Trans, TransListener};
