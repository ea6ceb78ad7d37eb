use std::io;

/// Errors from the transactional table store.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// I/O error from the journal file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// `begin` was called while another transaction is still open.
    #[error("transaction {0} is still in progress")]
    TransactionInProgress(u64),

    /// A stored value could not be decoded into the expected shape.
    #[error("corrupt row in table {table}: {reason}")]
    CorruptRow { table: String, reason: String },
}

/// Result alias for table store operations.
pub type DbResult<T> = Result<T, DbError>;
