use trellis_db::DbError;

/// Errors from queue processing.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// Worth retrying: the same work may succeed later.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot change the outcome.
    #[error("fatal failure: {0}")]
    Fatal(String),

    /// An item could not be completed yet and stays queued.
    #[error("item deferred")]
    Deferred,

    #[error("token pool for {0} is closed")]
    TokensClosed(String),
}

impl QueueError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::TokensClosed(_))
    }
}

/// Result alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
