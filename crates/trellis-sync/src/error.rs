use trellis_db::DbError;
use trellis_queue::QueueError;
use trellis_tree::TreeError;
use trellis_types::SIndex;

/// Errors from metadata synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// The authority could not be reached or the exchange failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The authority refused a change. Resubmitting it cannot succeed.
    #[error("change rejected: {0}")]
    Rejected(String),

    /// The authority already holds the change, from an earlier submission
    /// whose receipt was lost. It counts as delivered.
    #[error("change already applied: {0}")]
    AlreadyApplied(String),

    #[error("store {0} not found")]
    StoreNotFound(SIndex),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Db(_) => true,
            Self::Tree(e) => !e.is_integrity_violation(),
            Self::Queue(e) => !e.is_fatal(),
            Self::Rejected(_) | Self::AlreadyApplied(_) | Self::StoreNotFound(_) => false,
        }
    }
}

impl From<SyncError> for QueueError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Queue(e) => e,
            SyncError::Db(e) | SyncError::Tree(TreeError::Db(e)) => QueueError::Db(e),
            e if e.is_transient() => QueueError::Transient(e.to_string()),
            e => QueueError::Fatal(e.to_string()),
        }
    }
}

/// Result alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
