//! Error types for the collector crate.

use trellis_db::DbError;
use trellis_tree::TreeError;

/// Errors that can occur while collecting.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// Tree or version lookup failed.
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("database error: {0}")]
    Db(#[from] DbError),
}

/// Convenience alias for collector results.
pub type CollectorResult<T> = Result<T, CollectorError>;
