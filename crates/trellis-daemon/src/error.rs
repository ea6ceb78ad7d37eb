use std::path::PathBuf;

use trellis_collector::CollectorError;
use trellis_db::DbError;
use trellis_sync::SyncError;
use trellis_tree::TreeError;
use trellis_types::TypeError;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("configuration error in {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    #[error("invalid device id: {0}")]
    DeviceId(#[from] TypeError),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("collector error: {0}")]
    Collector(#[from] CollectorError),

    #[error("daemon already started")]
    AlreadyStarted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DaemonResult<T> = Result<T, DaemonError>;
