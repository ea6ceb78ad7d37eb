use trellis_db::DbError;
use trellis_types::{OID, SIndex, SOID};

/// Errors from the object tree and version tracker.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The object does not exist.
    #[error("object not found: {0}")]
    NotFound(SOID),

    /// The target parent does not exist.
    #[error("parent {parent:?} of {sidx} not found")]
    ParentNotFound { sidx: SIndex, parent: OID },

    /// `(parent, name)` is already held by a different object.
    #[error("name conflict under {parent:?} in {sidx}: {name:?} is held by {occupant:?}")]
    NameConflict {
        sidx: SIndex,
        parent: OID,
        name: String,
        occupant: OID,
    },

    /// The new parent is the object itself or one of its descendants.
    #[error("moving {soid} under {parent:?} would create a cycle")]
    CycleDetected { soid: SOID, parent: OID },

    /// The parent cannot hold children.
    #[error("{0} is not a directory")]
    NotADirectory(SOID),

    /// Content attributes were requested for a non-file object.
    #[error("{0} is not a file")]
    NotAFile(SOID),

    /// The directory still has live children.
    #[error("directory {0} is not empty")]
    NotEmpty(SOID),

    /// The object is deleted and has no path.
    #[error("{0} is deleted")]
    Deleted(SOID),

    /// Root and trash cannot be moved, renamed, or deleted.
    #[error("{0} cannot be modified")]
    Immutable(SOID),

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("store {0} already exists")]
    StoreExists(SIndex),

    #[error("store {0} not found")]
    StoreNotFound(SIndex),

    /// Failure reported by the physical storage collaborator.
    #[error("physical storage: {0}")]
    Physical(String),

    #[error("database error: {0}")]
    Db(#[from] DbError),
}

impl TreeError {
    /// Integrity violations are deterministic: retrying the same call cannot
    /// succeed.
    pub fn is_integrity_violation(&self) -> bool {
        !matches!(self, Self::Db(_) | Self::Physical(_))
    }
}

/// Result alias for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;
