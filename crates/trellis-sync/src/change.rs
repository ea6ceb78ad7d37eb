use serde::{Deserialize, Serialize};
use trellis_types::{Lts, ObjectType, SIndex, OID, SOID};

/// A local tree mutation that the authority has not acknowledged yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaChange {
    pub sidx: SIndex,
    /// Strictly increasing per store.
    pub seq: u64,
    pub oid: OID,
    /// [`OID::TRASH`] for a deletion.
    pub new_parent: OID,
    pub new_name: String,
}

impl MetaChange {
    pub fn soid(&self) -> SOID {
        SOID::new(self.sidx, self.oid)
    }

    pub fn is_delete(&self) -> bool {
        self.new_parent.is_trash()
    }
}

/// Operation carried by a change echoed from the authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteOp {
    Insert {
        parent: OID,
        name: String,
        otype: ObjectType,
        /// Set when the object arrives from another store.
        migrant: Option<SOID>,
    },
    /// Move or rename. A move within the same parent is a rename.
    Move { parent: OID, name: String },
    /// `parent` is where the object was removed from.
    Remove { parent: OID },
}

impl RemoteOp {
    /// Position the authority asserts, or `None` for a removal.
    pub fn target(&self) -> Option<(OID, &str)> {
        match self {
            Self::Insert { parent, name, .. } | Self::Move { parent, name } => {
                Some((*parent, name.as_str()))
            }
            Self::Remove { .. } => None,
        }
    }
}

/// One entry of a store's change log as ordered by the authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub sidx: SIndex,
    pub lts: Lts,
    pub oid: OID,
    pub op: RemoteOp,
}

impl RemoteChange {
    pub fn soid(&self) -> SOID {
        SOID::new(self.sidx, self.oid)
    }
}

/// A change as sent to the authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmittedChange {
    Insert {
        oid: OID,
        parent: OID,
        name: String,
        otype: ObjectType,
    },
    Move {
        oid: OID,
        parent: OID,
        name: String,
    },
    Remove {
        oid: OID,
    },
}

impl SubmittedChange {
    pub fn oid(&self) -> OID {
        match self {
            Self::Insert { oid, .. } | Self::Move { oid, .. } | Self::Remove { oid } => *oid,
        }
    }
}

/// The authority's answer to an accepted submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub lts: Lts,
}
