//! Resolution of true conflicts between remote and local state.

use trellis_tree::OA;
use trellis_types::{ObjectType, SIndex, OID, SOID};

use crate::change::MetaChange;
use crate::remote_link::RemoteLink;

/// What to do with a buffered change whose object has pending local
/// changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingResolution {
    /// Keep the local position; the pending change will win at the
    /// authority once acknowledged.
    KeepLocal,
    /// Discard the pending local changes and apply the remote position.
    TakeRemote,
}

/// What to do when the remote position of an object is held locally by a
/// different object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameResolution {
    /// Rename the occupant out of the way.
    RenameOccupant,
    /// Place the incoming object under a conflict name.
    RenameIncoming,
    /// Merge the occupant into the incoming object. Both must be
    /// directories.
    Alias,
}

/// A remote position occupied by another local object.
#[derive(Clone, Debug)]
pub struct NameConflict {
    pub sidx: SIndex,
    pub parent: OID,
    pub name: String,
    pub occupant: OA,
    /// The authority has placed the occupant at some point.
    pub occupant_is_remote: bool,
    pub incoming: OID,
    pub incoming_type: ObjectType,
}

/// Pluggable conflict policy.
pub trait ConflictPolicy: Send + Sync {
    fn on_pending_local(&self, soid: SOID, local: &MetaChange, remote: &RemoteLink) -> PendingResolution;

    fn on_name_conflict(&self, conflict: &NameConflict) -> NameResolution;
}

/// Local changes win until the authority orders them; local-only
/// directories merge into incoming ones of the same name; otherwise the
/// object the authority does not know yet is renamed.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConflictPolicy;

impl ConflictPolicy for DefaultConflictPolicy {
    fn on_pending_local(&self, _soid: SOID, _local: &MetaChange, _remote: &RemoteLink) -> PendingResolution {
        PendingResolution::KeepLocal
    }

    fn on_name_conflict(&self, conflict: &NameConflict) -> NameResolution {
        if conflict.occupant_is_remote {
            NameResolution::RenameIncoming
        } else if conflict.occupant.is_dir() && conflict.incoming_type.is_dir() {
            NameResolution::Alias
        } else {
            NameResolution::RenameOccupant
        }
    }
}

/// Name given to the loser of a name conflict.
pub fn conflict_name(name: &str, oid: OID) -> String {
    format!("{name} (conflict {})", oid.short_hex())
}
