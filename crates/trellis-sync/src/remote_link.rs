use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use trellis_db::{Database, DbResult, Key, Trans};
use trellis_tree::StoreDeletionOperator;
use trellis_types::{Lts, ObjectType, SIndex, OID, SOID};

use crate::change::{RemoteChange, RemoteOp};
use crate::error::SyncResult;

pub const REMOTE_LINK_TABLE: &str = "remote_links";

fn link_key(sidx: SIndex, oid: OID) -> Vec<u8> {
    Key::new().u32(sidx.get()).bytes(oid.as_bytes()).build()
}

/// Last position of an object asserted by the authority, whether or not it
/// has been applied locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLink {
    pub sidx: SIndex,
    pub oid: OID,
    /// [`OID::TRASH`] once removed.
    pub parent: OID,
    pub name: String,
    pub otype: ObjectType,
    /// `lts` of the change that established this position.
    pub remote_version: Lts,
}

impl RemoteLink {
    pub fn soid(&self) -> SOID {
        SOID::new(self.sidx, self.oid)
    }

    pub fn is_removed(&self) -> bool {
        self.parent.is_trash()
    }

    /// The link asserted by an echoed change.
    ///
    /// Only inserts carry a type. Other changes keep the type of the previous
    /// link, then of the local object, and fall back to a file.
    pub fn from_echo(
        change: &RemoteChange,
        previous: Option<&RemoteLink>,
        local_type: Option<ObjectType>,
    ) -> Self {
        let otype = match &change.op {
            RemoteOp::Insert { otype, .. } => *otype,
            _ => previous
                .map(|l| l.otype)
                .or(local_type)
                .unwrap_or(ObjectType::File),
        };
        let (parent, name) = match change.op.target() {
            Some((parent, name)) => (parent, name.to_string()),
            None => (OID::TRASH, change.oid.to_hex()),
        };
        Self {
            sidx: change.sidx,
            oid: change.oid,
            parent,
            name,
            otype,
            remote_version: change.lts,
        }
    }
}

pub struct RemoteLinks {
    db: Arc<Database>,
}

impl RemoteLinks {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, sidx: SIndex, oid: OID) -> SyncResult<Option<RemoteLink>> {
        Ok(self.db.get_value(REMOTE_LINK_TABLE, &link_key(sidx, oid))?)
    }

    pub fn set(&self, link: &RemoteLink, t: &mut Trans<'_>) -> SyncResult<()> {
        t.put_value(REMOTE_LINK_TABLE, link_key(link.sidx, link.oid), link)?;
        Ok(())
    }

    pub fn delete(&self, sidx: SIndex, oid: OID, t: &mut Trans<'_>) -> bool {
        t.delete(REMOTE_LINK_TABLE, &link_key(sidx, oid))
    }
}

impl StoreDeletionOperator for RemoteLinks {
    fn delete_store(&self, sidx: SIndex, t: &mut Trans<'_>) -> DbResult<()> {
        let rows = t.delete_prefix(REMOTE_LINK_TABLE, &Key::new().u32(sidx.get()).build());
        debug!(sidx = %sidx, rows, "remote links purged");
        Ok(())
    }
}
