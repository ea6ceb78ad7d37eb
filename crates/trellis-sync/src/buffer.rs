//! Remote change buffer.
//!
//! The authority streams a complete ordered log rather than a minimal diff.
//! Applying every entry as it arrives can alias a local object to a name
//! that is about to be superseded, or rename something based on an
//! intermediate state. Entries therefore wait here until the caller's merge
//! boundary passes them, and are then applied against the final position
//! recorded in the object's RemoteLink.
//!
//! Two tables back the buffer:
//!
//! - `remote_buffer` -- `(sidx, oid) -> BufferedChange`
//! - `remote_buffer_order` -- `(sidx, boundary, oid) -> ()`, release order

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use trellis_db::{Database, DbResult, Key, Trans};
use trellis_tree::StoreDeletionOperator;
use trellis_types::{Lts, ObjectType, SIndex, OID, SOID};

use crate::error::SyncResult;

pub const BUFFER_TABLE: &str = "remote_buffer";
pub const BUFFER_ORDER_TABLE: &str = "remote_buffer_order";

fn store_prefix(sidx: SIndex) -> Vec<u8> {
    Key::new().u32(sidx.get()).build()
}

fn entry_key(sidx: SIndex, oid: OID) -> Vec<u8> {
    Key::new().u32(sidx.get()).bytes(oid.as_bytes()).build()
}

fn order_key(sidx: SIndex, boundary: Lts, oid: OID) -> Vec<u8> {
    Key::new()
        .u32(sidx.get())
        .u64(boundary.get())
        .bytes(oid.as_bytes())
        .build()
}

/// A remote change waiting to be applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedChange {
    pub sidx: SIndex,
    pub oid: OID,
    pub otype: ObjectType,
    /// Source object when this entry migrates an object across stores.
    pub migrant: Option<SOID>,
    pub boundary: Lts,
}

impl BufferedChange {
    pub fn soid(&self) -> SOID {
        SOID::new(self.sidx, self.oid)
    }
}

pub struct RemoteChangeBuffer {
    db: Arc<Database>,
}

impl RemoteChangeBuffer {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Buffer a change, replacing any earlier entry for the same object.
    pub fn insert(
        &self,
        sidx: SIndex,
        oid: OID,
        otype: ObjectType,
        migrant: Option<SOID>,
        boundary: Lts,
        t: &mut Trans<'_>,
    ) -> SyncResult<BufferedChange> {
        let previous = self.get(sidx, oid)?;
        if let Some(prev) = &previous {
            t.delete(BUFFER_ORDER_TABLE, &order_key(sidx, prev.boundary, oid));
        }
        let entry = BufferedChange {
            sidx,
            oid,
            otype,
            // A later move does not cancel a pending migration.
            migrant: migrant.or(previous.and_then(|p| p.migrant)),
            boundary,
        };
        t.put_value(BUFFER_TABLE, entry_key(sidx, oid), &entry)?;
        t.put_value(BUFFER_ORDER_TABLE, order_key(sidx, boundary, oid), &())?;
        debug!(sidx = %sidx, oid = ?oid, boundary = %boundary, "remote change buffered");
        Ok(entry)
    }

    /// The buffered entry with the lowest boundary, if that boundary is at
    /// most `until`.
    pub fn next_releasable(&self, sidx: SIndex, until: Lts) -> SyncResult<Option<BufferedChange>> {
        Ok(self.releasable_up_to(sidx, until, 1)?.into_iter().next())
    }

    /// Every entry with a boundary of at most `until`, in boundary order.
    pub fn releasable(&self, sidx: SIndex, until: Lts) -> SyncResult<Vec<BufferedChange>> {
        self.releasable_up_to(sidx, until, usize::MAX)
    }

    fn releasable_up_to(&self, sidx: SIndex, until: Lts, limit: usize) -> SyncResult<Vec<BufferedChange>> {
        let prefix = store_prefix(sidx);
        let mut out = Vec::new();
        for (key, _) in self.db.scan_from(BUFFER_ORDER_TABLE, &prefix, &prefix, limit) {
            let boundary = decode_u64(&key[4..12]);
            if boundary > until.get() {
                break;
            }
            let oid = decode_oid(&key[12..]);
            if let Some(entry) = self.get(sidx, oid)? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    pub fn get(&self, sidx: SIndex, oid: OID) -> SyncResult<Option<BufferedChange>> {
        Ok(self.db.get_value(BUFFER_TABLE, &entry_key(sidx, oid))?)
    }

    /// Remove an entry. Returns `true` if it was buffered.
    pub fn remove(&self, sidx: SIndex, oid: OID, t: &mut Trans<'_>) -> SyncResult<bool> {
        let Some(entry) = self.get(sidx, oid)? else {
            return Ok(false);
        };
        t.delete(BUFFER_ORDER_TABLE, &order_key(sidx, entry.boundary, oid));
        t.delete(BUFFER_TABLE, &entry_key(sidx, oid));
        Ok(true)
    }

    pub fn is_buffered(&self, soid: SOID) -> bool {
        self.db.contains(BUFFER_TABLE, &entry_key(soid.sidx, soid.oid))
    }

    pub fn len(&self, sidx: SIndex) -> usize {
        self.db.scan_prefix(BUFFER_TABLE, &store_prefix(sidx)).len()
    }

    pub fn is_empty(&self, sidx: SIndex) -> bool {
        self.len(sidx) == 0
    }
}

fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

fn decode_oid(bytes: &[u8]) -> OID {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[..16]);
    OID::from_bytes(buf)
}

impl StoreDeletionOperator for RemoteChangeBuffer {
    fn delete_store(&self, sidx: SIndex, t: &mut Trans<'_>) -> DbResult<()> {
        let prefix = store_prefix(sidx);
        let rows = t.delete_prefix(BUFFER_TABLE, &prefix);
        t.delete_prefix(BUFFER_ORDER_TABLE, &prefix);
        debug!(sidx = %sidx, rows, "remote buffer purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: SIndex = SIndex::new(1);

    fn buffer() -> RemoteChangeBuffer {
        RemoteChangeBuffer::new(Arc::new(Database::in_memory()))
    }

    fn insert(buf: &RemoteChangeBuffer, oid: OID, boundary: u64) {
        let mut t = buf.db.begin().unwrap();
        buf.insert(S, oid, ObjectType::File, None, Lts::new(boundary), &mut t)
            .unwrap();
        t.commit().unwrap();
    }

    #[test]
    fn release_in_boundary_order() {
        let buf = buffer();
        let (b1, b2, b3) = (OID::generate(), OID::generate(), OID::generate());
        insert(&buf, b3, 30);
        insert(&buf, b1, 10);
        insert(&buf, b2, 20);

        let released: Vec<OID> = buf
            .releasable(S, Lts::new(20))
            .unwrap()
            .into_iter()
            .map(|e| e.oid)
            .collect();
        assert_eq!(released, vec![b1, b2]);
        assert_eq!(buf.next_releasable(S, Lts::new(20)).unwrap().unwrap().oid, b1);
        assert_eq!(buf.next_releasable(S, Lts::new(9)).unwrap(), None);
    }

    #[test]
    fn reinsert_moves_the_boundary() {
        let buf = buffer();
        let (a, b) = (OID::generate(), OID::generate());
        insert(&buf, a, 10);
        insert(&buf, b, 11);
        insert(&buf, a, 12);

        assert_eq!(buf.next_releasable(S, Lts::new(11)).unwrap().unwrap().oid, b);
        assert_eq!(buf.releasable(S, Lts::new(12)).unwrap().len(), 2);
        assert_eq!(buf.len(S), 2);
    }

    #[test]
    fn migrant_survives_a_later_move() {
        let buf = buffer();
        let oid = OID::generate();
        let source = SOID::new(SIndex::new(2), oid);
        let mut t = buf.db.begin().unwrap();
        buf.insert(S, oid, ObjectType::Dir, Some(source), Lts::new(1), &mut t)
            .unwrap();
        let entry = buf
            .insert(S, oid, ObjectType::Dir, None, Lts::new(2), &mut t)
            .unwrap();
        t.commit().unwrap();
        assert_eq!(entry.migrant, Some(source));
    }

    #[test]
    fn remove_and_is_buffered() {
        let buf = buffer();
        let oid = OID::generate();
        insert(&buf, oid, 5);
        assert!(buf.is_buffered(SOID::new(S, oid)));

        let mut t = buf.db.begin().unwrap();
        assert!(buf.remove(S, oid, &mut t).unwrap());
        assert!(!buf.remove(S, oid, &mut t).unwrap());
        t.commit().unwrap();
        assert!(!buf.is_buffered(SOID::new(S, oid)));
        assert_eq!(buf.next_releasable(S, Lts::new(100)).unwrap(), None);
    }

    #[test]
    fn store_deletion_purges_only_that_store() {
        let buf = buffer();
        let oid = OID::generate();
        insert(&buf, oid, 5);
        let mut t = buf.db.begin().unwrap();
        buf.insert(SIndex::new(2), oid, ObjectType::File, None, Lts::new(5), &mut t)
            .unwrap();
        buf.delete_store(S, &mut t).unwrap();
        t.commit().unwrap();
        assert!(buf.is_empty(S));
        assert!(buf.is_buffered(SOID::new(SIndex::new(2), oid)));
    }
}
