use std::sync::Arc;

use tracing::debug;

use trellis_db::{Database, DbResult, Key, Trans};
use trellis_tree::StoreDeletionOperator;
use trellis_types::{SIndex, OID};

use crate::change::MetaChange;
use crate::error::SyncResult;

pub const META_TABLE: &str = "meta_changes";
/// `(sidx, oid, seq) -> seq`
pub const META_BY_OID_TABLE: &str = "meta_changes_by_oid";
/// `sidx -> last assigned seq`
pub const META_SEQ_TABLE: &str = "meta_change_seq";

fn store_prefix(sidx: SIndex) -> Vec<u8> {
    Key::new().u32(sidx.get()).build()
}

fn change_key(sidx: SIndex, seq: u64) -> Vec<u8> {
    Key::new().u32(sidx.get()).u64(seq).build()
}

fn oid_prefix(sidx: SIndex, oid: OID) -> Vec<u8> {
    Key::new().u32(sidx.get()).bytes(oid.as_bytes()).build()
}

fn oid_key(sidx: SIndex, oid: OID, seq: u64) -> Vec<u8> {
    Key::new()
        .u32(sidx.get())
        .bytes(oid.as_bytes())
        .u64(seq)
        .build()
}

/// Log of local changes awaiting acknowledgement.
pub struct MetaChangeLog {
    db: Arc<Database>,
}

impl MetaChangeLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a change with the next sequence number of its store.
    pub fn append(
        &self,
        sidx: SIndex,
        oid: OID,
        new_parent: OID,
        new_name: &str,
        t: &mut Trans<'_>,
    ) -> SyncResult<MetaChange> {
        let seq_key = store_prefix(sidx);
        let seq = self
            .db
            .get_value::<u64>(META_SEQ_TABLE, &seq_key)?
            .unwrap_or(0)
            + 1;
        let change = MetaChange {
            sidx,
            seq,
            oid,
            new_parent,
            new_name: new_name.to_string(),
        };
        t.put_value(META_SEQ_TABLE, seq_key, &seq)?;
        t.put_value(META_TABLE, change_key(sidx, seq), &change)?;
        t.put_value(META_BY_OID_TABLE, oid_key(sidx, oid, seq), &seq)?;
        debug!(sidx = %sidx, seq, oid = ?oid, "meta change appended");
        Ok(change)
    }

    pub fn get(&self, sidx: SIndex, seq: u64) -> SyncResult<Option<MetaChange>> {
        Ok(self.db.get_value(META_TABLE, &change_key(sidx, seq))?)
    }

    pub fn exists(&self, sidx: SIndex, seq: u64) -> bool {
        self.db.contains(META_TABLE, &change_key(sidx, seq))
    }

    /// Every pending change of a store, in sequence order.
    pub fn pending(&self, sidx: SIndex) -> SyncResult<Vec<MetaChange>> {
        Ok(self.db.scan_values(META_TABLE, &store_prefix(sidx))?)
    }

    /// Pending changes of one object, in sequence order.
    pub fn pending_for(&self, sidx: SIndex, oid: OID) -> SyncResult<Vec<MetaChange>> {
        let seqs: Vec<u64> = self
            .db
            .scan_values(META_BY_OID_TABLE, &oid_prefix(sidx, oid))?;
        let mut changes = Vec::with_capacity(seqs.len());
        for seq in seqs {
            if let Some(change) = self.get(sidx, seq)? {
                changes.push(change);
            }
        }
        Ok(changes)
    }

    pub fn latest_for(&self, sidx: SIndex, oid: OID) -> SyncResult<Option<MetaChange>> {
        Ok(self.pending_for(sidx, oid)?.pop())
    }

    pub fn has_pending(&self, sidx: SIndex, oid: OID) -> bool {
        !self
            .db
            .scan_from(META_BY_OID_TABLE, &oid_prefix(sidx, oid), &[], 1)
            .is_empty()
    }

    /// First pending change with a sequence number above `after`.
    pub fn first_after(&self, sidx: SIndex, after: u64) -> SyncResult<Option<MetaChange>> {
        Ok(self.db.first_value_from(
            META_TABLE,
            &store_prefix(sidx),
            &change_key(sidx, after.saturating_add(1)),
        )?)
    }

    pub fn delete(&self, change: &MetaChange, t: &mut Trans<'_>) -> bool {
        t.delete(META_BY_OID_TABLE, &oid_key(change.sidx, change.oid, change.seq));
        t.delete(META_TABLE, &change_key(change.sidx, change.seq))
    }

    /// Delete the object's changes up to and including `seq`.
    pub fn delete_through(&self, sidx: SIndex, oid: OID, seq: u64, t: &mut Trans<'_>) -> SyncResult<usize> {
        let mut deleted = 0;
        for change in self.pending_for(sidx, oid)? {
            if change.seq <= seq && self.delete(&change, t) {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub fn delete_all_for(&self, sidx: SIndex, oid: OID, t: &mut Trans<'_>) -> SyncResult<usize> {
        self.delete_through(sidx, oid, u64::MAX, t)
    }
}

impl StoreDeletionOperator for MetaChangeLog {
    fn delete_store(&self, sidx: SIndex, t: &mut Trans<'_>) -> DbResult<()> {
        let prefix = store_prefix(sidx);
        let rows = t.delete_prefix(META_TABLE, &prefix)
            + t.delete_prefix(META_BY_OID_TABLE, &prefix);
        t.delete(META_SEQ_TABLE, &prefix);
        debug!(sidx = %sidx, rows, "meta changes purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: SIndex = SIndex::new(1);

    fn log() -> MetaChangeLog {
        MetaChangeLog::new(Arc::new(Database::in_memory()))
    }

    #[test]
    fn sequences_increase_per_store() {
        let log = log();
        let (a, b) = (OID::generate(), OID::generate());
        let mut t = log.db.begin().unwrap();
        assert_eq!(log.append(S, a, OID::ROOT, "a", &mut t).unwrap().seq, 1);
        assert_eq!(log.append(S, b, OID::ROOT, "b", &mut t).unwrap().seq, 2);
        assert_eq!(log.append(SIndex::new(2), a, OID::ROOT, "a", &mut t).unwrap().seq, 1);
        t.commit().unwrap();

        let pending = log.pending(S).unwrap();
        assert_eq!(pending.iter().map(|c| c.seq).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn sequence_survives_deletion() {
        let log = log();
        let oid = OID::generate();
        let mut t = log.db.begin().unwrap();
        let first = log.append(S, oid, OID::ROOT, "x", &mut t).unwrap();
        log.delete(&first, &mut t);
        assert_eq!(log.append(S, oid, OID::ROOT, "y", &mut t).unwrap().seq, 2);
        t.commit().unwrap();
    }

    #[test]
    fn per_object_view_and_delete_through() {
        let log = log();
        let (a, b) = (OID::generate(), OID::generate());
        let mut t = log.db.begin().unwrap();
        log.append(S, a, OID::ROOT, "a1", &mut t).unwrap();
        log.append(S, b, OID::ROOT, "b1", &mut t).unwrap();
        log.append(S, a, OID::ROOT, "a2", &mut t).unwrap();
        log.append(S, a, OID::ROOT, "a3", &mut t).unwrap();
        t.commit().unwrap();

        assert_eq!(log.latest_for(S, a).unwrap().unwrap().new_name, "a3");
        assert!(log.has_pending(S, b));

        let mut t = log.db.begin().unwrap();
        assert_eq!(log.delete_through(S, a, 3, &mut t).unwrap(), 2);
        t.commit().unwrap();
        let left: Vec<String> = log
            .pending(S)
            .unwrap()
            .into_iter()
            .map(|c| c.new_name)
            .collect();
        assert_eq!(left, vec!["b1", "a3"]);
    }

    #[test]
    fn first_after_skips_submitted() {
        let log = log();
        let oid = OID::generate();
        let mut t = log.db.begin().unwrap();
        for name in ["a", "b", "c"] {
            log.append(S, oid, OID::ROOT, name, &mut t).unwrap();
        }
        t.commit().unwrap();
        assert_eq!(log.first_after(S, 0).unwrap().unwrap().seq, 1);
        assert_eq!(log.first_after(S, 2).unwrap().unwrap().seq, 3);
        assert_eq!(log.first_after(S, 3).unwrap(), None);
    }

    #[test]
    fn store_deletion_purges() {
        let log = log();
        let mut t = log.db.begin().unwrap();
        log.append(S, OID::generate(), OID::ROOT, "a", &mut t).unwrap();
        log.delete_store(S, &mut t).unwrap();
        t.commit().unwrap();
        assert!(log.pending(S).unwrap().is_empty());
        assert_eq!(log.db.row_count(META_SEQ_TABLE), 0);
    }
}
