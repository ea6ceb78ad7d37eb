//! The collector sequence: components advertised by peers and not yet
//! collected, in the order they were advertised.
//!
//! Tables:
//!
//! - `collector_seq` -- `(sidx, cid, seq) -> CollectorEntry`
//! - `collector_seq_by_oid` -- `(sidx, oid, cid) -> seq`
//! - `collector_last_seq` -- `sidx -> last assigned seq`
//!
//! Keying the main table by component first puts every metadata entry of a
//! store ahead of its content entries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use trellis_db::{Database, DbResult, Key, Trans};
use trellis_tree::StoreDeletionOperator;
use trellis_types::{ComponentKind, SIndex, Version, OID, SOID};

use crate::error::CollectorResult;

pub const COLLECTOR_TABLE: &str = "collector_seq";
pub const COLLECTOR_BY_OID_TABLE: &str = "collector_seq_by_oid";
pub const COLLECTOR_LAST_SEQ_TABLE: &str = "collector_last_seq";

fn store_prefix(sidx: SIndex) -> Vec<u8> {
    Key::new().u32(sidx.get()).build()
}

fn component_prefix(sidx: SIndex, cid: ComponentKind) -> Vec<u8> {
    Key::new().u32(sidx.get()).u8(cid.code()).build()
}

fn entry_key(sidx: SIndex, cid: ComponentKind, seq: u64) -> Vec<u8> {
    Key::new().u32(sidx.get()).u8(cid.code()).u64(seq).build()
}

fn oid_key(sidx: SIndex, oid: OID, cid: ComponentKind) -> Vec<u8> {
    Key::new()
        .u32(sidx.get())
        .bytes(oid.as_bytes())
        .u8(cid.code())
        .build()
}

/// A component waiting to be collected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorEntry {
    pub seq: u64,
    pub oid: OID,
    pub cid: ComponentKind,
    /// Version the peers advertised for the component.
    pub advertised: Version,
}

pub struct CollectorSequence {
    db: Arc<Database>,
}

impl CollectorSequence {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record that a component should be collected.
    ///
    /// An entry already queued for the same component is replaced by one
    /// with a new sequence number; the advertised versions are merged.
    pub fn add(
        &self,
        sidx: SIndex,
        oid: OID,
        cid: ComponentKind,
        advertised: &Version,
        t: &mut Trans<'_>,
    ) -> CollectorResult<CollectorEntry> {
        let mut version = advertised.clone();
        if let Some(previous) = self.get(sidx, oid, cid)? {
            version.merge(&previous.advertised);
            t.delete(COLLECTOR_TABLE, &entry_key(sidx, cid, previous.seq));
        }

        let last_key = store_prefix(sidx);
        let seq = self
            .db
            .get_value::<u64>(COLLECTOR_LAST_SEQ_TABLE, &last_key)?
            .unwrap_or(0)
            + 1;
        let entry = CollectorEntry {
            seq,
            oid,
            cid,
            advertised: version,
        };
        t.put_value(COLLECTOR_LAST_SEQ_TABLE, last_key, &seq)?;
        t.put_value(COLLECTOR_TABLE, entry_key(sidx, cid, seq), &entry)?;
        t.put_value(COLLECTOR_BY_OID_TABLE, oid_key(sidx, oid, cid), &seq)?;
        debug!(sidx = %sidx, oid = ?oid, %cid, seq, "collector entry added");
        Ok(entry)
    }

    pub fn get(&self, sidx: SIndex, oid: OID, cid: ComponentKind) -> CollectorResult<Option<CollectorEntry>> {
        let Some(seq) = self
            .db
            .get_value::<u64>(COLLECTOR_BY_OID_TABLE, &oid_key(sidx, oid, cid))?
        else {
            return Ok(None);
        };
        Ok(self.db.get_value(COLLECTOR_TABLE, &entry_key(sidx, cid, seq))?)
    }

    /// Remove a component's entry once collected. Returns `true` if it was
    /// queued.
    pub fn remove(&self, sidx: SIndex, oid: OID, cid: ComponentKind, t: &mut Trans<'_>) -> CollectorResult<bool> {
        let Some(entry) = self.get(sidx, oid, cid)? else {
            return Ok(false);
        };
        t.delete(COLLECTOR_BY_OID_TABLE, &oid_key(sidx, oid, cid));
        t.delete(COLLECTOR_TABLE, &entry_key(sidx, cid, entry.seq));
        Ok(true)
    }

    /// First entry of a component class with a sequence number above
    /// `after`.
    pub fn next_after(&self, sidx: SIndex, cid: ComponentKind, after: u64) -> CollectorResult<Option<CollectorEntry>> {
        Ok(self.db.first_value_from(
            COLLECTOR_TABLE,
            &component_prefix(sidx, cid),
            &entry_key(sidx, cid, after.saturating_add(1)),
        )?)
    }

    pub fn len(&self, sidx: SIndex) -> usize {
        self.db.scan_prefix(COLLECTOR_TABLE, &store_prefix(sidx)).len()
    }

    pub fn is_empty(&self, sidx: SIndex) -> bool {
        self.len(sidx) == 0
    }

    pub fn contains(&self, soid: SOID, cid: ComponentKind) -> bool {
        self.db
            .contains(COLLECTOR_BY_OID_TABLE, &oid_key(soid.sidx, soid.oid, cid))
    }
}

impl StoreDeletionOperator for CollectorSequence {
    fn delete_store(&self, sidx: SIndex, t: &mut Trans<'_>) -> DbResult<()> {
        let prefix = store_prefix(sidx);
        let rows = t.delete_prefix(COLLECTOR_TABLE, &prefix);
        t.delete_prefix(COLLECTOR_BY_OID_TABLE, &prefix);
        t.delete(COLLECTOR_LAST_SEQ_TABLE, &prefix);
        debug!(sidx = %sidx, rows, "collector sequence purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_types::{DeviceId, Tick};

    const S: SIndex = SIndex::new(1);

    fn sequence() -> CollectorSequence {
        CollectorSequence::new(Arc::new(Database::in_memory()))
    }

    #[test]
    fn readding_moves_to_the_end_and_merges() {
        let seq = sequence();
        let (a, b) = (OID::generate(), OID::generate());
        let (d1, d2) = (DeviceId::generate(), DeviceId::generate());
        let mut t = seq.db.begin().unwrap();
        seq.add(S, a, ComponentKind::Meta, &Version::of(d1, Tick::new(2)), &mut t).unwrap();
        seq.add(S, b, ComponentKind::Meta, &Version::new(), &mut t).unwrap();
        let again = seq
            .add(S, a, ComponentKind::Meta, &Version::of(d2, Tick::new(4)), &mut t)
            .unwrap();
        t.commit().unwrap();

        assert_eq!(again.seq, 3);
        assert_eq!(again.advertised.get(&d1), Tick::new(2));
        assert_eq!(again.advertised.get(&d2), Tick::new(4));
        assert_eq!(seq.len(S), 2);

        let first = seq.next_after(S, ComponentKind::Meta, 0).unwrap().unwrap();
        assert_eq!(first.oid, b);
        let second = seq.next_after(S, ComponentKind::Meta, first.seq).unwrap().unwrap();
        assert_eq!(second.oid, a);
        assert_eq!(seq.next_after(S, ComponentKind::Meta, second.seq).unwrap(), None);
    }

    #[test]
    fn components_are_queued_separately() {
        let seq = sequence();
        let a = OID::generate();
        let mut t = seq.db.begin().unwrap();
        seq.add(S, a, ComponentKind::Content, &Version::new(), &mut t).unwrap();
        seq.add(S, a, ComponentKind::Meta, &Version::new(), &mut t).unwrap();
        assert!(seq.remove(S, a, ComponentKind::Content, &mut t).unwrap());
        assert!(!seq.remove(S, a, ComponentKind::Content, &mut t).unwrap());
        t.commit().unwrap();

        assert!(seq.contains(SOID::new(S, a), ComponentKind::Meta));
        assert!(!seq.contains(SOID::new(S, a), ComponentKind::Content));
        assert_eq!(seq.next_after(S, ComponentKind::Content, 0).unwrap(), None);
    }

    #[test]
    fn store_deletion_purges() {
        let seq = sequence();
        let mut t = seq.db.begin().unwrap();
        seq.add(S, OID::generate(), ComponentKind::Meta, &Version::new(), &mut t).unwrap();
        seq.add(SIndex::new(2), OID::generate(), ComponentKind::Meta, &Version::new(), &mut t)
            .unwrap();
        seq.delete_store(S, &mut t).unwrap();
        t.commit().unwrap();

        assert!(seq.is_empty(S));
        assert_eq!(seq.len(SIndex::new(2)), 1);
    }
}
