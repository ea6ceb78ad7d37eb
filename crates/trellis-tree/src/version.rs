use std::sync::Arc;

use tracing::debug;

use trellis_db::{Database, Key, Trans};
use trellis_types::{ComponentKind, DeviceId, SIndex, Tick, Version, SOID};

use crate::error::TreeResult;

pub const VERSION_TABLE: &str = "versions";

const COMPONENTS: [ComponentKind; 2] = [ComponentKind::Meta, ComponentKind::Content];

fn version_key(soid: SOID, cid: ComponentKind) -> Vec<u8> {
    Key::new()
        .u32(soid.sidx.get())
        .bytes(soid.oid.as_bytes())
        .u8(cid.code())
        .build()
}

/// Per-component version vectors.
///
/// Callers of the object tree bump versions in the same transaction as the
/// mutation they record; the tree itself never touches this table.
pub struct VersionTracker {
    db: Arc<Database>,
    device: DeviceId,
}

impl VersionTracker {
    pub fn new(db: Arc<Database>, device: DeviceId) -> Self {
        Self { db, device }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Advance this device's metadata tick for `soid`.
    pub fn bump(&self, soid: SOID, alias: bool, t: &mut Trans<'_>) -> TreeResult<Tick> {
        self.bump_component(soid, ComponentKind::Meta, alias, t)
    }

    pub fn bump_component(
        &self,
        soid: SOID,
        cid: ComponentKind,
        alias: bool,
        t: &mut Trans<'_>,
    ) -> TreeResult<Tick> {
        let mut version = self.version(soid, cid)?;
        let tick = version.get(&self.device).increment(alias);
        version.set(self.device, tick);
        t.put_value(VERSION_TABLE, version_key(soid, cid), &version)?;
        debug!(soid = %soid, cid = %cid, tick = %tick, "version bumped");
        Ok(tick)
    }

    /// This device's metadata tick for `soid`, if it ever changed it.
    pub fn current(&self, soid: SOID) -> TreeResult<Option<Tick>> {
        let tick = self.version(soid, ComponentKind::Meta)?.get(&self.device);
        Ok((tick != Tick::ZERO).then_some(tick))
    }

    /// The full version vector of a component. Empty if never recorded.
    pub fn version(&self, soid: SOID, cid: ComponentKind) -> TreeResult<Version> {
        Ok(self
            .db
            .get_value(VERSION_TABLE, &version_key(soid, cid))?
            .unwrap_or_default())
    }

    /// Fold a version learned from a peer into the local one.
    pub fn merge_remote(
        &self,
        soid: SOID,
        cid: ComponentKind,
        remote: &Version,
        t: &mut Trans<'_>,
    ) -> TreeResult<Version> {
        let mut version = self.version(soid, cid)?;
        version.merge(remote);
        t.put_value(VERSION_TABLE, version_key(soid, cid), &version)?;
        Ok(version)
    }

    /// Fold every component version of `alias` into `target` and drop the
    /// alias rows. The target's metadata gets an aliasing tick.
    pub fn merge_aliased(&self, alias: SOID, target: SOID, t: &mut Trans<'_>) -> TreeResult<Tick> {
        for cid in COMPONENTS {
            let folded = self.version(alias, cid)?;
            if folded.is_empty() {
                continue;
            }
            let mut version = self.version(target, cid)?;
            version.merge(&folded);
            t.put_value(VERSION_TABLE, version_key(target, cid), &version)?;
            t.delete(VERSION_TABLE, &version_key(alias, cid));
        }
        let tick = self.bump(target, true, t)?;
        debug!(alias = %alias, target = %target, tick = %tick, "versions merged");
        Ok(tick)
    }

    pub fn purge_store(&self, sidx: SIndex, t: &mut Trans<'_>) -> usize {
        t.delete_prefix(VERSION_TABLE, &Key::new().u32(sidx.get()).build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use trellis_types::OID;

    fn tracker() -> VersionTracker {
        VersionTracker::new(Arc::new(Database::in_memory()), DeviceId::generate())
    }

    fn soid() -> SOID {
        SOID::new(SIndex::new(1), OID::generate())
    }

    #[test]
    fn absent_is_none() {
        let vt = tracker();
        assert_eq!(vt.current(soid()).unwrap(), None);
        assert!(vt.version(soid(), ComponentKind::Content).unwrap().is_empty());
    }

    #[test]
    fn bump_parity() {
        let vt = tracker();
        let s = soid();
        let mut t = vt.db.begin().unwrap();
        assert_eq!(vt.bump(s, false, &mut t).unwrap(), Tick::new(2));
        assert_eq!(vt.bump(s, true, &mut t).unwrap(), Tick::new(3));
        assert_eq!(vt.bump(s, true, &mut t).unwrap(), Tick::new(5));
        assert_eq!(vt.bump(s, false, &mut t).unwrap(), Tick::new(6));
        t.commit().unwrap();
        assert_eq!(vt.current(s).unwrap(), Some(Tick::new(6)));
    }

    #[test]
    fn bump_rolls_back_with_its_transaction() {
        let vt = tracker();
        let s = soid();
        let mut t = vt.db.begin().unwrap();
        vt.bump(s, false, &mut t).unwrap();
        drop(t);
        assert_eq!(vt.current(s).unwrap(), None);
    }

    #[test]
    fn components_are_independent() {
        let vt = tracker();
        let s = soid();
        let mut t = vt.db.begin().unwrap();
        vt.bump_component(s, ComponentKind::Content, false, &mut t).unwrap();
        t.commit().unwrap();
        assert_eq!(vt.current(s).unwrap(), None);
        assert_eq!(
            vt.version(s, ComponentKind::Content).unwrap().get(&vt.device()),
            Tick::new(2)
        );
    }

    #[test]
    fn merge_remote_takes_max() {
        let vt = tracker();
        let s = soid();
        let peer = DeviceId::generate();
        let mut t = vt.db.begin().unwrap();
        vt.bump(s, false, &mut t).unwrap();
        let merged = vt
            .merge_remote(s, ComponentKind::Meta, &Version::of(peer, Tick::new(8)), &mut t)
            .unwrap();
        t.commit().unwrap();
        assert_eq!(merged.get(&peer), Tick::new(8));
        assert_eq!(merged.get(&vt.device()), Tick::new(2));
    }

    #[test]
    fn merge_aliased_produces_odd_tick() {
        let vt = tracker();
        let (alias, target) = (soid(), soid());
        let peer = DeviceId::generate();
        let mut t = vt.db.begin().unwrap();
        vt.bump(target, false, &mut t).unwrap();
        vt.merge_remote(alias, ComponentKind::Meta, &Version::of(peer, Tick::new(4)), &mut t)
            .unwrap();
        let tick = vt.merge_aliased(alias, target, &mut t).unwrap();
        t.commit().unwrap();

        assert!(tick.is_alias());
        assert_eq!(tick, Tick::new(3));
        let version = vt.version(target, ComponentKind::Meta).unwrap();
        assert_eq!(version.get(&peer), Tick::new(4));
        assert!(vt.version(alias, ComponentKind::Meta).unwrap().is_empty());
    }

    #[test]
    fn purge_store_drops_only_that_store() {
        let vt = tracker();
        let a = SOID::new(SIndex::new(1), OID::generate());
        let b = SOID::new(SIndex::new(2), OID::generate());
        let mut t = vt.db.begin().unwrap();
        vt.bump(a, false, &mut t).unwrap();
        vt.bump(b, false, &mut t).unwrap();
        assert_eq!(vt.purge_store(SIndex::new(1), &mut t), 1);
        t.commit().unwrap();
        assert_eq!(vt.current(a).unwrap(), None);
        assert!(vt.current(b).unwrap().is_some());
    }

    proptest! {
        #[test]
        fn bump_is_monotonic_with_requested_parity(aliases in proptest::collection::vec(any::<bool>(), 1..40)) {
            let vt = tracker();
            let s = soid();
            let mut t = vt.db.begin().unwrap();
            let mut last = Tick::ZERO;
            for alias in aliases {
                let tick = vt.bump(s, alias, &mut t).unwrap();
                prop_assert!(tick > last);
                prop_assert_eq!(tick.is_alias(), alias);
                last = tick;
            }
        }
    }
}
