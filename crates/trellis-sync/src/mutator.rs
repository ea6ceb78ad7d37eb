use std::sync::Arc;

use tracing::debug;

use trellis_db::Trans;
use trellis_tree::{DeletePolicy, ObjectTree, PhysicalStorage, ResolvedPath, TreeError, VersionTracker};
use trellis_types::{ObjectType, SIndex, OID, SOID};

use crate::change::MetaChange;
use crate::error::SyncResult;
use crate::meta_change::MetaChangeLog;
use crate::submitter::Submitter;

/// Entry point for locally originated tree mutations.
///
/// Each operation runs inside the caller's transaction: the tree change,
/// its physical side effect, a non-alias version bump, the [`MetaChange`]
/// and a submission request either all commit or all roll back.
pub struct LocalMutator {
    tree: Arc<ObjectTree>,
    versions: Arc<VersionTracker>,
    meta: Arc<MetaChangeLog>,
    physical: Arc<dyn PhysicalStorage>,
    submitter: Arc<Submitter>,
}

impl LocalMutator {
    pub fn new(
        tree: Arc<ObjectTree>,
        versions: Arc<VersionTracker>,
        meta: Arc<MetaChangeLog>,
        physical: Arc<dyn PhysicalStorage>,
        submitter: Arc<Submitter>,
    ) -> Self {
        Self {
            tree,
            versions,
            meta,
            physical,
            submitter,
        }
    }

    pub fn create(
        &self,
        sidx: SIndex,
        otype: ObjectType,
        parent: OID,
        name: &str,
        t: &mut Trans<'_>,
    ) -> SyncResult<OID> {
        let oid = self.tree.create(sidx, otype, parent, name, t)?;
        let soid = SOID::new(sidx, oid);
        self.mirror_create(soid, t)?;
        self.versions.bump(soid, false, t)?;
        self.record(soid, t)?;
        Ok(oid)
    }

    pub fn move_object(&self, soid: SOID, parent: OID, name: &str, t: &mut Trans<'_>) -> SyncResult<()> {
        let oa = self.tree.require(soid)?;
        if oa.parent == parent && oa.name == name {
            return Ok(());
        }
        let from = self.live_path(soid)?;
        self.tree.move_object(soid, parent, name, t)?;
        self.mirror_move(from, soid, t)?;
        self.versions.bump(soid, false, t)?;
        self.record(soid, t)?;
        Ok(())
    }

    /// Delete an object. Deleting something already deleted is a no-op.
    pub fn delete(&self, soid: SOID, policy: DeletePolicy, t: &mut Trans<'_>) -> SyncResult<()> {
        if self.tree.require(soid)?.parent.is_trash() {
            return Ok(());
        }
        let from = self.live_path(soid)?;
        self.tree.delete(soid, policy, t)?;
        self.mirror_delete(from, t)?;
        self.versions.bump(soid, false, t)?;
        self.record(soid, t)?;
        Ok(())
    }

    /// Log the object's current position as a local change and request its
    /// submission.
    pub(crate) fn record(&self, soid: SOID, t: &mut Trans<'_>) -> SyncResult<MetaChange> {
        let oa = self.tree.require(soid)?;
        let change = self.meta.append(soid.sidx, soid.oid, oa.parent, &oa.name, t)?;
        self.submitter.enqueue(soid.sidx, t)?;
        debug!(soid = %soid, seq = change.seq, "local change recorded");
        Ok(change)
    }

    pub(crate) fn bump(&self, soid: SOID, t: &mut Trans<'_>) -> SyncResult<()> {
        self.versions.bump(soid, false, t)?;
        Ok(())
    }

    /// Path of an object, or `None` if it is deleted.
    pub(crate) fn live_path(&self, soid: SOID) -> SyncResult<Option<ResolvedPath>> {
        match self.tree.resolve_path(soid) {
            Ok(path) => Ok(Some(path)),
            Err(TreeError::Deleted(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn mirror_create(&self, soid: SOID, t: &mut Trans<'_>) -> SyncResult<()> {
        let Some(path) = self.live_path(soid)? else {
            return Ok(());
        };
        if self.tree.require(soid)?.is_file() {
            self.physical.create_file(&path, t)?;
        } else {
            self.physical.create_folder(&path, t)?;
        }
        Ok(())
    }

    /// Mirror a tree move of `soid` that started at `from`.
    pub(crate) fn mirror_move(&self, from: Option<ResolvedPath>, soid: SOID, t: &mut Trans<'_>) -> SyncResult<()> {
        match (from, self.live_path(soid)?) {
            (Some(from), Some(to)) if from != to => self.physical.move_path(&from, &to, t)?,
            (None, Some(_)) => self.mirror_create(soid, t)?,
            (Some(from), None) => self.physical.delete(&from, t)?,
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn mirror_delete(&self, from: Option<ResolvedPath>, t: &mut Trans<'_>) -> SyncResult<()> {
        if let Some(from) = from {
            self.physical.delete(&from, t)?;
        }
        Ok(())
    }
}
