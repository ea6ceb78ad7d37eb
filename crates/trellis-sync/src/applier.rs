//! Application of buffered remote changes.
//!
//! Entries are released in boundary order, but each is applied against the
//! object's RemoteLink, which holds the final position asserted by the log
//! so far. An entry whose preconditions are missing (parent not present,
//! name held by an object that is itself about to move) first applies the
//! buffered entries it depends on, inside the same transaction.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use trellis_db::{Database, Trans};
use trellis_tree::{DeletePolicy, ObjectTree, TreeError, VersionTracker, CA};
use trellis_types::{ComponentKind, Lts, ObjectType, SIndex, OID, SOID};

use crate::buffer::{BufferedChange, RemoteChangeBuffer};
use crate::conflict::{
    conflict_name, ConflictPolicy, DefaultConflictPolicy, NameConflict, NameResolution,
    PendingResolution,
};
use crate::error::SyncResult;
use crate::meta_change::MetaChangeLog;
use crate::mutator::LocalMutator;
use crate::remote_link::{RemoteLink, RemoteLinks};

/// Outcome of one [`BufferedApplier::release`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Entries applied and removed from the buffer.
    pub applied: usize,
    /// Entries left buffered because they cannot be applied yet.
    pub deferred: usize,
}

/// State of one entry's transaction.
struct Pass {
    visiting: HashSet<OID>,
    applied: usize,
}

impl Pass {
    fn new(oid: OID) -> Self {
        Self {
            visiting: HashSet::from([oid]),
            applied: 0,
        }
    }
}

/// Where an incoming object ends up after a name conflict.
struct Placement {
    name: String,
    /// The incoming object took a conflict name, which must be submitted.
    renamed: bool,
    /// Local directory to merge into the incoming one.
    alias: Option<OID>,
}

pub struct BufferedApplier {
    db: Arc<Database>,
    tree: Arc<ObjectTree>,
    versions: Arc<VersionTracker>,
    links: Arc<RemoteLinks>,
    meta: Arc<MetaChangeLog>,
    buffer: Arc<RemoteChangeBuffer>,
    mutator: Arc<LocalMutator>,
    policy: Arc<dyn ConflictPolicy>,
}

impl BufferedApplier {
    pub fn new(
        db: Arc<Database>,
        tree: Arc<ObjectTree>,
        versions: Arc<VersionTracker>,
        links: Arc<RemoteLinks>,
        meta: Arc<MetaChangeLog>,
        buffer: Arc<RemoteChangeBuffer>,
        mutator: Arc<LocalMutator>,
    ) -> Self {
        Self {
            db,
            tree,
            versions,
            links,
            meta,
            buffer,
            mutator,
            policy: Arc::new(DefaultConflictPolicy),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn ConflictPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Apply every entry of a store with a boundary of at most `until`.
    ///
    /// Each entry gets its own transaction. An entry that cannot be applied
    /// stays buffered and is retried by the next release.
    pub fn release(&self, sidx: SIndex, until: Lts) -> SyncResult<ReleaseReport> {
        let mut report = ReleaseReport::default();
        for queued in self.buffer.releasable(sidx, until)? {
            // Applied earlier in this release as a dependency.
            let Some(entry) = self.buffer.get(sidx, queued.oid)? else {
                continue;
            };
            let mut pass = Pass::new(entry.oid);
            let mut t = self.db.begin()?;
            match self.apply(&entry, &mut pass, &mut t) {
                Ok(true) => {
                    t.commit()?;
                    report.applied += pass.applied;
                }
                Ok(false) => {
                    t.abort();
                    report.deferred += 1;
                }
                Err(e) if !e.is_transient() => {
                    t.abort();
                    warn!(soid = %entry.soid(), boundary = %entry.boundary, error = %e, "buffered change not applicable");
                    report.deferred += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if report.applied > 0 || report.deferred > 0 {
            debug!(sidx = %sidx, until = %until, applied = report.applied, deferred = report.deferred, "buffer released");
        }
        Ok(report)
    }

    /// Apply one entry. Returns `false` if it has to wait.
    fn apply(&self, entry: &BufferedChange, pass: &mut Pass, t: &mut Trans<'_>) -> SyncResult<bool> {
        let soid = entry.soid();
        let Some(link) = self.links.get(entry.sidx, entry.oid)? else {
            debug!(soid = %soid, "no remote position; entry discarded");
            self.buffer.remove(entry.sidx, entry.oid, t)?;
            return Ok(true);
        };

        if let Some(local) = self.meta.latest_for(entry.sidx, entry.oid)? {
            match self.policy.on_pending_local(soid, &local, &link) {
                PendingResolution::KeepLocal => {
                    debug!(soid = %soid, seq = local.seq, "local change pending; remote position superseded");
                    self.buffer.remove(entry.sidx, entry.oid, t)?;
                    return Ok(true);
                }
                PendingResolution::TakeRemote => {
                    let discarded = self.meta.delete_all_for(entry.sidx, entry.oid, t)?;
                    info!(soid = %soid, discarded, "local changes discarded for remote position");
                }
            }
        }

        if link.is_removed() {
            self.apply_removal(soid, t)?;
        } else if !self.apply_position(entry, &link, pass, t)? {
            return Ok(false);
        }
        self.buffer.remove(entry.sidx, entry.oid, t)?;
        pass.applied += 1;
        debug!(soid = %soid, parent = ?link.parent, name = %link.name, "remote change applied");
        Ok(true)
    }

    /// Apply the buffered entry of `oid` ahead of the one being applied.
    fn apply_dependency(&self, sidx: SIndex, oid: OID, pass: &mut Pass, t: &mut Trans<'_>) -> SyncResult<()> {
        if !pass.visiting.insert(oid) {
            return Ok(());
        }
        if let Some(entry) = self.buffer.get(sidx, oid)? {
            self.apply(&entry, pass, t)?;
        }
        Ok(())
    }

    fn apply_removal(&self, soid: SOID, t: &mut Trans<'_>) -> SyncResult<()> {
        match self.tree.get(soid)? {
            Some(oa) if !oa.parent.is_trash() => {
                let from = self.mutator.live_path(soid)?;
                self.tree.delete(soid, DeletePolicy::Cascade, t)?;
                self.mutator.mirror_delete(from, t)
            }
            _ => Ok(()),
        }
    }

    fn apply_position(
        &self,
        entry: &BufferedChange,
        link: &RemoteLink,
        pass: &mut Pass,
        t: &mut Trans<'_>,
    ) -> SyncResult<bool> {
        let soid = entry.soid();
        if !self.ensure_parent(entry.sidx, link.parent, pass, t)? {
            debug!(soid = %soid, parent = ?link.parent, "parent not present; entry stays buffered");
            return Ok(false);
        }

        let placement = self.place(entry, link, pass, t)?;
        match self.tree.get(soid)? {
            Some(oa) if oa.parent == link.parent && oa.name == placement.name => {}
            Some(_) => self.relocate(soid, link.parent, &placement.name, pass, t)?,
            None => self.create_incoming(entry, link.parent, &placement.name, t)?,
        }
        if placement.renamed {
            self.mutator.bump(soid, t)?;
            self.mutator.record(soid, t)?;
        }
        if let Some(occupant) = placement.alias {
            self.alias(SOID::new(entry.sidx, occupant), soid, t)?;
        }
        Ok(true)
    }

    fn is_live(&self, soid: SOID) -> SyncResult<bool> {
        Ok(self.tree.exists(soid) && !self.tree.is_deleted(soid)?)
    }

    /// Make sure `parent` is present and live, applying its buffered entry
    /// if it has one.
    fn ensure_parent(&self, sidx: SIndex, parent: OID, pass: &mut Pass, t: &mut Trans<'_>) -> SyncResult<bool> {
        let psoid = SOID::new(sidx, parent);
        if self.is_live(psoid)? {
            return Ok(true);
        }
        if self.buffer.is_buffered(psoid) {
            self.apply_dependency(sidx, parent, pass, t)?;
        }
        self.is_live(psoid)
    }

    fn occupant(&self, link: &RemoteLink) -> SyncResult<Option<OID>> {
        Ok(self
            .tree
            .child(link.sidx, link.parent, &link.name)?
            .filter(|o| *o != link.oid))
    }

    /// Resolve a conflict on the remote name, if any.
    fn place(
        &self,
        entry: &BufferedChange,
        link: &RemoteLink,
        pass: &mut Pass,
        t: &mut Trans<'_>,
    ) -> SyncResult<Placement> {
        let mut placement = Placement {
            name: link.name.clone(),
            renamed: false,
            alias: None,
        };
        let Some(mut occupant) = self.occupant(link)? else {
            return Ok(placement);
        };
        // The occupant may itself be about to move away.
        if self.buffer.is_buffered(SOID::new(link.sidx, occupant)) {
            self.apply_dependency(link.sidx, occupant, pass, t)?;
            match self.occupant(link)? {
                Some(o) => occupant = o,
                None => return Ok(placement),
            }
        }

        let occupant_soid = SOID::new(link.sidx, occupant);
        let conflict = NameConflict {
            sidx: link.sidx,
            parent: link.parent,
            name: link.name.clone(),
            occupant: self.tree.require(occupant_soid)?,
            occupant_is_remote: self.links.get(link.sidx, occupant)?.is_some(),
            incoming: link.oid,
            incoming_type: entry.otype,
        };
        let mut resolution = self.policy.on_name_conflict(&conflict);
        if resolution == NameResolution::Alias && !(conflict.occupant.is_dir() && entry.otype.is_dir()) {
            warn!(soid = %entry.soid(), "only directories can be aliased; renaming incoming");
            resolution = NameResolution::RenameIncoming;
        }
        info!(
            sidx = %link.sidx,
            parent = ?link.parent,
            name = %link.name,
            occupant = ?occupant,
            incoming = ?link.oid,
            ?resolution,
            "name conflict"
        );

        let parked = conflict_name(&link.name, occupant);
        match resolution {
            NameResolution::RenameOccupant => {
                self.mutator.move_object(occupant_soid, link.parent, &parked, t)?;
            }
            NameResolution::RenameIncoming => {
                placement.name = conflict_name(&link.name, link.oid);
                placement.renamed = true;
            }
            NameResolution::Alias => {
                // Out of the way until the merge; its removal is logged then.
                let from = self.mutator.live_path(occupant_soid)?;
                self.tree.move_object(occupant_soid, link.parent, &parked, t)?;
                self.mutator.mirror_move(from, occupant_soid, t)?;
                placement.alias = Some(occupant);
            }
        }
        Ok(placement)
    }

    fn relocate(&self, soid: SOID, parent: OID, name: &str, pass: &mut Pass, t: &mut Trans<'_>) -> SyncResult<()> {
        let from = self.mutator.live_path(soid)?;
        match self.tree.move_object(soid, parent, name, t) {
            Ok(()) => {}
            Err(TreeError::CycleDetected { .. }) => {
                // Something between `parent` and `soid` is waiting to move out.
                self.apply_ancestors(soid, parent, pass, t)?;
                self.tree.move_object(soid, parent, name, t)?;
            }
            Err(e) => return Err(e.into()),
        }
        self.mutator.mirror_move(from, soid, t)
    }

    /// Apply the buffered entries of `start` and its ancestors below `stop`.
    fn apply_ancestors(&self, stop: SOID, start: OID, pass: &mut Pass, t: &mut Trans<'_>) -> SyncResult<()> {
        let sidx = stop.sidx;
        let mut chain = Vec::new();
        let mut current = start;
        while current != stop.oid && !current.is_reserved() {
            chain.push(current);
            current = self.tree.require(SOID::new(sidx, current))?.parent;
        }
        for oid in chain {
            if self.buffer.is_buffered(SOID::new(sidx, oid)) {
                self.apply_dependency(sidx, oid, pass, t)?;
            }
        }
        Ok(())
    }

    fn create_incoming(&self, entry: &BufferedChange, parent: OID, name: &str, t: &mut Trans<'_>) -> SyncResult<()> {
        let soid = entry.soid();
        self.tree.create_with_oid(soid, entry.otype, parent, name, t)?;
        if let Some(source) = entry.migrant {
            self.migrate(source, soid, entry.otype, t)?;
        }
        self.mutator.mirror_create(soid, t)
    }

    /// Move an object's content and versions from another store into
    /// `target`, then delete the source.
    fn migrate(&self, source: SOID, target: SOID, otype: ObjectType, t: &mut Trans<'_>) -> SyncResult<()> {
        let Some(oa) = self.tree.get(source)? else {
            debug!(source = %source, "migrant source absent");
            return Ok(());
        };
        if oa.parent.is_trash() {
            return Ok(());
        }
        if oa.is_file() && otype.is_file() {
            for kidx in self.tree.branches(source)? {
                if let Some(ca) = self.tree.get_ca(source, kidx)? {
                    self.tree.set_ca(&CA { soid: target, ..ca }, t)?;
                }
            }
        }
        for cid in [ComponentKind::Meta, ComponentKind::Content] {
            let version = self.versions.version(source, cid)?;
            if !version.is_empty() {
                self.versions.merge_remote(target, cid, &version, t)?;
            }
        }
        let from = self.mutator.live_path(source)?;
        self.tree.delete(source, DeletePolicy::Cascade, t)?;
        self.mutator.mirror_delete(from, t)?;
        info!(source = %source, target = %target, "object migrated");
        Ok(())
    }

    /// Merge a local directory into `target`, which took its name.
    fn alias(&self, occupant: SOID, target: SOID, t: &mut Trans<'_>) -> SyncResult<()> {
        let sidx = target.sidx;
        for child in self.tree.children(occupant)? {
            let child_soid = SOID::new(sidx, child);
            let mut name = self.tree.require(child_soid)?.name;
            if self.tree.child(sidx, target.oid, &name)?.is_some() {
                name = conflict_name(&name, child);
            }
            if self.links.get(sidx, child)?.is_none() {
                // Never placed remotely: only the final position is sent.
                self.meta.delete_all_for(sidx, child, t)?;
            }
            self.mutator.move_object(child_soid, target.oid, &name, t)?;
        }

        self.versions.merge_aliased(occupant, target, t)?;
        self.meta.delete_all_for(sidx, occupant.oid, t)?;
        let from = self.mutator.live_path(occupant)?;
        self.tree.delete(occupant, DeletePolicy::RequireEmpty, t)?;
        self.mutator.mirror_delete(from, t)?;
        self.mutator.record(occupant, t)?;
        info!(alias = %occupant, target = %target, "directories aliased");
        Ok(())
    }
}
