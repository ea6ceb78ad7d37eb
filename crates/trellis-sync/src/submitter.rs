//! Local change submission and acknowledgement.
//!
//! Pending [`MetaChange`] rows are the outbound queue. [`SubmitQueue`] hands
//! them to the authority in sequence order, tracking progress with a
//! per-store cursor; the rows themselves are removed only when the
//! authority's echo is matched by [`Submitter::ack_matching`]. Objects the
//! authority has taken a change for are remembered until their echo lands,
//! so a resubmission after a restart never turns a later change of the same
//! object back into an insert.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use trellis_db::{Database, DbResult, Key, Trans};
use trellis_queue::{
    Cat, CoreGuard, QueueBackend, QueueContext, QueueDriver, QueueResult, ScanControl, Token,
};
use trellis_tree::{ObjectTree, StoreDeletionOperator, Stores};
use trellis_types::{SIndex, OID, SOID};

use crate::change::{MetaChange, RemoteChange, SubmittedChange};
use crate::error::{SyncError, SyncResult};
use crate::meta_change::MetaChangeLog;
use crate::remote_link::{RemoteLink, RemoteLinks};
use crate::transport::RemoteAuthority;

/// `sidx -> seq of the last submitted change`
pub const SUBMIT_CURSOR_TABLE: &str = "submit_cursor";

/// `(sidx, oid) -> seq of the last change delivered for an unacknowledged object`
pub const SUBMITTED_OBJECT_TABLE: &str = "submitted_object";

pub type SubmitDriver = QueueDriver<SIndex, MetaChange>;

fn cursor_key(sidx: SIndex) -> Vec<u8> {
    Key::new().u32(sidx.get()).build()
}

fn submitted_key(sidx: SIndex, oid: OID) -> Vec<u8> {
    Key::new().u32(sidx.get()).bytes(oid.as_bytes()).build()
}

/// Queue backend that submits pending changes to the authority.
pub struct SubmitQueue {
    db: Arc<Database>,
    tree: Arc<ObjectTree>,
    stores: Arc<Stores>,
    meta: Arc<MetaChangeLog>,
    links: Arc<RemoteLinks>,
    authority: Arc<dyn RemoteAuthority>,
}

impl SubmitQueue {
    pub fn new(
        db: Arc<Database>,
        tree: Arc<ObjectTree>,
        stores: Arc<Stores>,
        meta: Arc<MetaChangeLog>,
        links: Arc<RemoteLinks>,
        authority: Arc<dyn RemoteAuthority>,
    ) -> Self {
        Self {
            db,
            tree,
            stores,
            meta,
            links,
            authority,
        }
    }

    /// Sequence number of the last change submitted for a store.
    pub fn cursor(&self, sidx: SIndex) -> SyncResult<u64> {
        Ok(self
            .db
            .get_value(SUBMIT_CURSOR_TABLE, &cursor_key(sidx))?
            .unwrap_or(0))
    }

    fn set_cursor(&self, sidx: SIndex, seq: u64, t: &mut Trans<'_>) -> SyncResult<()> {
        t.put_value(SUBMIT_CURSOR_TABLE, cursor_key(sidx), &seq)?;
        Ok(())
    }

    /// Whether a change of the object was delivered but not yet echoed.
    pub fn is_submitted(&self, sidx: SIndex, oid: OID) -> bool {
        self.db.contains(SUBMITTED_OBJECT_TABLE, &submitted_key(sidx, oid))
    }

    /// What to send for a pending change.
    ///
    /// A removal when it targets trash. Otherwise an insert when the
    /// authority has never placed the object and no earlier change of it is
    /// pending, and a move when it has or one is.
    pub fn derive(&self, change: &MetaChange) -> SyncResult<SubmittedChange> {
        if change.is_delete() {
            return Ok(SubmittedChange::Remove { oid: change.oid });
        }
        let first_pending = self
            .meta
            .pending_for(change.sidx, change.oid)?
            .first()
            .map(|c| c.seq);
        let known = self.links.get(change.sidx, change.oid)?.is_some()
            || self.is_submitted(change.sidx, change.oid);
        if !known && first_pending.map_or(true, |seq| seq >= change.seq) {
            let oa = self.tree.require(change.soid())?;
            return Ok(SubmittedChange::Insert {
                oid: change.oid,
                parent: change.new_parent,
                name: change.new_name.clone(),
                otype: oa.otype,
            });
        }
        Ok(SubmittedChange::Move {
            oid: change.oid,
            parent: change.new_parent,
            name: change.new_name.clone(),
        })
    }

    fn next_unsubmitted(&self) -> SyncResult<Option<MetaChange>> {
        for store in self.stores.list()? {
            let cursor = self.cursor(store.sidx)?;
            if let Some(change) = self.meta.first_after(store.sidx, cursor)? {
                return Ok(Some(change));
            }
        }
        Ok(None)
    }

    /// Forget a change that can never be accepted.
    fn drop_change(&self, change: &MetaChange) -> SyncResult<()> {
        let mut t = self.db.begin()?;
        self.meta.delete(change, &mut t);
        let cursor = self.cursor(change.sidx)?.max(change.seq);
        self.set_cursor(change.sidx, cursor, &mut t)?;
        t.commit()?;
        Ok(())
    }
}

#[async_trait]
impl QueueBackend<SIndex, MetaChange> for SubmitQueue {
    fn enqueue(&self, sidx: SIndex, _t: &mut Trans<'_>) -> QueueResult<()> {
        // The change rows written in the same transaction are the queue.
        debug!(sidx = %sidx, "submission requested");
        Ok(())
    }

    fn front(&self) -> QueueResult<Option<MetaChange>> {
        Ok(self.next_unsubmitted()?)
    }

    async fn process(
        &self,
        change: &MetaChange,
        token: &Token,
        core: &mut CoreGuard,
        control: &ScanControl,
    ) -> QueueResult<bool> {
        let submitted = match self.derive(change) {
            Ok(submitted) => submitted,
            Err(e) if !e.is_transient() => {
                warn!(sidx = %change.sidx, seq = change.seq, error = %e, "dropping change");
                self.drop_change(change)?;
                return Ok(true);
            }
            Err(e) => return Err(e.into()),
        };

        let result = token
            .pseudo_pause(core, self.authority.submit_change(change.sidx, &submitted))
            .await;

        // The store may have been deleted, or the change acknowledged,
        // while the core was released.
        if !self.stores.exists(change.sidx) || !self.meta.exists(change.sidx, change.seq) {
            debug!(sidx = %change.sidx, seq = change.seq, "change vanished during submission");
            control.restart();
            return Ok(true);
        }

        match result {
            Ok(receipt) => {
                debug!(sidx = %change.sidx, seq = change.seq, lts = %receipt.lts, "change submitted");
                Ok(true)
            }
            Err(SyncError::AlreadyApplied(reason)) => {
                debug!(sidx = %change.sidx, seq = change.seq, reason = %reason, "change already applied");
                Ok(true)
            }
            Err(SyncError::Rejected(reason)) => {
                warn!(sidx = %change.sidx, seq = change.seq, reason = %reason, "change rejected; dropping");
                self.drop_change(change)?;
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn dequeue(&self, change: &MetaChange, t: &mut Trans<'_>) -> QueueResult<()> {
        let cursor = self.cursor(change.sidx)?.max(change.seq);
        self.set_cursor(change.sidx, cursor, t)?;
        // Dropped changes were never delivered.
        if self.meta.exists(change.sidx, change.seq) {
            t.put_value(
                SUBMITTED_OBJECT_TABLE,
                submitted_key(change.sidx, change.oid),
                &change.seq,
            )?;
        }
        Ok(())
    }
}

impl StoreDeletionOperator for SubmitQueue {
    fn delete_store(&self, sidx: SIndex, t: &mut Trans<'_>) -> DbResult<()> {
        t.delete(SUBMIT_CURSOR_TABLE, &cursor_key(sidx));
        t.delete_prefix(SUBMITTED_OBJECT_TABLE, &cursor_key(sidx));
        Ok(())
    }
}

/// The local change submitter: the submit queue, its driver, and the ack
/// path.
pub struct Submitter {
    queue: Arc<SubmitQueue>,
    driver: SubmitDriver,
}

impl Submitter {
    pub fn new(queue: Arc<SubmitQueue>, ctx: &QueueContext) -> Self {
        let driver = QueueDriver::new("submit", Cat::Submit, queue.clone(), ctx);
        Self { queue, driver }
    }

    pub fn queue(&self) -> &Arc<SubmitQueue> {
        &self.queue
    }

    pub fn driver(&self) -> &SubmitDriver {
        &self.driver
    }

    /// Request submission of a store's new changes once `t` commits.
    pub fn enqueue(&self, sidx: SIndex, t: &mut Trans<'_>) -> SyncResult<()> {
        self.driver.enqueue(sidx, t)?;
        Ok(())
    }

    /// Resubmit every unacknowledged change of a store, in sequence order.
    pub fn submit_pending(&self, sidx: SIndex, t: &mut Trans<'_>) -> SyncResult<()> {
        if let Some(first) = self.queue.meta.pending(sidx)?.first() {
            let cursor = self.queue.cursor(sidx)?.min(first.seq - 1);
            self.queue.set_cursor(sidx, cursor, t)?;
        }
        self.enqueue(sidx, t)
    }

    /// Match an echo against the latest pending local change of its object.
    ///
    /// On a match the RemoteLink takes the echoed position and every pending
    /// change up to the latest is deleted. Returns `false` when there is no
    /// pending change, the echo is stale, or the positions differ; the echo
    /// then belongs to the buffered-apply path.
    pub fn ack_matching(
        &self,
        sidx: SIndex,
        change: &RemoteChange,
        link: Option<&RemoteLink>,
        t: &mut Trans<'_>,
    ) -> SyncResult<bool> {
        let meta = &self.queue.meta;
        let Some(latest) = meta.latest_for(sidx, change.oid)? else {
            return Ok(false);
        };
        if link.is_some_and(|l| change.lts <= l.remote_version) {
            debug!(sidx = %sidx, oid = ?change.oid, lts = %change.lts, "stale echo");
            return Ok(false);
        }

        let matched = match change.op.target() {
            None => latest.is_delete(),
            Some((parent, name)) => latest.new_parent == parent && latest.new_name == name,
        };
        if !matched {
            debug!(
                sidx = %sidx,
                oid = ?change.oid,
                seq = latest.seq,
                lts = %change.lts,
                "echo does not match latest local change"
            );
            return Ok(false);
        }

        let local_type = self
            .queue
            .tree
            .get(SOID::new(sidx, change.oid))?
            .map(|oa| oa.otype);
        let new_link = RemoteLink::from_echo(change, link, local_type);
        self.queue.links.set(&new_link, t)?;
        t.delete(SUBMITTED_OBJECT_TABLE, &submitted_key(sidx, change.oid));
        let acked = meta.delete_through(sidx, change.oid, latest.seq, t)?;
        debug!(sidx = %sidx, oid = ?change.oid, acked, lts = %change.lts, "local change acknowledged");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::RemoteOp;
    use crate::loopback::LoopbackAuthority;
    use std::time::Duration;
    use trellis_queue::{CoreLock, RetryConfig, TokenConfig, TokenManager};
    use trellis_tree::VersionTracker;
    use trellis_types::{DeviceId, Lts, ObjectType, OID};

    const S: SIndex = SIndex::new(1);

    struct Fixture {
        db: Arc<Database>,
        tree: Arc<ObjectTree>,
        meta: Arc<MetaChangeLog>,
        links: Arc<RemoteLinks>,
        authority: Arc<LoopbackAuthority>,
        submitter: Submitter,
        core: CoreLock,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::in_memory());
        let tree = Arc::new(ObjectTree::new(Arc::clone(&db)));
        let versions = Arc::new(VersionTracker::new(Arc::clone(&db), DeviceId::generate()));
        let stores = Arc::new(Stores::new(Arc::clone(&db), Arc::clone(&tree), versions));
        let meta = Arc::new(MetaChangeLog::new(Arc::clone(&db)));
        let links = Arc::new(RemoteLinks::new(Arc::clone(&db)));
        let authority = Arc::new(LoopbackAuthority::new());
        let queue = Arc::new(SubmitQueue::new(
            Arc::clone(&db),
            Arc::clone(&tree),
            Arc::clone(&stores),
            Arc::clone(&meta),
            Arc::clone(&links),
            authority.clone(),
        ));
        let core = CoreLock::new();
        let ctx = QueueContext {
            db: Arc::clone(&db),
            core: core.clone(),
            tokens: Arc::new(TokenManager::new(&TokenConfig::default())),
            retry: RetryConfig {
                min_interval: Duration::from_millis(10),
                ..RetryConfig::default()
            },
        };
        let submitter = Submitter::new(queue, &ctx);

        let mut t = db.begin().unwrap();
        stores.add(S, None, "home", &mut t).unwrap();
        t.commit().unwrap();

        Fixture {
            db,
            tree,
            meta,
            links,
            authority,
            submitter,
            core,
        }
    }

    /// Create a directory locally and log the change, as the mutator does.
    fn create_dir(f: &Fixture, name: &str) -> OID {
        let mut t = f.db.begin().unwrap();
        let oid = f.tree.create(S, ObjectType::Dir, OID::ROOT, name, &mut t).unwrap();
        f.meta.append(S, oid, OID::ROOT, name, &mut t).unwrap();
        t.commit().unwrap();
        oid
    }

    fn echo(oid: OID, lts: u64, op: RemoteOp) -> RemoteChange {
        RemoteChange {
            sidx: S,
            lts: Lts::new(lts),
            oid,
            op,
        }
    }

    fn ack(f: &Fixture, change: &RemoteChange) -> bool {
        let link = f.links.get(S, change.oid).unwrap();
        let mut t = f.db.begin().unwrap();
        let acked = f.submitter.ack_matching(S, change, link.as_ref(), &mut t).unwrap();
        t.commit().unwrap();
        acked
    }

    // -----------------------------------------------------------------------
    // Ack path
    // -----------------------------------------------------------------------

    #[test]
    fn reports_insert_is_acknowledged() {
        let f = fixture();
        let x = create_dir(&f, "Reports");

        let change = echo(
            x,
            1,
            RemoteOp::Insert {
                parent: OID::ROOT,
                name: "Reports".into(),
                otype: ObjectType::Dir,
                migrant: None,
            },
        );
        assert!(ack(&f, &change));

        assert!(f.meta.pending(S).unwrap().is_empty());
        let link = f.links.get(S, x).unwrap().unwrap();
        assert_eq!((link.parent, link.name.as_str()), (OID::ROOT, "Reports"));
        assert_eq!(link.remote_version, Lts::new(1));
    }

    #[test]
    fn no_pending_change_is_not_ours() {
        let f = fixture();
        let change = echo(
            OID::generate(),
            1,
            RemoteOp::Move {
                parent: OID::ROOT,
                name: "x".into(),
            },
        );
        assert!(!ack(&f, &change));
    }

    #[test]
    fn mismatch_leaves_pending_changes() {
        let f = fixture();
        let x = create_dir(&f, "Reports");
        let change = echo(
            x,
            1,
            RemoteOp::Insert {
                parent: OID::ROOT,
                name: "Other".into(),
                otype: ObjectType::Dir,
                migrant: None,
            },
        );
        assert!(!ack(&f, &change));
        assert_eq!(f.meta.pending(S).unwrap().len(), 1);
        assert_eq!(f.links.get(S, x).unwrap(), None);
    }

    #[test]
    fn only_the_latest_change_matches() {
        let f = fixture();
        let x = create_dir(&f, "a");
        let mut t = f.db.begin().unwrap();
        f.tree.move_object(SOID::new(S, x), OID::ROOT, "b", &mut t).unwrap();
        f.meta.append(S, x, OID::ROOT, "b", &mut t).unwrap();
        t.commit().unwrap();

        let first = echo(
            x,
            1,
            RemoteOp::Insert {
                parent: OID::ROOT,
                name: "a".into(),
                otype: ObjectType::Dir,
                migrant: None,
            },
        );
        assert!(!ack(&f, &first));

        let second = echo(
            x,
            2,
            RemoteOp::Move {
                parent: OID::ROOT,
                name: "b".into(),
            },
        );
        assert!(ack(&f, &second));
        assert!(f.meta.pending(S).unwrap().is_empty());
    }

    #[test]
    fn removal_matches_a_pending_delete() {
        let f = fixture();
        let x = create_dir(&f, "gone");
        let mut t = f.db.begin().unwrap();
        f.meta.append(S, x, OID::TRASH, &x.to_hex(), &mut t).unwrap();
        t.commit().unwrap();

        assert!(ack(&f, &echo(x, 3, RemoteOp::Remove { parent: OID::ROOT })));
        assert!(f.links.get(S, x).unwrap().unwrap().is_removed());
    }

    #[test]
    fn stale_echo_is_not_acknowledged() {
        let f = fixture();
        let x = create_dir(&f, "a");
        let mut t = f.db.begin().unwrap();
        f.links
            .set(
                &RemoteLink {
                    sidx: S,
                    oid: x,
                    parent: OID::ROOT,
                    name: "a".into(),
                    otype: ObjectType::Dir,
                    remote_version: Lts::new(5),
                },
                &mut t,
            )
            .unwrap();
        t.commit().unwrap();
        let old = echo(
            x,
            4,
            RemoteOp::Move {
                parent: OID::ROOT,
                name: "a".into(),
            },
        );
        assert!(!ack(&f, &old));
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    #[test]
    fn derive_insert_then_move_then_remove() {
        let f = fixture();
        let x = create_dir(&f, "a");
        let mut t = f.db.begin().unwrap();
        let rename = f.meta.append(S, x, OID::ROOT, "b", &mut t).unwrap();
        let delete = f.meta.append(S, x, OID::TRASH, &x.to_hex(), &mut t).unwrap();
        t.commit().unwrap();
        let first = f.meta.pending(S).unwrap().remove(0);

        let queue = f.submitter.queue();
        assert!(matches!(queue.derive(&first).unwrap(), SubmittedChange::Insert { .. }));
        assert!(matches!(queue.derive(&rename).unwrap(), SubmittedChange::Move { .. }));
        assert!(matches!(queue.derive(&delete).unwrap(), SubmittedChange::Remove { .. }));
    }

    #[tokio::test]
    async fn submits_in_order_and_advances_cursor() {
        let f = fixture();
        let a = create_dir(&f, "a");
        let b = create_dir(&f, "b");
        {
            let _core = f.core.lock().await;
            let mut t = f.db.begin().unwrap();
            f.submitter.enqueue(S, &mut t).unwrap();
            t.commit().unwrap();
        }
        f.submitter.driver().wait_idle().await;

        let log = f.authority.log(S);
        assert_eq!(log.iter().map(|c| c.oid).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(f.submitter.queue().cursor(S).unwrap(), 2);
        // Rows stay until acknowledged.
        assert_eq!(f.meta.pending(S).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rejected_change_is_dropped() {
        let f = fixture();
        let x = create_dir(&f, "a");
        // Linked, so it goes out as a move of an object the authority never saw.
        let mut t = f.db.begin().unwrap();
        f.links
            .set(
                &RemoteLink {
                    sidx: S,
                    oid: x,
                    parent: OID::ROOT,
                    name: "a".into(),
                    otype: ObjectType::Dir,
                    remote_version: Lts::new(1),
                },
                &mut t,
            )
            .unwrap();
        t.commit().unwrap();

        submit(&f).await;
        assert!(f.meta.pending(S).unwrap().is_empty());
        assert!(f.authority.log(S).is_empty());
        assert_eq!(f.submitter.queue().cursor(S).unwrap(), 1);
        assert!(!f.submitter.queue().is_submitted(S, x));
    }

    async fn submit(f: &Fixture) {
        {
            let _core = f.core.lock().await;
            let mut t = f.db.begin().unwrap();
            f.submitter.enqueue(S, &mut t).unwrap();
            t.commit().unwrap();
        }
        f.submitter.driver().wait_idle().await;
    }

    /// What the daemon does for every store when it starts.
    async fn resubmit(f: &Fixture) {
        {
            let _core = f.core.lock().await;
            let mut t = f.db.begin().unwrap();
            f.submitter.submit_pending(S, &mut t).unwrap();
            t.commit().unwrap();
        }
        f.submitter.driver().wait_idle().await;
    }

    /// Log a change without requesting submission, as a crash right after
    /// the mutation commits leaves it.
    fn log_only(f: &Fixture, oid: OID, parent: OID, name: &str) {
        let mut t = f.db.begin().unwrap();
        if parent != OID::TRASH {
            f.tree.move_object(SOID::new(S, oid), parent, name, &mut t).unwrap();
        }
        f.meta.append(S, oid, parent, name, &mut t).unwrap();
        t.commit().unwrap();
    }

    fn moved_to(name: &str) -> RemoteOp {
        RemoteOp::Move {
            parent: OID::ROOT,
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn submit_pending_resends_unacknowledged() {
        let f = fixture();
        let x = create_dir(&f, "a");
        submit(&f).await;
        assert!(f.submitter.queue().is_submitted(S, x));
        resubmit(&f).await;

        // The authority already placed the object, so the resend is a move.
        let log = f.authority.log(S);
        assert_eq!(log.len(), 2);
        assert!(matches!(log[0].op, RemoteOp::Insert { .. }));
        assert_eq!(log[1].op, moved_to("a"));
        assert_eq!(f.meta.pending(S).unwrap().len(), 1);

        assert!(ack(&f, &log[0]));
        assert!(f.meta.pending(S).unwrap().is_empty());
        assert!(!f.submitter.queue().is_submitted(S, x));
        assert!(!ack(&f, &log[1]));
    }

    #[tokio::test]
    async fn resubmission_keeps_an_unsent_rename() {
        let f = fixture();
        let x = create_dir(&f, "a");
        submit(&f).await;
        log_only(&f, x, OID::ROOT, "b");
        resubmit(&f).await;

        let log = f.authority.log(S);
        let ops: Vec<_> = log.iter().map(|c| c.op.clone()).collect();
        assert!(matches!(ops[0], RemoteOp::Insert { .. }));
        assert_eq!(ops[1..], [moved_to("a"), moved_to("b")]);
        assert_eq!(f.meta.pending(S).unwrap().len(), 2);
        assert_eq!(f.submitter.queue().cursor(S).unwrap(), 2);

        // Only the echo of the rename acknowledges.
        assert!(!ack(&f, &log[0]));
        assert!(!ack(&f, &log[1]));
        assert!(ack(&f, &log[2]));
        assert!(f.meta.pending(S).unwrap().is_empty());
        assert_eq!(f.links.get(S, x).unwrap().unwrap().name, "b");
        assert_eq!(f.tree.child(S, OID::ROOT, "b").unwrap(), Some(x));
    }

    #[tokio::test]
    async fn insert_whose_receipt_was_lost_counts_as_delivered() {
        let f = fixture();
        let x = create_dir(&f, "a");
        // Accepted by the authority, but the cursor never moved past it.
        f.authority.inject(
            S,
            x,
            RemoteOp::Insert {
                parent: OID::ROOT,
                name: "a".into(),
                otype: ObjectType::Dir,
                migrant: None,
            },
        );
        log_only(&f, x, OID::ROOT, "b");
        resubmit(&f).await;

        let log = f.authority.log(S);
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].op, moved_to("b"));
        assert_eq!(f.meta.pending(S).unwrap().len(), 2);
        assert_eq!(f.submitter.queue().cursor(S).unwrap(), 2);

        assert!(!ack(&f, &log[0]));
        assert!(ack(&f, &log[1]));
        assert!(f.meta.pending(S).unwrap().is_empty());
    }

    #[tokio::test]
    async fn resent_removal_is_acknowledged_by_its_echo() {
        let f = fixture();
        let x = create_dir(&f, "a");
        log_only(&f, x, OID::TRASH, &x.to_hex());
        submit(&f).await;
        assert_eq!(f.authority.log(S).len(), 2);
        resubmit(&f).await;

        // Nothing new reaches the authority; the removal stays pending.
        let log = f.authority.log(S);
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].op, RemoteOp::Remove { parent: OID::ROOT });
        let pending = f.meta.pending(S).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_delete());

        assert!(ack(&f, &log[1]));
        assert!(f.links.get(S, x).unwrap().unwrap().is_removed());
        assert!(f.meta.pending(S).unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_deletion_forgets_delivered_objects() {
        let f = fixture();
        let x = create_dir(&f, "a");
        submit(&f).await;
        assert!(f.submitter.queue().is_submitted(S, x));

        let mut t = f.db.begin().unwrap();
        f.submitter.queue().delete_store(S, &mut t).unwrap();
        t.commit().unwrap();
        assert!(!f.submitter.queue().is_submitted(S, x));
        assert_eq!(f.submitter.queue().cursor(S).unwrap(), 0);
    }
}
