//! Metadata synchronization for Trellis.
//!
//! Local mutations go through [`LocalMutator`], which logs a [`MetaChange`]
//! per mutation. The [`Submitter`] hands pending changes to the
//! [`RemoteAuthority`] in sequence order. The authority orders changes from
//! every device and echoes them back; [`ChangeFetcher`] feeds each echo to
//! the [`EchoRouter`], which sends it down exactly one of two paths:
//!
//! - **ack**: the echo matches the latest pending local change of its
//!   object; the change is acknowledged and the tree is left alone;
//! - **buffered apply**: anything else is recorded in the object's
//!   [`RemoteLink`] and queued in the [`RemoteChangeBuffer`] until its merge
//!   boundary passes, then applied by [`BufferedApplier`] against the final
//!   position.

pub mod applier;
pub mod buffer;
pub mod change;
pub mod conflict;
pub mod error;
pub mod fetcher;
pub mod loopback;
pub mod meta_change;
pub mod mutator;
pub mod remote_link;
pub mod router;
pub mod submitter;
pub mod transport;

pub use applier::{BufferedApplier, ReleaseReport};
pub use buffer::{BufferedChange, RemoteChangeBuffer};
pub use change::{MetaChange, RemoteChange, RemoteOp, SubmitReceipt, SubmittedChange};
pub use conflict::{
    conflict_name, ConflictPolicy, DefaultConflictPolicy, NameConflict, NameResolution,
    PendingResolution,
};
pub use error::{SyncError, SyncResult};
pub use fetcher::ChangeFetcher;
pub use loopback::LoopbackAuthority;
pub use meta_change::MetaChangeLog;
pub use mutator::LocalMutator;
pub use remote_link::{RemoteLink, RemoteLinks};
pub use router::{EchoOutcome, EchoRouter};
pub use submitter::{SubmitDriver, SubmitQueue, Submitter};
pub use transport::{ChangeStream, RemoteAuthority};

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;
    use std::time::Duration;

    use trellis_db::Database;
    use trellis_queue::{CoreLock, QueueContext, RetryConfig, TokenConfig, TokenManager};
    use trellis_tree::{MemoryStorage, ObjectTree, Stores, VersionTracker};
    use trellis_types::{DeviceId, Lts, ObjectType, SIndex, OID};

    use super::*;

    pub const S: SIndex = SIndex::new(1);

    pub fn insert(parent: OID, name: &str, otype: ObjectType) -> RemoteOp {
        RemoteOp::Insert {
            parent,
            name: name.into(),
            otype,
            migrant: None,
        }
    }

    /// Every sync component over one in-memory database, with store `S`
    /// registered.
    pub struct Engine {
        pub db: Arc<Database>,
        pub tree: Arc<ObjectTree>,
        pub versions: Arc<VersionTracker>,
        pub stores: Arc<Stores>,
        pub meta: Arc<MetaChangeLog>,
        pub links: Arc<RemoteLinks>,
        pub buffer: Arc<RemoteChangeBuffer>,
        pub authority: Arc<LoopbackAuthority>,
        pub physical: MemoryStorage,
        pub submitter: Arc<Submitter>,
        pub router: Arc<EchoRouter>,
        pub mutator: Arc<LocalMutator>,
        pub applier: Arc<BufferedApplier>,
        pub core: CoreLock,
        pub retry: RetryConfig,
    }

    impl Engine {
        pub fn new() -> Self {
            Self::with_policy(Arc::new(DefaultConflictPolicy))
        }

        pub fn with_policy(policy: Arc<dyn ConflictPolicy>) -> Self {
            let db = Arc::new(Database::in_memory());
            let tree = Arc::new(ObjectTree::new(Arc::clone(&db)));
            let versions = Arc::new(VersionTracker::new(Arc::clone(&db), DeviceId::generate()));
            let stores = Arc::new(Stores::new(
                Arc::clone(&db),
                Arc::clone(&tree),
                Arc::clone(&versions),
            ));
            let meta = Arc::new(MetaChangeLog::new(Arc::clone(&db)));
            let links = Arc::new(RemoteLinks::new(Arc::clone(&db)));
            let buffer = Arc::new(RemoteChangeBuffer::new(Arc::clone(&db)));
            let authority = Arc::new(LoopbackAuthority::new());
            let physical = MemoryStorage::new();
            let core = CoreLock::new();
            let retry = RetryConfig {
                min_interval: Duration::from_millis(5),
                max_interval: Duration::from_millis(50),
                max_attempts: None,
            };
            let ctx = QueueContext {
                db: Arc::clone(&db),
                core: core.clone(),
                tokens: Arc::new(TokenManager::new(&TokenConfig::default())),
                retry: retry.clone(),
            };

            let queue = Arc::new(SubmitQueue::new(
                Arc::clone(&db),
                Arc::clone(&tree),
                Arc::clone(&stores),
                Arc::clone(&meta),
                Arc::clone(&links),
                authority.clone(),
            ));
            let submitter = Arc::new(Submitter::new(Arc::clone(&queue), &ctx));
            let router = Arc::new(EchoRouter::new(
                Arc::clone(&db),
                Arc::clone(&tree),
                Arc::clone(&links),
                Arc::clone(&buffer),
                Arc::clone(&submitter),
            ));
            let mutator = Arc::new(LocalMutator::new(
                Arc::clone(&tree),
                Arc::clone(&versions),
                Arc::clone(&meta),
                Arc::new(physical.clone()),
                Arc::clone(&submitter),
            ));
            let applier = Arc::new(
                BufferedApplier::new(
                    Arc::clone(&db),
                    Arc::clone(&tree),
                    Arc::clone(&versions),
                    Arc::clone(&links),
                    Arc::clone(&meta),
                    Arc::clone(&buffer),
                    Arc::clone(&mutator),
                )
                .with_policy(policy),
            );

            stores.register(meta.clone());
            stores.register(links.clone());
            stores.register(buffer.clone());
            stores.register(queue);
            stores.register(router.clone());

            let mut t = db.begin().unwrap();
            stores.add(S, None, "home", &mut t).unwrap();
            t.commit().unwrap();

            Self {
                db,
                tree,
                versions,
                stores,
                meta,
                links,
                buffer,
                authority,
                physical,
                submitter,
                router,
                mutator,
                applier,
                core,
                retry,
            }
        }

        /// Hand an echo to the router.
        pub fn route(&self, oid: OID, lts: u64, op: RemoteOp) -> EchoOutcome {
            let change = RemoteChange {
                sidx: S,
                lts: Lts::new(lts),
                oid,
                op,
            };
            self.router.handle(&change).unwrap()
        }

        pub fn fetcher(&self, sidx: SIndex) -> ChangeFetcher {
            ChangeFetcher::new(
                sidx,
                self.authority.clone(),
                Arc::clone(&self.router),
                Arc::clone(&self.applier),
                self.core.clone(),
                self.retry.clone(),
            )
        }
    }
}
