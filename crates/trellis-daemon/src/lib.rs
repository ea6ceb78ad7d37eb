//! The Trellis daemon.
//!
//! [`Daemon::open`] recovers the database from the journal under the data
//! directory and builds the local layers: tree, versions, store registry,
//! change log, links, remote change buffer, and collector sequence.
//! [`Daemon::start`] connects them to a remote authority: it resubmits
//! every unacknowledged change and follows each store's change stream.

pub mod config;
pub mod error;

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use trellis_collector::{
    CollectorIterator, CollectorSequence, FixedQuota, KnownVersionFilter, NoQuota, QuotaCheck,
};
use trellis_db::{Database, Key};
use trellis_queue::{CoreLock, QueueContext, RetryConfig, TokenManager};
use trellis_sync::{
    BufferedApplier, ChangeFetcher, EchoRouter, LocalMutator, MetaChangeLog, RemoteAuthority,
    RemoteChangeBuffer, RemoteLinks, SubmitQueue, Submitter,
};
use trellis_tree::{NullStorage, ObjectTree, PhysicalStorage, StoreInfo, Stores, VersionTracker};
use trellis_types::{DeviceId, SIndex};

pub use config::{DaemonConfig, RetrySettings};
pub use error::{DaemonError, DaemonResult};

/// `"device_id" -> DeviceId`
pub const DAEMON_TABLE: &str = "daemon";

fn device_key() -> Vec<u8> {
    Key::new().str("device_id").build()
}

/// Components that only exist once the daemon talks to an authority.
struct Engine {
    submitter: Arc<Submitter>,
    router: Arc<EchoRouter>,
    mutator: Arc<LocalMutator>,
    applier: Arc<BufferedApplier>,
    authority: Arc<dyn RemoteAuthority>,
    fetchers: Vec<(SIndex, JoinHandle<()>)>,
}

pub struct Daemon {
    config: DaemonConfig,
    db: Arc<Database>,
    tree: Arc<ObjectTree>,
    versions: Arc<VersionTracker>,
    stores: Arc<Stores>,
    meta: Arc<MetaChangeLog>,
    links: Arc<RemoteLinks>,
    buffer: Arc<RemoteChangeBuffer>,
    collector: Arc<CollectorSequence>,
    quota: Arc<dyn QuotaCheck>,
    physical: Arc<dyn PhysicalStorage>,
    ctx: QueueContext,
    engine: Option<Engine>,
}

impl Daemon {
    /// Open the daemon's database and build the local components. A
    /// database without stores gets a root store.
    pub fn open(config: DaemonConfig) -> DaemonResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db = Arc::new(Database::open(&config.journal_path(), config.journal.clone())?);
        let device = Self::device_id(&db, &config)?;

        let tree = Arc::new(ObjectTree::new(Arc::clone(&db)));
        let versions = Arc::new(VersionTracker::new(Arc::clone(&db), device));
        let stores = Arc::new(Stores::new(
            Arc::clone(&db),
            Arc::clone(&tree),
            Arc::clone(&versions),
        ));
        let meta = Arc::new(MetaChangeLog::new(Arc::clone(&db)));
        let links = Arc::new(RemoteLinks::new(Arc::clone(&db)));
        let buffer = Arc::new(RemoteChangeBuffer::new(Arc::clone(&db)));
        let collector = Arc::new(CollectorSequence::new(Arc::clone(&db)));
        stores.register(meta.clone());
        stores.register(links.clone());
        stores.register(buffer.clone());
        stores.register(collector.clone());

        if stores.list()?.is_empty() {
            let mut t = db.begin()?;
            stores.allocate(None, "root", &mut t)?;
            t.commit()?;
        }

        let quota: Arc<dyn QuotaCheck> = match config.quota_bytes {
            Some(limit) => {
                let quota = FixedQuota::new(limit);
                for store in stores.list()? {
                    quota.refresh(&tree, store.sidx)?;
                }
                Arc::new(quota)
            }
            None => Arc::new(NoQuota),
        };

        let ctx = QueueContext {
            db: Arc::clone(&db),
            core: CoreLock::new(),
            tokens: Arc::new(TokenManager::new(&config.tokens)),
            retry: RetryConfig::from(&config.retry),
        };

        info!(
            data_dir = %config.data_dir.display(),
            device = %device,
            stores = stores.list()?.len(),
            "daemon opened"
        );
        Ok(Self {
            config,
            db,
            tree,
            versions,
            stores,
            meta,
            links,
            buffer,
            collector,
            quota,
            physical: Arc::new(NullStorage),
            ctx,
            engine: None,
        })
    }

    /// The configured device id, else the persisted one, else a fresh one
    /// that is persisted.
    fn device_id(db: &Database, config: &DaemonConfig) -> DaemonResult<DeviceId> {
        if let Some(hex) = &config.device_id {
            return Ok(DeviceId::from_hex(hex)?);
        }
        if let Some(device) = db.get_value::<DeviceId>(DAEMON_TABLE, &device_key())? {
            return Ok(device);
        }
        let device = DeviceId::generate();
        let mut t = db.begin()?;
        t.put_value(DAEMON_TABLE, device_key(), &device)?;
        t.commit()?;
        info!(device = %device, "device identity created");
        Ok(device)
    }

    /// Replace the storage local mutations are mirrored to. Takes effect
    /// at [`start`](Self::start).
    pub fn with_physical(mut self, physical: Arc<dyn PhysicalStorage>) -> Self {
        self.physical = physical;
        self
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn device(&self) -> DeviceId {
        self.versions.device()
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn tree(&self) -> &Arc<ObjectTree> {
        &self.tree
    }

    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    pub fn core(&self) -> &CoreLock {
        &self.ctx.core
    }

    pub fn collector(&self) -> &Arc<CollectorSequence> {
        &self.collector
    }

    pub fn is_started(&self) -> bool {
        self.engine.is_some()
    }

    /// The mutator for local changes, once started.
    pub fn mutator(&self) -> Option<&Arc<LocalMutator>> {
        self.engine.as_ref().map(|e| &e.mutator)
    }

    /// Walk a store's collector sequence from the start.
    pub fn collect(&self, sidx: SIndex) -> CollectorIterator {
        CollectorIterator::new(
            sidx,
            Arc::clone(&self.collector),
            Arc::clone(&self.tree),
            Arc::new(KnownVersionFilter::new(
                Arc::clone(&self.tree),
                Arc::clone(&self.versions),
            )),
            Arc::clone(&self.quota),
        )
    }

    /// Connect to an authority: resubmit every unacknowledged change and
    /// follow the change stream of every store.
    pub async fn start(&mut self, authority: Arc<dyn RemoteAuthority>) -> DaemonResult<()> {
        if self.engine.is_some() {
            return Err(DaemonError::AlreadyStarted);
        }
        let db = &self.db;

        let queue = Arc::new(SubmitQueue::new(
            Arc::clone(db),
            Arc::clone(&self.tree),
            Arc::clone(&self.stores),
            Arc::clone(&self.meta),
            Arc::clone(&self.links),
            Arc::clone(&authority),
        ));
        let submitter = Arc::new(Submitter::new(Arc::clone(&queue), &self.ctx));
        let router = Arc::new(EchoRouter::new(
            Arc::clone(db),
            Arc::clone(&self.tree),
            Arc::clone(&self.links),
            Arc::clone(&self.buffer),
            Arc::clone(&submitter),
        ));
        let mutator = Arc::new(LocalMutator::new(
            Arc::clone(&self.tree),
            Arc::clone(&self.versions),
            Arc::clone(&self.meta),
            Arc::clone(&self.physical),
            Arc::clone(&submitter),
        ));
        let applier = Arc::new(BufferedApplier::new(
            Arc::clone(db),
            Arc::clone(&self.tree),
            Arc::clone(&self.versions),
            Arc::clone(&self.links),
            Arc::clone(&self.meta),
            Arc::clone(&self.buffer),
            Arc::clone(&mutator),
        ));
        self.stores.register(queue);
        self.stores.register(router.clone());

        let stores = {
            let _core = self.ctx.core.lock().await;
            let stores = self.stores.list()?;
            let mut t = db.begin()?;
            for store in &stores {
                submitter.submit_pending(store.sidx, &mut t)?;
            }
            t.commit()?;
            stores
        };

        let mut engine = Engine {
            submitter,
            router,
            mutator,
            applier,
            authority,
            fetchers: Vec::new(),
        };
        for store in &stores {
            self.spawn_fetcher(&mut engine, store.sidx);
        }
        info!(device = %self.device(), stores = stores.len(), "daemon started");
        self.engine = Some(engine);
        Ok(())
    }

    fn spawn_fetcher(&self, engine: &mut Engine, sidx: SIndex) {
        let fetcher = ChangeFetcher::new(
            sidx,
            Arc::clone(&engine.authority),
            Arc::clone(&engine.router),
            Arc::clone(&engine.applier),
            self.ctx.core.clone(),
            self.ctx.retry.clone(),
        );
        let task = tokio::spawn(async move {
            if let Err(e) = fetcher.run().await {
                error!(sidx = %sidx, error = %e, "change fetcher stopped");
            }
        });
        engine.fetchers.push((sidx, task));
    }

    /// Add a store under the next free index. A started daemon follows its
    /// change stream at once.
    pub async fn add_store(&mut self, parent: Option<SIndex>, name: &str) -> DaemonResult<StoreInfo> {
        let info = {
            let _core = self.ctx.core.lock().await;
            let mut t = self.db.begin()?;
            let info = self.stores.allocate(parent, name, &mut t)?;
            t.commit()?;
            info
        };
        if let Some(mut engine) = self.engine.take() {
            self.spawn_fetcher(&mut engine, info.sidx);
            self.engine = Some(engine);
        }
        Ok(info)
    }

    /// Stop following the authority, let in-flight submissions finish, and
    /// compact the journal.
    pub async fn shutdown(&mut self) -> DaemonResult<()> {
        if let Some(engine) = self.engine.take() {
            for (sidx, task) in &engine.fetchers {
                task.abort();
                debug!(sidx = %sidx, "change fetcher aborted");
            }
            engine.submitter.driver().wait_idle().await;
        }
        let _core = self.ctx.core.lock().await;
        self.db.compact()?;
        info!(device = %self.device(), "daemon stopped");
        Ok(())
    }

    /// Snapshot of every store's sync state, taken under the core.
    pub async fn dump(&self) -> DaemonResult<DaemonDump> {
        let _core = self.ctx.core.lock().await;
        let mut stores = Vec::new();
        for store in self.stores.list()? {
            let sidx = store.sidx;
            let (submitted_through, remote_cursor) = match &self.engine {
                Some(engine) => (
                    Some(engine.submitter.queue().cursor(sidx)?),
                    Some(engine.router.cursor(sidx)?.get()),
                ),
                None => (None, None),
            };
            stores.push(StoreDump {
                sidx: sidx.get(),
                name: store.name,
                parent: store.parent.map(|p| p.get()),
                objects: self.tree.list(sidx)?.len(),
                pending_changes: self.meta.pending(sidx)?.len(),
                buffered_changes: self.buffer.len(sidx),
                collector_entries: self.collector.len(sidx),
                submitted_through,
                remote_cursor,
            });
        }
        Ok(DaemonDump {
            device: self.device().to_hex(),
            started: self.is_started(),
            stores,
        })
    }
}

/// Diagnostic snapshot returned by [`Daemon::dump`].
#[derive(Clone, Debug, Serialize)]
pub struct DaemonDump {
    pub device: String,
    pub started: bool,
    pub stores: Vec<StoreDump>,
}

impl DaemonDump {
    pub fn store(&self, sidx: SIndex) -> Option<&StoreDump> {
        self.stores.iter().find(|s| s.sidx == sidx.get())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StoreDump {
    pub sidx: u32,
    pub name: String,
    pub parent: Option<u32>,
    /// Tree rows, root and trash included.
    pub objects: usize,
    pub pending_changes: usize,
    pub buffered_changes: usize,
    pub collector_entries: usize,
    /// Sequence number of the last change handed to the authority.
    pub submitted_through: Option<u64>,
    /// Last remote change received.
    pub remote_cursor: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use trellis_sync::{LoopbackAuthority, RemoteOp};
    use trellis_types::{ComponentKind, ObjectType, Version, OID, SOID};

    const ROOT_STORE: SIndex = SIndex::new(1);

    fn config(dir: &Path) -> DaemonConfig {
        DaemonConfig {
            data_dir: dir.to_path_buf(),
            retry: RetrySettings {
                min_interval_ms: 5,
                max_interval_ms: 50,
                max_attempts: None,
            },
            ..DaemonConfig::default()
        }
    }

    async fn settle(daemon: &Daemon, done: impl Fn(&StoreDump) -> bool) -> StoreDump {
        for _ in 0..500 {
            let dump = daemon.dump().await.unwrap();
            let store = dump.store(ROOT_STORE).unwrap();
            if done(store) {
                return store.clone();
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("daemon did not settle");
    }

    // -----------------------------------------------------------------------
    // Open
    // -----------------------------------------------------------------------

    #[test]
    fn open_creates_root_store_and_keeps_device() {
        let dir = tempfile::tempdir().unwrap();
        let device = {
            let daemon = Daemon::open(config(dir.path())).unwrap();
            let stores = daemon.stores().list().unwrap();
            assert_eq!(stores.len(), 1);
            assert_eq!((stores[0].sidx, stores[0].name.as_str()), (ROOT_STORE, "root"));
            daemon.device()
        };

        let daemon = Daemon::open(config(dir.path())).unwrap();
        assert_eq!(daemon.device(), device);
        assert_eq!(daemon.stores().list().unwrap().len(), 1);
    }

    #[test]
    fn configured_device_id_wins() {
        let dir = tempfile::tempdir().unwrap();
        let device = DeviceId::generate();
        let daemon = Daemon::open(DaemonConfig {
            device_id: Some(device.to_hex()),
            ..config(dir.path())
        })
        .unwrap();
        assert_eq!(daemon.device(), device);

        let bad = Daemon::open(DaemonConfig {
            device_id: Some("xyz".into()),
            ..config(dir.path())
        });
        assert!(matches!(bad, Err(DaemonError::DeviceId(_))));
    }

    #[test]
    fn collection_respects_the_quota() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::open(DaemonConfig {
            quota_bytes: Some(0),
            ..config(dir.path())
        })
        .unwrap();
        let oid = OID::generate();
        let mut t = daemon.db().begin().unwrap();
        for cid in [ComponentKind::Meta, ComponentKind::Content] {
            daemon
                .collector()
                .add(ROOT_STORE, oid, cid, &Version::new(), &mut t)
                .unwrap();
        }
        t.commit().unwrap();

        // An empty store is at, not over, its quota.
        let got: Vec<_> = daemon.collect(ROOT_STORE).map(|r| r.unwrap()).collect();
        assert_eq!(got, vec![(oid, ComponentKind::Meta), (oid, ComponentKind::Content)]);
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn local_change_is_acknowledged_and_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let authority = Arc::new(LoopbackAuthority::new());
        let mut daemon = Daemon::open(config(dir.path())).unwrap();
        assert!(daemon.mutator().is_none());
        daemon.start(authority.clone()).await.unwrap();
        assert!(matches!(
            daemon.start(authority.clone()).await,
            Err(DaemonError::AlreadyStarted)
        ));

        let docs = {
            let _core = daemon.core().lock().await;
            let mut t = daemon.db().begin().unwrap();
            let docs = daemon
                .mutator()
                .unwrap()
                .create(ROOT_STORE, ObjectType::Dir, OID::ROOT, "Docs", &mut t)
                .unwrap();
            t.commit().unwrap();
            docs
        };

        let store = settle(&daemon, |s| s.pending_changes == 0 && s.remote_cursor == Some(1)).await;
        assert!(store.submitted_through.is_some());
        assert_eq!(store.buffered_changes, 0);
        daemon.shutdown().await.unwrap();
        drop(daemon);

        let reopened = Daemon::open(config(dir.path())).unwrap();
        assert_eq!(
            reopened.tree().child(ROOT_STORE, OID::ROOT, "Docs").unwrap(),
            Some(docs)
        );
        assert!(!reopened.dump().await.unwrap().started);
    }

    #[tokio::test]
    async fn remote_changes_reach_a_store_added_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let authority = Arc::new(LoopbackAuthority::new());
        let mut daemon = Daemon::open(config(dir.path())).unwrap();
        daemon.start(authority.clone()).await.unwrap();
        let info = daemon.add_store(Some(ROOT_STORE), "shared").await.unwrap();

        let photos = OID::generate();
        authority.inject(
            info.sidx,
            photos,
            RemoteOp::Insert {
                parent: OID::ROOT,
                name: "Photos".into(),
                otype: ObjectType::Dir,
                migrant: None,
            },
        );

        for _ in 0..500 {
            let found = {
                let _core = daemon.core().lock().await;
                daemon.tree().exists(SOID::new(info.sidx, photos))
            };
            if found {
                let dump = daemon.dump().await.unwrap();
                let store = dump.store(info.sidx).unwrap();
                assert_eq!(store.parent, Some(ROOT_STORE.get()));
                assert_eq!(store.remote_cursor, Some(1));
                daemon.shutdown().await.unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("remote insert never applied");
    }
}
