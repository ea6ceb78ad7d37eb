use std::sync::Arc;

use tracing::{debug, info};

use trellis_queue::{CoreLock, ExponentialRetry, QueueError, RetryConfig};
use trellis_types::SIndex;

use crate::applier::BufferedApplier;
use crate::change::RemoteChange;
use crate::error::{SyncError, SyncResult};
use crate::router::EchoRouter;
use crate::transport::RemoteAuthority;

/// Follows one store's change stream.
///
/// Each change is routed under the core. Whenever the stream is momentarily
/// drained, the buffer is released up to the last change received: the log
/// is complete up to that point, so buffered entries see final positions.
pub struct ChangeFetcher {
    sidx: SIndex,
    authority: Arc<dyn RemoteAuthority>,
    router: Arc<EchoRouter>,
    applier: Arc<BufferedApplier>,
    core: CoreLock,
    retry: ExponentialRetry,
}

impl ChangeFetcher {
    pub fn new(
        sidx: SIndex,
        authority: Arc<dyn RemoteAuthority>,
        router: Arc<EchoRouter>,
        applier: Arc<BufferedApplier>,
        core: CoreLock,
        retry: RetryConfig,
    ) -> Self {
        Self {
            sidx,
            authority,
            router,
            applier,
            core,
            retry: ExponentialRetry::new(retry),
        }
    }

    pub fn sidx(&self) -> SIndex {
        self.sidx
    }

    /// Follow the stream forever, resubscribing when it ends. Returns only
    /// on a failure excluded from retry.
    pub async fn run(&self) -> SyncResult<()> {
        let name = format!("fetch {}", self.sidx);
        loop {
            self.retry
                .run(
                    &name,
                    || async { self.fetch_once().await.map_err(QueueError::from) },
                    |_| false,
                )
                .await?;
            debug!(sidx = %self.sidx, "change stream ended; resubscribing");
        }
    }

    /// Subscribe from the last change received and consume the stream until
    /// it ends. Returns the number of changes received.
    ///
    /// A stream that ends without delivering anything is a transport
    /// failure.
    pub async fn fetch_once(&self) -> SyncResult<usize> {
        let since = {
            let _core = self.core.lock().await;
            self.router.cursor(self.sidx)?
        };
        let mut stream = self.authority.subscribe_changes(self.sidx, since).await?;
        info!(sidx = %self.sidx, since = %since, "subscribed to remote changes");

        let mut received = 0;
        while let Some(first) = stream.next().await {
            let _core = self.core.lock().await;
            self.route(&first)?;
            received += 1;
            while let Some(change) = stream.try_next() {
                self.route(&change)?;
                received += 1;
            }
            let until = self.router.cursor(self.sidx)?;
            self.applier.release(self.sidx, until)?;
        }

        if received == 0 {
            return Err(SyncError::Transport(format!(
                "change stream of {} closed",
                self.sidx
            )));
        }
        Ok(received)
    }

    fn route(&self, change: &RemoteChange) -> SyncResult<()> {
        let outcome = self.router.handle(change)?;
        debug!(sidx = %change.sidx, lts = %change.lts, oid = ?change.oid, ?outcome, "remote change routed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{insert, Engine, S};
    use crate::transport::ChangeStream;
    use async_trait::async_trait;
    use std::future::Future;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use trellis_types::{Lts, ObjectType, OID, SOID};

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..500 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn local_change_round_trips_through_the_authority() {
        let e = Arc::new(Engine::new());
        let fetcher = Arc::new(e.fetcher(S));
        let task = tokio::spawn({
            let fetcher = Arc::clone(&fetcher);
            async move { fetcher.run().await }
        });

        let reports = {
            let _core = e.core.lock().await;
            let mut t = e.db.begin().unwrap();
            let oid = e
                .mutator
                .create(S, ObjectType::Dir, OID::ROOT, "Reports", &mut t)
                .unwrap();
            t.commit().unwrap();
            oid
        };

        eventually(|| {
            let e = Arc::clone(&e);
            async move {
                let _core = e.core.lock().await;
                e.meta.pending(S).unwrap().is_empty()
            }
        })
        .await;

        let link = e.links.get(S, reports).unwrap().unwrap();
        assert_eq!((link.parent, link.name.as_str()), (OID::ROOT, "Reports"));
        assert!(!e.buffer.is_buffered(SOID::new(S, reports)));
        task.abort();
    }

    #[tokio::test]
    async fn remote_changes_are_applied_when_drained() {
        let e = Arc::new(Engine::new());
        let shared = OID::generate();
        e.authority.inject(S, shared, insert(OID::ROOT, "Shared", ObjectType::Dir));
        e.authority.inject(
            S,
            shared,
            crate::change::RemoteOp::Move {
                parent: OID::ROOT,
                name: "Team".into(),
            },
        );

        let fetcher = Arc::new(e.fetcher(S));
        let task = tokio::spawn({
            let fetcher = Arc::clone(&fetcher);
            async move { fetcher.run().await }
        });

        eventually(|| {
            let e = Arc::clone(&e);
            async move {
                let _core = e.core.lock().await;
                e.tree.child(S, OID::ROOT, "Team").unwrap() == Some(shared)
            }
        })
        .await;
        assert_eq!(e.router.cursor(S).unwrap(), Lts::new(2));
        assert!(e.tree.child(S, OID::ROOT, "Shared").unwrap().is_none());
        task.abort();
    }

    /// Fails the first subscriptions, then hands out a closed stream.
    struct Flaky {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl RemoteAuthority for Flaky {
        async fn submit_change(
            &self,
            _sidx: SIndex,
            _change: &crate::change::SubmittedChange,
        ) -> SyncResult<crate::change::SubmitReceipt> {
            Err(SyncError::Transport("offline".into()))
        }

        async fn subscribe_changes(&self, _sidx: SIndex, _since: Lts) -> SyncResult<ChangeStream> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(SyncError::Transport("offline".into()));
            }
            let (tx, stream) = ChangeStream::channel();
            drop(tx);
            Ok(stream)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_failures_are_retried() {
        let e = Engine::new();
        let flaky = Arc::new(Flaky {
            attempts: AtomicU32::new(0),
        });
        let fetcher = ChangeFetcher::new(
            S,
            flaky.clone(),
            Arc::clone(&e.router),
            Arc::clone(&e.applier),
            e.core.clone(),
            RetryConfig {
                min_interval: Duration::from_millis(10),
                max_interval: Duration::from_millis(40),
                max_attempts: Some(4),
            },
        );

        let err = fetcher.run().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 4);
    }
}
