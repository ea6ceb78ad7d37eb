//! Persistent queue driver.
//!
//! A [`QueueDriver`] owns the scanning discipline for one queue: at most one
//! scan in flight, items processed front to back under a token, and each
//! item dequeued in its own transaction only after it was processed
//! successfully. The queue contents themselves live in the backend's tables,
//! so an item survives a crash until the transaction that dequeues it
//! commits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use trellis_db::{Database, Trans};

use crate::core::{CoreGuard, CoreLock};
use crate::error::{QueueError, QueueResult};
use crate::retry::{ExponentialRetry, RetryConfig};
use crate::token::{Cat, Token, TokenManager};

/// The queue a driver runs.
///
/// `I` is what callers enqueue, `O` is what the queue hands back from
/// [`front`](Self::front). Everything except `process` runs with the core
/// held and must not block.
#[async_trait]
pub trait QueueBackend<I, O>: Send + Sync + 'static
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    fn enqueue(&self, item: I, t: &mut Trans<'_>) -> QueueResult<()>;

    fn front(&self) -> QueueResult<Option<O>>;

    /// Process one item. Returns `true` once the item is done and may be
    /// dequeued.
    ///
    /// Implementations may release the core through `token`. If they then
    /// observe that the item is no longer valid they call
    /// [`ScanControl::restart`].
    async fn process(
        &self,
        item: &O,
        token: &Token,
        core: &mut CoreGuard,
        control: &ScanControl,
    ) -> QueueResult<bool>;

    fn dequeue(&self, item: &O, t: &mut Trans<'_>) -> QueueResult<()>;
}

/// Handle given to [`QueueBackend::process`] to request a restart.
#[derive(Clone)]
pub struct ScanControl {
    restart: Arc<AtomicBool>,
}

impl ScanControl {
    /// Skip the dequeue of the current item and re-read the front.
    pub fn restart(&self) {
        self.restart.store(true, Ordering::SeqCst);
    }

    pub fn is_restart_requested(&self) -> bool {
        self.restart.load(Ordering::SeqCst)
    }
}

/// What every driver needs from its surroundings.
#[derive(Clone)]
pub struct QueueContext {
    pub db: Arc<Database>,
    pub core: CoreLock,
    pub tokens: Arc<TokenManager>,
    pub retry: RetryConfig,
}

struct Inner<I, O> {
    name: String,
    cat: Cat,
    backend: Arc<dyn QueueBackend<I, O>>,
    db: Arc<Database>,
    core: CoreLock,
    tokens: Arc<TokenManager>,
    retry: ExponentialRetry,
    /// `true` while a scan is in flight.
    scanning: watch::Sender<bool>,
    control: ScanControl,
    scan_seq: AtomicU64,
}

/// Drives one [`QueueBackend`].
pub struct QueueDriver<I, O> {
    inner: Arc<Inner<I, O>>,
}

impl<I, O> Clone for QueueDriver<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O> QueueDriver<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        cat: Cat,
        backend: Arc<dyn QueueBackend<I, O>>,
        ctx: &QueueContext,
    ) -> Self {
        let (scanning, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                cat,
                backend,
                db: Arc::clone(&ctx.db),
                core: ctx.core.clone(),
                tokens: Arc::clone(&ctx.tokens),
                retry: ExponentialRetry::new(ctx.retry.clone()),
                scanning,
                control: ScanControl {
                    restart: Arc::new(AtomicBool::new(false)),
                },
                scan_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueue inside `t`. A scan is scheduled once `t` commits.
    pub fn enqueue(&self, item: I, t: &mut Trans<'_>) -> QueueResult<()> {
        self.inner.backend.enqueue(item, t)?;
        let driver = self.clone();
        t.on_commit(move || driver.schedule_scan());
        Ok(())
    }

    /// Start a scan unless one is already in flight.
    pub fn schedule_scan(&self) {
        let started = self.inner.scanning.send_if_modified(|scanning| {
            if *scanning {
                false
            } else {
                *scanning = true;
                true
            }
        });
        if !started {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move { inner.run_scans().await });
            }
            Err(_) => {
                warn!(queue = %self.inner.name, "no runtime; scan not scheduled");
                self.inner.scanning.send_replace(false);
            }
        }
    }

    /// Ask the running scan to re-read the front instead of dequeuing the
    /// current item. Schedules a scan if none is running.
    pub fn restart_scan(&self) {
        self.inner.control.restart();
        if !self.is_scanning() {
            self.schedule_scan();
        }
    }

    pub fn is_scanning(&self) -> bool {
        *self.inner.scanning.borrow()
    }

    /// Number of scans started so far.
    pub fn scan_seq(&self) -> u64 {
        self.inner.scan_seq.load(Ordering::SeqCst)
    }

    /// Wait until no scan is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.scanning.subscribe();
        // The sender lives in `inner`, which we hold.
        let _ = rx.wait_for(|scanning| !*scanning).await;
    }
}

impl<I, O> Inner<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    async fn run_scans(&self) {
        loop {
            let seq = self.scan_seq.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(queue = %self.name, seq, "scan started");
            let result = self.drain().await;

            // Items enqueued after the last front() check and before the
            // flag clears would otherwise wait for the next scan request.
            let _core = self.core.lock().await;
            match result {
                Ok(()) => match self.backend.front() {
                    Ok(Some(_)) => continue,
                    Ok(None) => {}
                    Err(e) => error!(queue = %self.name, seq, error = %e, "front failed"),
                },
                Err(e) => error!(queue = %self.name, seq, error = %e, "scan failed"),
            }
            self.scanning.send_replace(false);
            debug!(queue = %self.name, seq, "scan finished");
            return;
        }
    }

    /// Work through the queue until it is empty. Every item gets its own
    /// retry, so the backoff starts over once an item is dequeued.
    async fn drain(&self) -> QueueResult<()> {
        while self
            .retry
            .run(&self.name, || self.step(), |_| false)
            .await?
        {}
        Ok(())
    }

    /// Handle the front item. Returns `false` when the queue is empty.
    async fn step(&self) -> QueueResult<bool> {
        let mut core = self.core.lock().await;
        self.control.restart.store(false, Ordering::SeqCst);
        let Some(item) = self.backend.front()? else {
            return Ok(false);
        };

        let token = self.tokens.acquire(self.cat, &self.name, &mut core).await?;
        let done = self
            .backend
            .process(&item, &token, &mut core, &self.control)
            .await;
        drop(token);
        let done = done?;

        if self.control.restart.swap(false, Ordering::SeqCst) {
            debug!(queue = %self.name, "restart requested");
            return Ok(true);
        }
        if !done {
            return Err(QueueError::Deferred);
        }

        let mut t = self.db.begin()?;
        self.backend.dequeue(&item, &mut t)?;
        t.commit()?;
        Ok(true)
    }
}
