use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// The core's execution right.
///
/// Exactly one task holds the core at a time. Cloning shares the same lock.
#[derive(Clone, Default)]
pub struct CoreLock {
    inner: Arc<Mutex<()>>,
}

impl CoreLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> CoreGuard {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        CoreGuard {
            lock: Arc::clone(&self.inner),
            guard: Some(guard),
        }
    }

    /// Returns `true` if some task currently holds the core.
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// Proof that the current task holds the core.
pub struct CoreGuard {
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl CoreGuard {
    /// Release the core while `fut` runs, then take it back.
    ///
    /// Anything read before the pause may be stale afterwards. No
    /// transaction may be open across this call.
    pub async fn pause<F: Future>(&mut self, fut: F) -> F::Output {
        self.guard = None;
        let output = fut.await;
        self.guard = Some(Arc::clone(&self.lock).lock_owned().await);
        output
    }
}
