use async_trait::async_trait;
use tokio::sync::mpsc;
use trellis_types::{Lts, SIndex};

use crate::change::{RemoteChange, SubmitReceipt, SubmittedChange};
use crate::error::SyncResult;

/// The metadata-ordering authority.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Submit one local change. The authority echoes it to every
    /// subscriber, the submitter included.
    async fn submit_change(&self, sidx: SIndex, change: &SubmittedChange) -> SyncResult<SubmitReceipt>;

    /// Stream the store's log, starting after `since`.
    async fn subscribe_changes(&self, sidx: SIndex, since: Lts) -> SyncResult<ChangeStream>;
}

/// Ordered stream of a store's remote changes.
pub struct ChangeStream {
    rx: mpsc::UnboundedReceiver<RemoteChange>,
}

impl ChangeStream {
    pub fn new(rx: mpsc::UnboundedReceiver<RemoteChange>) -> Self {
        Self { rx }
    }

    /// A connected sender and stream pair.
    pub fn channel() -> (mpsc::UnboundedSender<RemoteChange>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// Wait for the next change. `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<RemoteChange> {
        self.rx.recv().await
    }

    /// The next change if one is ready now.
    pub fn try_next(&mut self) -> Option<RemoteChange> {
        self.rx.try_recv().ok()
    }
}
