use std::sync::Arc;

use tracing::{debug, warn};

use trellis_db::{Database, DbResult, Key, Trans};
use trellis_tree::{ObjectTree, StoreDeletionOperator};
use trellis_types::{Lts, SIndex};

use crate::buffer::RemoteChangeBuffer;
use crate::change::{RemoteChange, RemoteOp};
use crate::error::SyncResult;
use crate::remote_link::{RemoteLink, RemoteLinks};
use crate::submitter::Submitter;

/// `sidx -> lts of the last change received`
pub const REMOTE_CURSOR_TABLE: &str = "remote_cursor";

fn cursor_key(sidx: SIndex) -> Vec<u8> {
    Key::new().u32(sidx.get()).build()
}

/// How an echoed change was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EchoOutcome {
    /// Matched a pending local change.
    Acked,
    /// Queued for application.
    Buffered,
    /// Already seen; dropped.
    Stale,
}

/// Sends each echo down exactly one of the ack and buffered-apply paths.
pub struct EchoRouter {
    db: Arc<Database>,
    tree: Arc<ObjectTree>,
    links: Arc<RemoteLinks>,
    buffer: Arc<RemoteChangeBuffer>,
    submitter: Arc<Submitter>,
}

impl EchoRouter {
    pub fn new(
        db: Arc<Database>,
        tree: Arc<ObjectTree>,
        links: Arc<RemoteLinks>,
        buffer: Arc<RemoteChangeBuffer>,
        submitter: Arc<Submitter>,
    ) -> Self {
        Self {
            db,
            tree,
            links,
            buffer,
            submitter,
        }
    }

    /// The last `lts` received for a store.
    pub fn cursor(&self, sidx: SIndex) -> SyncResult<Lts> {
        Ok(self
            .db
            .get_value(REMOTE_CURSOR_TABLE, &cursor_key(sidx))?
            .unwrap_or(Lts::ZERO))
    }

    /// Handle one echo in its own transaction. The caller holds the core.
    pub fn handle(&self, change: &RemoteChange) -> SyncResult<EchoOutcome> {
        let mut t = self.db.begin()?;
        let outcome = self.route(change, &mut t)?;
        if change.lts > self.cursor(change.sidx)? {
            t.put_value(REMOTE_CURSOR_TABLE, cursor_key(change.sidx), &change.lts)?;
        }
        t.commit()?;
        Ok(outcome)
    }

    fn route(&self, change: &RemoteChange, t: &mut Trans<'_>) -> SyncResult<EchoOutcome> {
        let sidx = change.sidx;
        let link = self.links.get(sidx, change.oid)?;
        let seen = self.cursor(sidx)?;
        if change.lts <= seen || link.as_ref().is_some_and(|l| change.lts <= l.remote_version) {
            warn!(sidx = %sidx, oid = ?change.oid, lts = %change.lts, "stale echo dropped");
            return Ok(EchoOutcome::Stale);
        }

        if self.submitter.ack_matching(sidx, change, link.as_ref(), t)? {
            // The local tree already reflects this position.
            self.buffer.remove(sidx, change.oid, t)?;
            return Ok(EchoOutcome::Acked);
        }

        let local_type = self.tree.get(change.soid())?.map(|oa| oa.otype);
        let new_link = RemoteLink::from_echo(change, link.as_ref(), local_type);
        self.links.set(&new_link, t)?;
        let migrant = match &change.op {
            RemoteOp::Insert { migrant, .. } => *migrant,
            _ => None,
        };
        self.buffer
            .insert(sidx, change.oid, new_link.otype, migrant, change.lts, t)?;
        debug!(sidx = %sidx, oid = ?change.oid, lts = %change.lts, "echo buffered");
        Ok(EchoOutcome::Buffered)
    }
}

impl StoreDeletionOperator for EchoRouter {
    fn delete_store(&self, sidx: SIndex, t: &mut Trans<'_>) -> DbResult<()> {
        t.delete(REMOTE_CURSOR_TABLE, &cursor_key(sidx));
        Ok(())
    }
}
