use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use trellis_types::{Lts, SIndex, OID};

use crate::change::{RemoteChange, RemoteOp, SubmitReceipt, SubmittedChange};
use crate::error::{SyncError, SyncResult};
use crate::transport::{ChangeStream, RemoteAuthority};

#[derive(Default)]
struct StoreLog {
    last: Lts,
    /// Current parent of every live object.
    objects: HashMap<OID, OID>,
    removed: HashSet<OID>,
    log: Vec<RemoteChange>,
    subscribers: Vec<mpsc::UnboundedSender<RemoteChange>>,
}

impl StoreLog {
    fn publish(&mut self, change: RemoteChange) {
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
        self.log.push(change);
    }
}

/// In-process authority.
///
/// Orders changes per store and echoes every accepted change to all
/// subscribers. Moves of unknown objects are rejected. Inserting a known
/// object or removing a removed one reports the change as already applied.
#[derive(Default)]
pub struct LoopbackAuthority {
    stores: Mutex<HashMap<SIndex, StoreLog>>,
}

impl LoopbackAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change as if another device had submitted it.
    pub fn inject(&self, sidx: SIndex, oid: OID, op: RemoteOp) -> Lts {
        let mut stores = self.stores.lock().expect("lock poisoned");
        let log = stores.entry(sidx).or_default();
        log.last = log.last.next();
        match &op {
            RemoteOp::Insert { parent, .. } | RemoteOp::Move { parent, .. } => {
                log.objects.insert(oid, *parent);
                log.removed.remove(&oid);
            }
            RemoteOp::Remove { .. } => {
                log.objects.remove(&oid);
                log.removed.insert(oid);
            }
        }
        let change = RemoteChange {
            sidx,
            lts: log.last,
            oid,
            op,
        };
        debug!(sidx = %sidx, lts = %change.lts, oid = ?oid, "loopback change published");
        let lts = change.lts;
        log.publish(change);
        lts
    }

    /// Every change of a store, in order.
    pub fn log(&self, sidx: SIndex) -> Vec<RemoteChange> {
        let stores = self.stores.lock().expect("lock poisoned");
        stores.get(&sidx).map(|l| l.log.clone()).unwrap_or_default()
    }

    fn to_op(&self, sidx: SIndex, change: &SubmittedChange) -> SyncResult<RemoteOp> {
        let stores = self.stores.lock().expect("lock poisoned");
        let parent_of = |oid: &OID| stores.get(&sidx).and_then(|l| l.objects.get(oid).copied());
        let was_removed = |oid: &OID| stores.get(&sidx).is_some_and(|l| l.removed.contains(oid));
        match change {
            SubmittedChange::Insert {
                oid,
                parent,
                name,
                otype,
            } => match parent_of(oid) {
                Some(_) => Err(SyncError::AlreadyApplied(format!("{oid:?} already exists"))),
                None => Ok(RemoteOp::Insert {
                    parent: *parent,
                    name: name.clone(),
                    otype: *otype,
                    migrant: None,
                }),
            },
            SubmittedChange::Move { oid, parent, name } => match parent_of(oid) {
                Some(_) => Ok(RemoteOp::Move {
                    parent: *parent,
                    name: name.clone(),
                }),
                None => Err(SyncError::Rejected(format!("{oid:?} is unknown"))),
            },
            SubmittedChange::Remove { oid } => match parent_of(oid) {
                Some(parent) => Ok(RemoteOp::Remove { parent }),
                None if was_removed(oid) => {
                    Err(SyncError::AlreadyApplied(format!("{oid:?} already removed")))
                }
                None => Err(SyncError::Rejected(format!("{oid:?} is unknown"))),
            },
        }
    }
}

#[async_trait]
impl RemoteAuthority for LoopbackAuthority {
    async fn submit_change(&self, sidx: SIndex, change: &SubmittedChange) -> SyncResult<SubmitReceipt> {
        let op = self.to_op(sidx, change)?;
        let lts = self.inject(sidx, change.oid(), op);
        Ok(SubmitReceipt { lts })
    }

    async fn subscribe_changes(&self, sidx: SIndex, since: Lts) -> SyncResult<ChangeStream> {
        let (tx, stream) = ChangeStream::channel();
        let mut stores = self.stores.lock().expect("lock poisoned");
        let log = stores.entry(sidx).or_default();
        for change in log.log.iter().filter(|c| c.lts > since) {
            // The stream is still in hand, so the send cannot fail.
            let _ = tx.send(change.clone());
        }
        log.subscribers.push(tx);
        Ok(stream)
    }
}
