use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use trellis_tree::ObjectTree;
use trellis_types::{ComponentKind, SIndex, OID, SOID};

use crate::error::CollectorResult;
use crate::filter::SkipFilter;
use crate::quota::QuotaCheck;
use crate::sequence::CollectorSequence;

/// Iteration phase. Metadata always comes first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Meta,
    Content,
    Done,
}

/// Saved position of a [`CollectorIterator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorCursor {
    pub sidx: SIndex,
    pub phase: Phase,
    /// Last sequence number visited in `phase`.
    pub seq: u64,
}

impl CollectorCursor {
    pub fn start(sidx: SIndex) -> Self {
        Self {
            sidx,
            phase: Phase::Meta,
            seq: 0,
        }
    }
}

/// Yields the components of a store to collect, metadata before content.
///
/// Metadata entries the skip filter recognises as known are passed over.
/// Content is never entered, or stops at once, while the store is over
/// quota. Content of expelled objects is passed over.
pub struct CollectorIterator {
    sequence: Arc<CollectorSequence>,
    tree: Arc<ObjectTree>,
    filter: Arc<dyn SkipFilter>,
    quota: Arc<dyn QuotaCheck>,
    cursor: CollectorCursor,
}

impl CollectorIterator {
    pub fn new(
        sidx: SIndex,
        sequence: Arc<CollectorSequence>,
        tree: Arc<ObjectTree>,
        filter: Arc<dyn SkipFilter>,
        quota: Arc<dyn QuotaCheck>,
    ) -> Self {
        Self::resume(CollectorCursor::start(sidx), sequence, tree, filter, quota)
    }

    /// Continue from a saved cursor.
    pub fn resume(
        cursor: CollectorCursor,
        sequence: Arc<CollectorSequence>,
        tree: Arc<ObjectTree>,
        filter: Arc<dyn SkipFilter>,
        quota: Arc<dyn QuotaCheck>,
    ) -> Self {
        Self {
            sequence,
            tree,
            filter,
            quota,
            cursor,
        }
    }

    pub fn cursor(&self) -> CollectorCursor {
        self.cursor
    }

    pub fn phase(&self) -> Phase {
        self.cursor.phase
    }

    fn finish(&mut self) {
        self.cursor.phase = Phase::Done;
        self.cursor.seq = 0;
    }

    fn advance(&mut self) -> CollectorResult<Option<(OID, ComponentKind)>> {
        let sidx = self.cursor.sidx;
        loop {
            match self.cursor.phase {
                Phase::Meta => {
                    let Some(entry) = self.sequence.next_after(sidx, ComponentKind::Meta, self.cursor.seq)? else {
                        if self.quota.is_over_quota(sidx) {
                            info!(sidx = %sidx, "store over quota; content not collected");
                            self.finish();
                            return Ok(None);
                        }
                        self.cursor.phase = Phase::Content;
                        self.cursor.seq = 0;
                        continue;
                    };
                    self.cursor.seq = entry.seq;
                    let soid = SOID::new(sidx, entry.oid);
                    if self.filter.should_skip(soid, &entry) {
                        debug!(soid = %soid, seq = entry.seq, "metadata already known");
                        continue;
                    }
                    return Ok(Some((entry.oid, ComponentKind::Meta)));
                }
                Phase::Content => {
                    if self.quota.is_over_quota(sidx) {
                        info!(sidx = %sidx, seq = self.cursor.seq, "store over quota; collection stopped");
                        self.finish();
                        return Ok(None);
                    }
                    let Some(entry) = self.sequence.next_after(sidx, ComponentKind::Content, self.cursor.seq)? else {
                        self.finish();
                        return Ok(None);
                    };
                    self.cursor.seq = entry.seq;
                    let soid = SOID::new(sidx, entry.oid);
                    if self.tree.get(soid)?.is_some_and(|oa| oa.expelled) {
                        debug!(soid = %soid, "expelled; content skipped");
                        continue;
                    }
                    return Ok(Some((entry.oid, ComponentKind::Content)));
                }
                Phase::Done => return Ok(None),
            }
        }
    }
}

impl Iterator for CollectorIterator {
    type Item = CollectorResult<(OID, ComponentKind)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}
