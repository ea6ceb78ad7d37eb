use std::sync::Arc;

use tracing::warn;

use trellis_tree::{ObjectTree, VersionTracker};
use trellis_types::SOID;

use crate::sequence::CollectorEntry;

/// Decides whether a metadata entry is already known and need not be
/// collected.
pub trait SkipFilter: Send + Sync {
    fn should_skip(&self, soid: SOID, entry: &CollectorEntry) -> bool;
}

impl<F> SkipFilter for F
where
    F: Fn(SOID, &CollectorEntry) -> bool + Send + Sync,
{
    fn should_skip(&self, soid: SOID, entry: &CollectorEntry) -> bool {
        self(soid, entry)
    }
}

/// Skips objects present in the tree whose local version already covers
/// the advertised one.
pub struct KnownVersionFilter {
    tree: Arc<ObjectTree>,
    versions: Arc<VersionTracker>,
}

impl KnownVersionFilter {
    pub fn new(tree: Arc<ObjectTree>, versions: Arc<VersionTracker>) -> Self {
        Self { tree, versions }
    }
}

impl SkipFilter for KnownVersionFilter {
    fn should_skip(&self, soid: SOID, entry: &CollectorEntry) -> bool {
        if !self.tree.exists(soid) {
            return false;
        }
        match self.versions.version(soid, entry.cid) {
            Ok(local) => local.dominates(&entry.advertised),
            Err(e) => {
                warn!(soid = %soid, error = %e, "version lookup failed; collecting");
                false
            }
        }
    }
}
