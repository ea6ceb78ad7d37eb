use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use trellis_db::{Database, DbResult, Key, Trans};
use trellis_types::SIndex;

use crate::error::{TreeError, TreeResult};
use crate::tree::ObjectTree;
use crate::version::VersionTracker;

pub const STORE_TABLE: &str = "stores";

fn store_key(sidx: SIndex) -> Vec<u8> {
    Key::new().u32(sidx.get()).build()
}

/// A registered store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub sidx: SIndex,
    pub name: String,
    /// The store this one is mounted in, or `None` for a root store.
    pub parent: Option<SIndex>,
}

/// Cleanup hook run when a store is deleted.
///
/// Operators run synchronously inside the deleting transaction, in
/// registration order, before the store's tree is purged.
pub trait StoreDeletionOperator: Send + Sync {
    fn delete_store(&self, sidx: SIndex, t: &mut Trans<'_>) -> DbResult<()>;
}

/// Registry of the stores present on this device.
pub struct Stores {
    db: Arc<Database>,
    tree: Arc<ObjectTree>,
    versions: Arc<VersionTracker>,
    operators: RwLock<Vec<Arc<dyn StoreDeletionOperator>>>,
}

impl Stores {
    pub fn new(db: Arc<Database>, tree: Arc<ObjectTree>, versions: Arc<VersionTracker>) -> Self {
        Self {
            db,
            tree,
            versions,
            operators: RwLock::new(Vec::new()),
        }
    }

    /// Register a deletion operator.
    pub fn register(&self, operator: Arc<dyn StoreDeletionOperator>) {
        self.operators
            .write()
            .expect("lock poisoned")
            .push(operator);
    }

    /// Add a store and create its root and trash.
    pub fn add(
        &self,
        sidx: SIndex,
        parent: Option<SIndex>,
        name: &str,
        t: &mut Trans<'_>,
    ) -> TreeResult<StoreInfo> {
        if self.exists(sidx) {
            return Err(TreeError::StoreExists(sidx));
        }
        if let Some(p) = parent {
            if !self.exists(p) {
                return Err(TreeError::StoreNotFound(p));
            }
        }
        let info = StoreInfo {
            sidx,
            name: name.to_string(),
            parent,
        };
        t.put_value(STORE_TABLE, store_key(sidx), &info)?;
        self.tree.init_store(sidx, t)?;
        info!(sidx = %sidx, name, "store added");
        Ok(info)
    }

    /// Add a store under the next free index.
    pub fn allocate(
        &self,
        parent: Option<SIndex>,
        name: &str,
        t: &mut Trans<'_>,
    ) -> TreeResult<StoreInfo> {
        let next = self
            .list()?
            .iter()
            .map(|s| s.sidx.get())
            .max()
            .map_or(1, |max| max + 1);
        self.add(SIndex::new(next), parent, name, t)
    }

    /// Delete a store, its child stores, and everything they own.
    pub fn delete(&self, sidx: SIndex, t: &mut Trans<'_>) -> TreeResult<()> {
        if !self.exists(sidx) {
            return Err(TreeError::StoreNotFound(sidx));
        }
        let children: Vec<SIndex> = self
            .list()?
            .into_iter()
            .filter(|s| s.parent == Some(sidx))
            .map(|s| s.sidx)
            .collect();
        for child in children {
            self.delete(child, t)?;
        }

        let operators = self.operators.read().expect("lock poisoned").clone();
        for operator in &operators {
            operator.delete_store(sidx, t)?;
        }
        let rows = self.tree.purge_store(sidx, t) + self.versions.purge_store(sidx, t);
        t.delete(STORE_TABLE, &store_key(sidx));
        debug!(sidx = %sidx, rows, operators = operators.len(), "store purged");
        info!(sidx = %sidx, "store deleted");
        Ok(())
    }

    pub fn get(&self, sidx: SIndex) -> TreeResult<Option<StoreInfo>> {
        Ok(self.db.get_value(STORE_TABLE, &store_key(sidx))?)
    }

    pub fn exists(&self, sidx: SIndex) -> bool {
        self.db.contains(STORE_TABLE, &store_key(sidx))
    }

    /// Every store, by index.
    pub fn list(&self) -> TreeResult<Vec<StoreInfo>> {
        Ok(self.db.scan_values(STORE_TABLE, &[])?)
    }
}
