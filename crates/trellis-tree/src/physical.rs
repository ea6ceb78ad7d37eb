//! Filesystem-visible side effects of tree mutations.
//!
//! The tree never performs I/O itself. Higher-level mutation logic calls a
//! [`PhysicalStorage`] in the same transaction as the tree change, and the
//! storage is expected to undo its effect if that transaction aborts.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::debug;
use trellis_db::{Trans, TransListener};

use crate::attr::ResolvedPath;
use crate::error::{TreeError, TreeResult};

/// Collaborator that mirrors tree mutations onto real storage.
pub trait PhysicalStorage: Send + Sync {
    fn create_file(&self, path: &ResolvedPath, t: &mut Trans<'_>) -> TreeResult<()>;
    fn create_folder(&self, path: &ResolvedPath, t: &mut Trans<'_>) -> TreeResult<()>;
    fn delete(&self, path: &ResolvedPath, t: &mut Trans<'_>) -> TreeResult<()>;
    fn move_path(&self, from: &ResolvedPath, to: &ResolvedPath, t: &mut Trans<'_>) -> TreeResult<()>;
}

/// Storage with no side effects.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStorage;

impl PhysicalStorage for NullStorage {
    fn create_file(&self, _path: &ResolvedPath, _t: &mut Trans<'_>) -> TreeResult<()> {
        Ok(())
    }

    fn create_folder(&self, _path: &ResolvedPath, _t: &mut Trans<'_>) -> TreeResult<()> {
        Ok(())
    }

    fn delete(&self, _path: &ResolvedPath, _t: &mut Trans<'_>) -> TreeResult<()> {
        Ok(())
    }

    fn move_path(&self, _from: &ResolvedPath, _to: &ResolvedPath, _t: &mut Trans<'_>) -> TreeResult<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

type Entries = BTreeMap<String, EntryKind>;

/// In-memory storage keyed by rendered path.
///
/// Every change registers an abort listener that restores the entries it
/// touched.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<Entries>>,
}

struct Restore {
    entries: Arc<RwLock<Entries>>,
    previous: Vec<(String, Option<EntryKind>)>,
}

impl TransListener for Restore {
    fn aborted(&mut self) {
        let mut entries = self.entries.write().expect("lock poisoned");
        for (path, kind) in self.previous.drain(..).rev() {
            match kind {
                Some(kind) => entries.insert(path, kind),
                None => entries.remove(&path),
            };
        }
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&self, path: &ResolvedPath) -> Option<EntryKind> {
        self.entries
            .read()
            .expect("lock poisoned")
            .get(&path.to_string())
            .copied()
    }

    /// Every entry, rendered, in order.
    pub fn paths(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn create(&self, path: &ResolvedPath, kind: EntryKind, t: &mut Trans<'_>) -> TreeResult<()> {
        let key = path.to_string();
        let mut entries = self.entries.write().expect("lock poisoned");
        if entries.contains_key(&key) {
            return Err(TreeError::Physical(format!("{key} already exists")));
        }
        entries.insert(key.clone(), kind);
        drop(entries);
        debug!(path = %key, ?kind, "physical create");
        self.record(vec![(key, None)], t);
        Ok(())
    }

    /// Keys of `path` and everything below it.
    fn subtree(entries: &Entries, key: &str) -> Vec<String> {
        let below = format!("{key}/");
        entries
            .keys()
            .filter(|k| k.as_str() == key || k.starts_with(&below))
            .cloned()
            .collect()
    }

    fn record(&self, previous: Vec<(String, Option<EntryKind>)>, t: &mut Trans<'_>) {
        t.add_listener(Box::new(Restore {
            entries: Arc::clone(&self.entries),
            previous,
        }));
    }
}

impl PhysicalStorage for MemoryStorage {
    fn create_file(&self, path: &ResolvedPath, t: &mut Trans<'_>) -> TreeResult<()> {
        self.create(path, EntryKind::File, t)
    }

    fn create_folder(&self, path: &ResolvedPath, t: &mut Trans<'_>) -> TreeResult<()> {
        self.create(path, EntryKind::Folder, t)
    }

    fn delete(&self, path: &ResolvedPath, t: &mut Trans<'_>) -> TreeResult<()> {
        let key = path.to_string();
        let mut entries = self.entries.write().expect("lock poisoned");
        let keys = Self::subtree(&entries, &key);
        if keys.is_empty() {
            return Err(TreeError::Physical(format!("{key} does not exist")));
        }
        let previous = keys
            .into_iter()
            .map(|k| {
                let kind = entries.remove(&k);
                (k, kind)
            })
            .collect();
        drop(entries);
        debug!(path = %key, "physical delete");
        self.record(previous, t);
        Ok(())
    }

    fn move_path(&self, from: &ResolvedPath, to: &ResolvedPath, t: &mut Trans<'_>) -> TreeResult<()> {
        let (src, dst) = (from.to_string(), to.to_string());
        let mut entries = self.entries.write().expect("lock poisoned");
        if entries.contains_key(&dst) {
            return Err(TreeError::Physical(format!("{dst} already exists")));
        }
        let keys = Self::subtree(&entries, &src);
        if keys.is_empty() {
            return Err(TreeError::Physical(format!("{src} does not exist")));
        }
        let mut previous = Vec::new();
        for k in keys {
            if let Some(kind) = entries.remove(&k) {
                let moved = format!("{dst}{}", &k[src.len()..]);
                previous.push((k, Some(kind)));
                previous.push((moved.clone(), entries.insert(moved.clone(), kind)));
            }
        }
        drop(entries);
        debug!(from = %src, to = %dst, "physical move");
        self.record(previous, t);
        Ok(())
    }
}
