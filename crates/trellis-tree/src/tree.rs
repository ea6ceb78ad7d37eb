//! The object tree store.
//!
//! [`ObjectTree`] persists object attributes in three tables:
//!
//! - `oa` -- `(sidx, oid) -> OA`
//! - `oa_children` -- `(sidx, parent, name) -> oid`, the sibling-name index
//! - `ca` -- `(sidx, oid, kidx) -> CA`
//!
//! Root and trash are their own parents and are absent from the children
//! index. Deleted objects are children of trash, named after their OID so
//! that trash never has two children with the same name.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use trellis_db::{Database, Key, Trans};
use trellis_types::{KIndex, ObjectType, SIndex, OID, SOID};

use crate::attr::{ResolvedPath, CA, OA};
use crate::error::{TreeError, TreeResult};
use crate::name::validate_name;

pub const OA_TABLE: &str = "oa";
pub const CHILDREN_TABLE: &str = "oa_children";
pub const CA_TABLE: &str = "ca";

/// Upper bound on tree depth, guarding walks over corrupt data.
const MAX_DEPTH: usize = 4096;

fn store_prefix(sidx: SIndex) -> Vec<u8> {
    Key::new().u32(sidx.get()).build()
}

fn oa_key(soid: SOID) -> Vec<u8> {
    Key::new()
        .u32(soid.sidx.get())
        .bytes(soid.oid.as_bytes())
        .build()
}

fn children_prefix(sidx: SIndex, parent: OID) -> Vec<u8> {
    Key::new().u32(sidx.get()).bytes(parent.as_bytes()).build()
}

fn child_key(sidx: SIndex, parent: OID, name: &str) -> Vec<u8> {
    Key::new()
        .u32(sidx.get())
        .bytes(parent.as_bytes())
        .str(name)
        .build()
}

fn ca_prefix(soid: SOID) -> Vec<u8> {
    oa_key(soid)
}

fn ca_key(soid: SOID, kidx: KIndex) -> Vec<u8> {
    Key::new()
        .u32(soid.sidx.get())
        .bytes(soid.oid.as_bytes())
        .u32(kidx.get())
        .build()
}

/// What to do when deleting a directory that still has children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Reject with [`TreeError::NotEmpty`].
    RequireEmpty,
    /// Delete the whole subtree.
    Cascade,
}

/// Persistent object tree for every store on this device.
pub struct ObjectTree {
    db: Arc<Database>,
}

impl ObjectTree {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    // ---------------------------------------------------------------
    // Store lifecycle
    // ---------------------------------------------------------------

    /// Create the root and trash of a new store.
    pub fn init_store(&self, sidx: SIndex, t: &mut Trans<'_>) -> TreeResult<()> {
        for (oid, name) in [(OID::ROOT, ""), (OID::TRASH, ".trash")] {
            let oa = OA {
                soid: SOID::new(sidx, oid),
                parent: oid,
                name: name.to_string(),
                otype: ObjectType::Dir,
                expelled: false,
                child_store: None,
            };
            t.put_value(OA_TABLE, oa_key(oa.soid), &oa)?;
        }
        Ok(())
    }

    /// Remove every row belonging to a store.
    pub fn purge_store(&self, sidx: SIndex, t: &mut Trans<'_>) -> usize {
        let prefix = store_prefix(sidx);
        t.delete_prefix(OA_TABLE, &prefix)
            + t.delete_prefix(CHILDREN_TABLE, &prefix)
            + t.delete_prefix(CA_TABLE, &prefix)
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    pub fn get(&self, soid: SOID) -> TreeResult<Option<OA>> {
        Ok(self.db.get_value(OA_TABLE, &oa_key(soid))?)
    }

    /// Like [`get`](Self::get), but a missing object is an error.
    pub fn require(&self, soid: SOID) -> TreeResult<OA> {
        self.get(soid)?.ok_or(TreeError::NotFound(soid))
    }

    pub fn exists(&self, soid: SOID) -> bool {
        self.db.contains(OA_TABLE, &oa_key(soid))
    }

    /// The child of `parent` named `name`, if any.
    pub fn child(&self, sidx: SIndex, parent: OID, name: &str) -> TreeResult<Option<OID>> {
        Ok(self
            .db
            .get_value(CHILDREN_TABLE, &child_key(sidx, parent, name))?)
    }

    /// Children of an object, ordered by name.
    pub fn children(&self, soid: SOID) -> TreeResult<Vec<OID>> {
        Ok(self
            .db
            .scan_values(CHILDREN_TABLE, &children_prefix(soid.sidx, soid.oid))?)
    }

    /// Every object in a store, root and trash included.
    pub fn list(&self, sidx: SIndex) -> TreeResult<Vec<OA>> {
        Ok(self.db.scan_values(OA_TABLE, &store_prefix(sidx))?)
    }

    /// Returns `true` if the object is in trash, directly or through an
    /// ancestor.
    pub fn is_deleted(&self, soid: SOID) -> TreeResult<bool> {
        let mut current = self.require(soid)?;
        for _ in 0..MAX_DEPTH {
            if current.soid.oid.is_trash() {
                return Ok(true);
            }
            if current.soid.oid.is_root() {
                return Ok(false);
            }
            current = self.require(SOID::new(soid.sidx, current.parent))?;
        }
        Err(TreeError::CycleDetected {
            soid,
            parent: current.parent,
        })
    }

    /// Names from the store root down to the object.
    pub fn resolve_path(&self, soid: SOID) -> TreeResult<ResolvedPath> {
        let mut elements = Vec::new();
        let mut current = self.require(soid)?;
        for _ in 0..MAX_DEPTH {
            if current.soid.oid.is_root() {
                elements.reverse();
                return Ok(ResolvedPath {
                    sidx: soid.sidx,
                    elements,
                });
            }
            if current.soid.oid.is_trash() {
                return Err(TreeError::Deleted(soid));
            }
            elements.push(current.name.clone());
            current = self.require(SOID::new(soid.sidx, current.parent))?;
        }
        Err(TreeError::CycleDetected {
            soid,
            parent: current.parent,
        })
    }

    /// The object at `path` below the store root, if any.
    pub fn resolve_oid<S: AsRef<str>>(&self, sidx: SIndex, path: &[S]) -> TreeResult<Option<OID>> {
        let mut current = OID::ROOT;
        for element in path {
            match self.child(sidx, current, element.as_ref())? {
                Some(oid) => current = oid,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    // ---------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------

    /// Create an object with a fresh OID.
    pub fn create(
        &self,
        sidx: SIndex,
        otype: ObjectType,
        parent: OID,
        name: &str,
        t: &mut Trans<'_>,
    ) -> TreeResult<OID> {
        let oid = OID::generate();
        self.create_with_oid(SOID::new(sidx, oid), otype, parent, name, t)?;
        Ok(oid)
    }

    /// Create an object with a known OID, e.g. one assigned remotely.
    ///
    /// Files are created with an empty master branch.
    pub fn create_with_oid(
        &self,
        soid: SOID,
        otype: ObjectType,
        parent: OID,
        name: &str,
        t: &mut Trans<'_>,
    ) -> TreeResult<()> {
        if soid.oid.is_reserved() || self.exists(soid) {
            return Err(TreeError::Immutable(soid));
        }
        validate_name(name)?;
        self.check_parent(soid.sidx, parent)?;
        self.check_name_free(soid, parent, name)?;

        let oa = OA {
            soid,
            parent,
            name: name.to_string(),
            otype,
            expelled: false,
            child_store: None,
        };
        t.put_value(OA_TABLE, oa_key(soid), &oa)?;
        t.put_value(CHILDREN_TABLE, child_key(soid.sidx, parent, name), &soid.oid)?;
        if otype.is_file() {
            let ca = CA::empty(soid, KIndex::MASTER);
            t.put_value(CA_TABLE, ca_key(soid, KIndex::MASTER), &ca)?;
        }

        debug!(soid = %soid, parent = ?parent, name, otype = %otype, "object created");
        Ok(())
    }

    /// Move and/or rename an object.
    ///
    /// Moving an object to its current position is a no-op. Moving into
    /// trash goes through [`delete`](Self::delete).
    pub fn move_object(
        &self,
        soid: SOID,
        new_parent: OID,
        new_name: &str,
        t: &mut Trans<'_>,
    ) -> TreeResult<()> {
        if soid.oid.is_reserved() || new_parent.is_trash() {
            return Err(TreeError::Immutable(soid));
        }
        let mut oa = self.require(soid)?;
        if oa.parent == new_parent && oa.name == new_name {
            return Ok(());
        }
        validate_name(new_name)?;
        self.check_parent(soid.sidx, new_parent)?;
        self.check_name_free(soid, new_parent, new_name)?;
        self.check_no_cycle(soid, new_parent)?;

        self.relink(&mut oa, new_parent, new_name, t)?;
        debug!(soid = %soid, parent = ?new_parent, name = new_name, "object moved");
        Ok(())
    }

    /// Delete an object by moving it into trash.
    ///
    /// Deleting an object that is already in trash is a no-op. Files lose
    /// all content branches; with [`DeletePolicy::Cascade`] so do the files
    /// of the deleted subtree.
    pub fn delete(&self, soid: SOID, policy: DeletePolicy, t: &mut Trans<'_>) -> TreeResult<()> {
        if soid.oid.is_reserved() {
            return Err(TreeError::Immutable(soid));
        }
        let mut oa = self.require(soid)?;
        if oa.parent.is_trash() {
            return Ok(());
        }

        let children = self.children(soid)?;
        if !children.is_empty() && policy == DeletePolicy::RequireEmpty {
            return Err(TreeError::NotEmpty(soid));
        }

        for file in self.subtree_files(soid)? {
            self.delete_all_cas(file, t);
        }
        let trash_name = soid.oid.to_hex();
        self.relink(&mut oa, OID::TRASH, &trash_name, t)?;
        debug!(soid = %soid, cascade = !children.is_empty(), "object deleted");
        Ok(())
    }

    /// Permanently remove an object that is already deleted.
    ///
    /// Descendants are removed with it.
    pub fn purge(&self, soid: SOID, t: &mut Trans<'_>) -> TreeResult<()> {
        if !self.is_deleted(soid)? {
            return Err(TreeError::Immutable(soid));
        }
        for oid in self.subtree(soid)? {
            let s = SOID::new(soid.sidx, oid);
            if let Some(oa) = self.get(s)? {
                t.delete(CHILDREN_TABLE, &child_key(s.sidx, oa.parent, &oa.name));
            }
            self.delete_all_cas(s, t);
            t.delete(OA_TABLE, &oa_key(s));
        }
        Ok(())
    }

    pub fn set_expelled(&self, soid: SOID, expelled: bool, t: &mut Trans<'_>) -> TreeResult<()> {
        let mut oa = self.require(soid)?;
        oa.expelled = expelled;
        t.put_value(OA_TABLE, oa_key(soid), &oa)?;
        Ok(())
    }

    /// Record the store mounted at an anchor.
    pub fn link_anchor(&self, soid: SOID, child: SIndex, t: &mut Trans<'_>) -> TreeResult<()> {
        let mut oa = self.require(soid)?;
        if !oa.is_anchor() {
            return Err(TreeError::NotADirectory(soid));
        }
        oa.child_store = Some(child);
        t.put_value(OA_TABLE, oa_key(soid), &oa)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Content attributes
    // ---------------------------------------------------------------

    pub fn get_ca(&self, soid: SOID, kidx: KIndex) -> TreeResult<Option<CA>> {
        Ok(self.db.get_value(CA_TABLE, &ca_key(soid, kidx))?)
    }

    /// Branches of a file, master first.
    pub fn branches(&self, soid: SOID) -> TreeResult<Vec<KIndex>> {
        let cas: Vec<CA> = self.db.scan_values(CA_TABLE, &ca_prefix(soid))?;
        Ok(cas.into_iter().map(|ca| ca.kidx).collect())
    }

    /// Create or update a content branch.
    pub fn set_ca(&self, ca: &CA, t: &mut Trans<'_>) -> TreeResult<()> {
        let oa = self.require(ca.soid)?;
        if !oa.is_file() {
            return Err(TreeError::NotAFile(ca.soid));
        }
        t.put_value(CA_TABLE, ca_key(ca.soid, ca.kidx), ca)?;
        Ok(())
    }

    /// Delete a content branch. Returns `true` if it existed.
    pub fn delete_ca(&self, soid: SOID, kidx: KIndex, t: &mut Trans<'_>) -> TreeResult<bool> {
        Ok(t.delete(CA_TABLE, &ca_key(soid, kidx)))
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn relink(&self, oa: &mut OA, parent: OID, name: &str, t: &mut Trans<'_>) -> TreeResult<()> {
        let sidx = oa.soid.sidx;
        t.delete(CHILDREN_TABLE, &child_key(sidx, oa.parent, &oa.name));
        oa.parent = parent;
        oa.name = name.to_string();
        t.put_value(OA_TABLE, oa_key(oa.soid), &*oa)?;
        t.put_value(CHILDREN_TABLE, child_key(sidx, parent, name), &oa.soid.oid)?;
        Ok(())
    }

    fn check_parent(&self, sidx: SIndex, parent: OID) -> TreeResult<()> {
        let Some(p) = self.get(SOID::new(sidx, parent))? else {
            return Err(TreeError::ParentNotFound { sidx, parent });
        };
        if !p.is_dir() || parent.is_trash() {
            return Err(TreeError::NotADirectory(p.soid));
        }
        Ok(())
    }

    fn check_name_free(&self, soid: SOID, parent: OID, name: &str) -> TreeResult<()> {
        match self.child(soid.sidx, parent, name)? {
            Some(occupant) if occupant != soid.oid => Err(TreeError::NameConflict {
                sidx: soid.sidx,
                parent,
                name: name.to_string(),
                occupant,
            }),
            _ => Ok(()),
        }
    }

    /// Walk up from `new_parent`; reaching `soid` means a cycle.
    fn check_no_cycle(&self, soid: SOID, new_parent: OID) -> TreeResult<()> {
        let mut current = new_parent;
        for _ in 0..MAX_DEPTH {
            if current == soid.oid {
                return Err(TreeError::CycleDetected {
                    soid,
                    parent: new_parent,
                });
            }
            if current.is_reserved() {
                return Ok(());
            }
            current = self.require(SOID::new(soid.sidx, current))?.parent;
        }
        Err(TreeError::CycleDetected {
            soid,
            parent: new_parent,
        })
    }

    /// The object and all of its descendants, parents before children.
    fn subtree(&self, soid: SOID) -> TreeResult<Vec<OID>> {
        let mut out = vec![soid.oid];
        let mut seen = HashSet::from([soid.oid]);
        let mut i = 0;
        while i < out.len() {
            for child in self.children(SOID::new(soid.sidx, out[i]))? {
                if seen.insert(child) {
                    out.push(child);
                }
            }
            i += 1;
        }
        Ok(out)
    }

    fn subtree_files(&self, soid: SOID) -> TreeResult<Vec<SOID>> {
        let mut files = Vec::new();
        for oid in self.subtree(soid)? {
            let s = SOID::new(soid.sidx, oid);
            if self.get(s)?.is_some_and(|oa| oa.is_file()) {
                files.push(s);
            }
        }
        Ok(files)
    }

    fn delete_all_cas(&self, soid: SOID, t: &mut Trans<'_>) {
        t.delete_prefix(CA_TABLE, &ca_prefix(soid));
    }
}
