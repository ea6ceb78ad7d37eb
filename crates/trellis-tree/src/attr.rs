use std::fmt;

use serde::{Deserialize, Serialize};
use trellis_types::{ContentHash, KIndex, ObjectType, SIndex, OID, SOID};

/// Object attributes: identity, position in the tree, and type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OA {
    pub soid: SOID,
    pub parent: OID,
    pub name: String,
    pub otype: ObjectType,
    /// Excluded from sync on this device; content is never fetched.
    pub expelled: bool,
    /// For anchors, the store mounted at this point once it is linked.
    pub child_store: Option<SIndex>,
}

impl OA {
    pub fn is_file(&self) -> bool {
        self.otype.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.otype.is_dir()
    }

    pub fn is_anchor(&self) -> bool {
        self.otype.is_anchor()
    }
}

/// Content attributes of one branch of a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CA {
    pub soid: SOID,
    pub kidx: KIndex,
    pub length: u64,
    /// Modification time in milliseconds since the UNIX epoch.
    pub mtime: u64,
    pub content_hash: Option<ContentHash>,
}

impl CA {
    /// An empty branch with no known content.
    pub fn empty(soid: SOID, kidx: KIndex) -> Self {
        Self {
            soid,
            kidx,
            length: 0,
            mtime: 0,
            content_hash: None,
        }
    }
}

/// Path of an object from its store's root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPath {
    pub sidx: SIndex,
    pub elements: Vec<String>,
}

impl ResolvedPath {
    pub fn root(sidx: SIndex) -> Self {
        Self {
            sidx,
            elements: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.elements.is_empty()
    }

    /// Path of a child of this path.
    pub fn join(&self, name: &str) -> Self {
        let mut elements = self.elements.clone();
        elements.push(name.to_string());
        Self {
            sidx: self.sidx,
            elements,
        }
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/{}", self.sidx, self.elements.join("/"))
    }
}
