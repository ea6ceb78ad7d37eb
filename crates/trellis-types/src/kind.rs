use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of object in the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectType {
    File,
    Dir,
    /// Mount point for a child store.
    Anchor,
}

impl ObjectType {
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Dir)
    }

    pub fn is_anchor(&self) -> bool {
        matches!(self, Self::Anchor)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Dir => write!(f, "dir"),
            Self::Anchor => write!(f, "anchor"),
        }
    }
}

/// Component of an object that can be versioned and fetched independently.
///
/// Metadata always sorts before content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentKind {
    Meta,
    Content,
}

impl ComponentKind {
    pub fn is_meta(&self) -> bool {
        matches!(self, Self::Meta)
    }

    /// Stable one-byte code, used in persisted keys.
    pub fn code(&self) -> u8 {
        match self {
            Self::Meta => 0,
            Self::Content => 1,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Meta => write!(f, "meta"),
            Self::Content => write!(f, "content"),
        }
    }
}

/// Content branch index. [`KIndex::MASTER`] is canonical; any other branch
/// is an unresolved content conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KIndex(u32);

impl KIndex {
    pub const MASTER: KIndex = KIndex(0);

    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn is_master(&self) -> bool {
        *self == Self::MASTER
    }
}

/// BLAKE3 hash of file content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", hex::encode(&self.0[..4]))
    }
}
