//! Object tree store and version tracking for Trellis.
//!
//! This crate owns the local replica's hierarchical object tree and the
//! counters that record how it changes:
//!
//! - [`ObjectTree`] -- object attributes ([`OA`]) and content attributes
//!   ([`CA`]), with the tree invariants enforced at every mutation
//! - [`VersionTracker`] -- per-component version vectors and tick parity
//! - [`Stores`] -- store registry and the store-deletion lifecycle
//! - [`PhysicalStorage`] -- contract for filesystem-visible side effects
//!
//! # Tree Invariants
//!
//! 1. Every object other than root and trash has exactly one parent in its
//!    store.
//! 2. `(parent, name)` is unique among siblings.
//! 3. The parent graph is acyclic and rooted at [`OID::ROOT`]; deleted
//!    objects hang under [`OID::TRASH`].
//!
//! Every mutation takes a [`Trans`]. Checks run before any write, and a
//! failed call leaves its transaction exactly as it found it.
//!
//! [`OID::ROOT`]: trellis_types::OID::ROOT
//! [`OID::TRASH`]: trellis_types::OID::TRASH
//! [`Trans`]: trellis_db::Trans

pub mod attr;
pub mod error;
pub mod name;
pub mod physical;
pub mod stores;
pub mod tree;
pub mod version;

pub use attr::{ResolvedPath, CA, OA};
pub use error::{TreeError, TreeResult};
pub use name::validate_name;
pub use physical::{EntryKind, MemoryStorage, NullStorage, PhysicalStorage};
pub use stores::{StoreDeletionOperator, StoreInfo, Stores};
pub use tree::{DeletePolicy, ObjectTree};
pub use version::VersionTracker;
