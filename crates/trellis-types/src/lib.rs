//! Foundation types for Trellis.
//!
//! This crate provides the identity, versioning, and classification types
//! shared by every other Trellis crate.
//!
//! # Key Types
//!
//! - [`OID`] -- object identifier, unique within a store
//! - [`SIndex`] -- local integer handle for a store
//! - [`SOID`] -- store-qualified object identifier
//! - [`Tick`] -- per-object change counter with alias/non-alias parity
//! - [`Version`] -- version vector mapping devices to ticks
//! - [`Lts`] -- logical timestamp assigned by the remote authority
//! - [`ObjectType`], [`ComponentKind`], [`KIndex`] -- object classification

pub mod error;
pub mod ids;
pub mod kind;
pub mod tick;
pub mod version;

pub use error::TypeError;
pub use ids::{DeviceId, SIndex, OID, SOID};
pub use kind::{ComponentKind, ContentHash, KIndex, ObjectType};
pub use tick::{Lts, Tick};
pub use version::Version;
