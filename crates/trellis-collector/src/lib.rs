//! Collection order for Trellis.
//!
//! Peers advertise components (an object's metadata or its content) that
//! this device does not have yet. Advertisements are queued in the
//! [`CollectorSequence`]; a [`CollectorIterator`] walks one store's queue
//! and decides what to fetch next.
//!
//! # Ordering
//!
//! Metadata is always yielded before content: content cannot be placed
//! until its object's position is known. Content is not collected into a
//! store that is over quota.

pub mod error;
pub mod filter;
pub mod iterator;
pub mod quota;
pub mod sequence;

pub use error::{CollectorError, CollectorResult};
pub use filter::{KnownVersionFilter, SkipFilter};
pub use iterator::{CollectorCursor, CollectorIterator, Phase};
pub use quota::{FixedQuota, NoQuota, QuotaCheck};
pub use sequence::{CollectorEntry, CollectorSequence};
