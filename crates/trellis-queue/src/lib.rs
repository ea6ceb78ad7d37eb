//! Execution model and queue machinery for Trellis.
//!
//! All mutation of persistent state happens while holding the core lock
//! ([`CoreLock`]). Work that must wait, for network I/O or for budget,
//! releases the core through [`CoreGuard::pause`] and reacquires it before
//! touching state again.
//!
//! - [`TokenManager`] -- bounded per-category concurrency budgets
//! - [`ExponentialRetry`] -- capped exponential backoff for named work
//! - [`QueueDriver`] -- at-least-once processing of a [`QueueBackend`]

pub mod core;
pub mod driver;
pub mod error;
pub mod retry;
pub mod token;

pub use crate::core::{CoreGuard, CoreLock};
pub use driver::{QueueBackend, QueueContext, QueueDriver, ScanControl};
pub use error::{QueueError, QueueResult};
pub use retry::{ExponentialRetry, RetryConfig};
pub use token::{Cat, Token, TokenConfig, TokenManager};
