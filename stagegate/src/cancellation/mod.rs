//! Structured cancellation utilities.
//!
//! This module provides:
//! - CancellationToken for cooperative, awaitable cancellation
//! - CleanupGuard for drop-time cleanup

mod guard;
mod token;

pub use guard::CleanupGuard;
pub use token::{CancelCallback, CancellationToken};
