//! Cooperative cancellation primitives.
//!
//! This module provides:
//! - `CancellationToken` as the cancellation source of truth
//! - `CancellationHandle` as a cloneable view for observers
//! - `Subscription` for scoped, exactly-once callback registration

mod handle;
mod token;

pub use handle::{CancellationHandle, Subscription};
pub use token::{CancelCallback, CancellationToken, TokenState};
