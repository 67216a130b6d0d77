//! # Threadgear
//!
//! Cooperative-cancellation threading primitives.
//!
//! Threadgear provides the small set of building blocks needed to run
//! blocking work that can be interrupted cleanly:
//!
//! - **Cancellation tokens**: one source of truth per cancellable unit of
//!   work, with exactly-once callback delivery
//! - **Scoped subscriptions**: callback registrations bound to the stack
//!   frame that created them
//! - **Cancellation-aware waits**: condition-variable waits that end on a
//!   broadcast or on cancellation, whichever comes first, with no missed
//!   wakeups
//! - **Managed threads**: named worker threads that cancel and join on
//!   drop, so no thread outlives its owner
//!
//! ## Quick Start
//!
//! ```rust
//! use threadgear::prelude::*;
//! use std::time::Duration;
//!
//! let worker = ManagedThread::spawn("poller", |handle| {
//!     while !handle.is_cancelled() {
//!         // do a unit of work, then sleep until the next round or until
//!         // the owner tears us down
//!         ManagedThread::sleep_cancellable(Duration::from_secs(1), handle);
//!     }
//! })?;
//!
//! // Dropping the wrapper cancels the token and joins the thread.
//! drop(worker);
//! # Ok::<(), threadgear::errors::ThreadError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod condvar;
pub mod errors;
pub mod thread;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{
        CancellationHandle, CancellationToken, Subscription, TokenState,
    };
    pub use crate::condvar::{ConditionVariable, WaitOutcome};
    pub use crate::errors::ThreadError;
    pub use crate::thread::{ManagedThread, ThreadId};
}
