//! Error types for the threadgear primitives.
//!
//! Cancellation is deliberately absent here: it is a normal control-flow
//! outcome of a wait, reported through the handle's state, never as an
//! error.

use thiserror::Error;

/// The error type for threadgear operations.
#[derive(Debug, Error)]
pub enum ThreadError {
    /// The OS refused to create a thread.
    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        /// The requested thread name.
        name: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}
