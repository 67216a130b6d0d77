//! Managed worker threads with cancel-and-join teardown.
//!
//! A [`ManagedThread`] owns a [`CancellationToken`] and an OS thread running
//! a user task. The task receives a [`CancellationHandle`] and is expected
//! to check it (or block in cancellation-aware waits) so that teardown can
//! interrupt it. Dropping the wrapper requests cancellation and then joins;
//! after the drop returns, the task is guaranteed to have returned.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::error;

use crate::cancellation::{CancellationHandle, CancellationToken};
use crate::condvar::{ConditionVariable, WaitOutcome};
use crate::errors::ThreadError;

/// Identifier of an OS thread.
pub type ThreadId = thread::ThreadId;

/// A named OS thread bound to a cancellation token.
///
/// The thread starts immediately on construction. A panic in the task body
/// is caught at the thread boundary, logged, and never propagated - it
/// cannot prevent the join on drop.
pub struct ManagedThread {
    name: String,
    token: CancellationToken,
    thread_id: ThreadId,
    join_handle: Option<JoinHandle<()>>,
}

impl ManagedThread {
    /// Spawns a named thread running `task` with a handle to the owned
    /// token.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadError::Spawn`] if the OS refuses to create the
    /// thread.
    pub fn spawn<F>(name: impl Into<String>, task: F) -> Result<Self, ThreadError>
    where
        F: FnOnce(&CancellationHandle) + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let handle = token.handle();

        let task_name = name.clone();
        let join_handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if let Err(e) = catch_unwind(AssertUnwindSafe(|| task(&handle))) {
                    error!("Thread '{}' task panicked: {:?}", task_name, e);
                }
            })
            .map_err(|source| ThreadError::Spawn {
                name: name.clone(),
                source,
            })?;
        let thread_id = join_handle.thread().id();

        Ok(Self {
            name,
            token,
            thread_id,
            join_handle: Some(join_handle),
        })
    }

    /// Returns the thread's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the identifier of the underlying OS thread.
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.thread_id
    }

    /// Returns a handle observing this thread's cancellation token.
    #[must_use]
    pub fn handle(&self) -> CancellationHandle {
        self.token.handle()
    }

    /// Returns whether the task has already returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Returns the name of the calling thread, if it has one.
    #[must_use]
    pub fn own_name() -> Option<String> {
        thread::current().name().map(String::from)
    }

    /// Returns the identifier of the calling thread.
    #[must_use]
    pub fn own_id() -> ThreadId {
        thread::current().id()
    }

    /// Blocks the calling thread for the full duration.
    pub fn sleep(duration: Duration) {
        thread::sleep(duration);
    }

    /// Blocks the calling thread for `duration`, returning early if
    /// `handle` is cancelled.
    ///
    /// Returns [`WaitOutcome::Cancelled`] when woken early and
    /// [`WaitOutcome::TimedOut`] when the full duration elapsed.
    pub fn sleep_cancellable(duration: Duration, handle: &CancellationHandle) -> WaitOutcome {
        let wakeups = ConditionVariable::new();
        let gate = Mutex::new(());
        let mut guard = gate.lock();
        wakeups.wait_for(&mut guard, duration, handle)
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(join_handle) = self.join_handle.take() {
            if join_handle.join().is_err() {
                error!("Thread '{}' terminated by panic", self.name);
            }
        }
        self.token.finalize();
    }
}

impl fmt::Display for ManagedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread: '{}'", self.name)
    }
}

impl fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThread")
            .field("name", &self.name)
            .field("state", &self.token.state())
            .field("finished", &self.is_finished())
            .finish()
    }
}
