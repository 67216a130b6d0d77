//! Cancellation-aware condition variable.
//!
//! [`ConditionVariable`] layers cooperative cancellation on top of standard
//! monitor-wait semantics: a wait returns when the condition variable is
//! broadcast *or* when the waiter's [`CancellationHandle`] is cancelled,
//! whichever happens first. The caller's lock is released while blocked and
//! re-acquired before the wait returns.
//!
//! Internally each condition variable owns a small monitor: a generation
//! counter behind its own mutex, paired with a `parking_lot::Condvar`. A
//! broadcast bumps the generation under the monitor lock and notifies all
//! waiters. The cancellation callback registered for the scope of a wait
//! captures the monitor by `Arc` and performs exactly such a broadcast, so
//! it can never dangle and never needs the caller's lock.
//!
//! A wait snapshots the generation before registering its cancellation
//! callback, and the block/recheck runs under the same monitor lock every
//! broadcast takes. A cancellation arriving at any point therefore either
//! fires synchronously at registration, bumps the generation before the
//! block check, or notifies the already-blocked waiter - there is no window
//! in which a wakeup can be missed.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cancellation::CancellationHandle;

/// How a timed wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The condition variable was broadcast.
    Signalled,
    /// The waiter's cancellation handle was cancelled.
    Cancelled,
    /// The timeout elapsed.
    TimedOut,
}

impl WaitOutcome {
    /// Returns true if the wait ended by broadcast.
    #[must_use]
    pub fn is_signalled(self) -> bool {
        matches!(self, Self::Signalled)
    }

    /// Returns true if the wait ended by cancellation.
    #[must_use]
    pub fn is_cancelled(self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if the wait ended by timeout.
    #[must_use]
    pub fn is_timed_out(self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

#[derive(Default)]
struct Monitor {
    generation: Mutex<u64>,
    wakeups: Condvar,
}

impl Monitor {
    fn broadcast(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.wakeups.notify_all();
    }
}

/// A wait primitive that can be woken by a broadcast or by cancellation.
///
/// Cancellation does not imply the awaited condition is true; after any
/// wait returns, the caller re-checks its condition and the handle's
/// cancelled state to decide whether to proceed or unwind.
#[derive(Default)]
pub struct ConditionVariable {
    monitor: Arc<Monitor>,
}

impl ConditionVariable {
    /// Creates a new condition variable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes every current waiter.
    pub fn broadcast(&self) {
        self.monitor.broadcast();
    }

    /// Blocks until the condition variable is broadcast or `handle` is
    /// cancelled.
    ///
    /// `guard` must belong to the lock protecting the caller's condition.
    /// It is released while blocked and re-acquired before returning. The
    /// caller distinguishes a broadcast from a cancellation-induced wakeup
    /// via `handle.is_cancelled()`.
    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>, handle: &CancellationHandle) {
        let begin = *self.monitor.generation.lock();
        let monitor = Arc::clone(&self.monitor);
        let _wake = handle.on_cancelled(move || monitor.broadcast());

        MutexGuard::unlocked(guard, || {
            let mut generation = self.monitor.generation.lock();
            while *generation == begin && !handle.is_cancelled() {
                self.monitor.wakeups.wait(&mut generation);
            }
        });
    }

    /// Blocks while `condition` returns true, unless `handle` is cancelled.
    ///
    /// The condition is re-evaluated with the caller's lock held after every
    /// wakeup. On return either the condition is false, or the handle is
    /// cancelled and the condition may still be true - check the handle.
    pub fn wait_while<T, F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        mut condition: F,
        handle: &CancellationHandle,
    ) where
        F: FnMut(&mut T) -> bool,
    {
        let monitor = Arc::clone(&self.monitor);
        let _wake = handle.on_cancelled(move || monitor.broadcast());

        loop {
            if !condition(&mut *guard) || handle.is_cancelled() {
                return;
            }
            let begin = *self.monitor.generation.lock();
            MutexGuard::unlocked(guard, || {
                let mut generation = self.monitor.generation.lock();
                while *generation == begin && !handle.is_cancelled() {
                    self.monitor.wakeups.wait(&mut generation);
                }
            });
        }
    }

    /// Blocks until a broadcast, cancellation, or the timeout - whichever
    /// comes first.
    ///
    /// When cancellation and another trigger race, the outcome reports
    /// [`WaitOutcome::Cancelled`].
    pub fn wait_for<T>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        timeout: Duration,
        handle: &CancellationHandle,
    ) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let begin = *self.monitor.generation.lock();
        let monitor = Arc::clone(&self.monitor);
        let _wake = handle.on_cancelled(move || monitor.broadcast());

        let mut outcome = WaitOutcome::Signalled;
        MutexGuard::unlocked(guard, || {
            let mut generation = self.monitor.generation.lock();
            loop {
                if handle.is_cancelled() {
                    outcome = WaitOutcome::Cancelled;
                    return;
                }
                if *generation != begin {
                    outcome = WaitOutcome::Signalled;
                    return;
                }
                if self
                    .monitor
                    .wakeups
                    .wait_until(&mut generation, deadline)
                    .timed_out()
                {
                    outcome = if handle.is_cancelled() {
                        WaitOutcome::Cancelled
                    } else {
                        WaitOutcome::TimedOut
                    };
                    return;
                }
            }
        });
        outcome
    }
}

impl std::fmt::Debug for ConditionVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionVariable")
            .field("generation", &*self.monitor.generation.lock())
            .finish()
    }
}
