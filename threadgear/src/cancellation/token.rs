//! Cancellation token for cooperative cancellation.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::warn;

use super::handle::CancellationHandle;

/// A one-shot callback invoked when cancellation is requested.
pub type CancelCallback = Box<dyn FnOnce() + Send>;

/// Lifecycle state of a [`CancellationToken`].
///
/// The state only ever moves forward: `Active` to `CancelRequested` to
/// `Finalized`. Observers treat both of the latter as "cancelled".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No cancellation has been requested yet.
    Active,
    /// Cancellation has been requested; registered callbacks have fired.
    CancelRequested,
    /// The owning thread has been joined, or the token has been dropped.
    Finalized,
}

impl TokenState {
    const fn as_raw(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::CancelRequested => 1,
            Self::Finalized => 2,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Active,
            1 => Self::CancelRequested,
            _ => Self::Finalized,
        }
    }
}

/// Registered callbacks keyed by a monotonically increasing subscription id.
#[derive(Default)]
struct Registry {
    next_id: u64,
    callbacks: HashMap<u64, CancelCallback>,
}

impl Registry {
    fn insert(&mut self, callback: CancelCallback) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.callbacks.insert(id, callback);
        id
    }
}

/// State shared between a token and every handle derived from it.
pub(crate) struct TokenShared {
    state: AtomicU8,
    reason: Mutex<Option<String>>,
    registry: Mutex<Registry>,
}

impl TokenShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(TokenState::Active.as_raw()),
            reason: Mutex::new(None),
            registry: Mutex::new(Registry::default()),
        }
    }

    pub(crate) fn state(&self) -> TokenState {
        TokenState::from_raw(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state() != TokenState::Active
    }

    pub(crate) fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Flips `Active` to `CancelRequested` exactly once, then drains the
    /// registry and invokes every drained callback with no lock held.
    pub(crate) fn cancel(&self, reason: Option<String>) {
        if self
            .state
            .compare_exchange(
                TokenState::Active.as_raw(),
                TokenState::CancelRequested.as_raw(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        if let Some(reason) = reason {
            *self.reason.lock() = Some(reason);
        }

        let drained: Vec<CancelCallback> = {
            let mut registry = self.registry.lock();
            registry.callbacks.drain().map(|(_, cb)| cb).collect()
        };

        for callback in drained {
            Self::invoke_suppressed(callback);
        }
    }

    /// Registers a callback, or invokes it synchronously if cancellation has
    /// already been requested.
    ///
    /// The state check happens inside the registry critical section, so a
    /// registration either lands before the draining pass of [`cancel`] and
    /// is drained by it, or observes the cancelled state and fires here.
    /// Returns the subscription id, or `None` if the callback already fired.
    ///
    /// [`cancel`]: Self::cancel
    pub(crate) fn subscribe(&self, callback: CancelCallback) -> Option<u64> {
        let mut registry = self.registry.lock();
        if self.state.load(Ordering::SeqCst) != TokenState::Active.as_raw() {
            drop(registry);
            Self::invoke_suppressed(callback);
            return None;
        }
        Some(registry.insert(callback))
    }

    /// Removes a registration. No-op if cancellation already drained it.
    pub(crate) fn unsubscribe(&self, id: u64) {
        self.registry.lock().callbacks.remove(&id);
    }

    pub(crate) fn is_subscribed(&self, id: u64) -> bool {
        self.registry.lock().callbacks.contains_key(&id)
    }

    fn finalize(&self) {
        self.state
            .compare_exchange(
                TokenState::CancelRequested.as_raw(),
                TokenState::Finalized.as_raw(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok();
    }

    /// Invokes a callback, logging and suppressing any panic.
    pub(crate) fn invoke_suppressed(callback: CancelCallback) {
        if let Err(e) = catch_unwind(AssertUnwindSafe(callback)) {
            warn!("Cancellation callback panicked: {:?}", e);
        }
    }
}

/// A token for cooperative cancellation.
///
/// The token is the source of truth for one cancellable unit of work. It
/// hands out [`CancellationHandle`]s that observe its state and register
/// callbacks; requesting cancellation fires every registered callback
/// exactly once. Cancellation is idempotent - only the first reason is kept.
pub struct CancellationToken {
    shared: Arc<TokenShared>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(TokenShared::new()),
        }
    }

    /// Requests cancellation.
    ///
    /// This is idempotent. Registered callbacks are invoked with no internal
    /// lock held, so a callback may itself register or unregister without
    /// deadlocking. Panics in callbacks are logged and suppressed.
    pub fn cancel(&self) {
        self.shared.cancel(None);
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept.
    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        self.shared.cancel(Some(reason.into()));
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.shared.reason()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TokenState {
        self.shared.state()
    }

    /// Returns a handle bound to this token.
    #[must_use]
    pub fn handle(&self) -> CancellationHandle {
        CancellationHandle::new(Arc::downgrade(&self.shared))
    }

    /// Marks the token as fully torn down after its owner has joined.
    pub(crate) fn finalize(&self) {
        self.shared.finalize();
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancellationToken {
    fn drop(&mut self) {
        // A token dropped while still active behaves like a cancelled one,
        // so no registered callback is silently lost.
        self.shared.cancel(None);
        self.shared.finalize();
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("state", &self.state())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
        assert_eq!(token.state(), TokenState::Active);
    }

    #[test]
    fn test_cancel_sets_state() {
        let token = CancellationToken::new();
        token.cancel_with_reason("User requested");

        assert!(token.is_cancelled());
        assert_eq!(token.state(), TokenState::CancelRequested);
        assert_eq!(token.reason(), Some("User requested".to_string()));
    }

    #[test]
    fn test_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel_with_reason("First reason");
        token.cancel_with_reason("Second reason");

        // First reason wins
        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_cancel_without_reason() {
        let token = CancellationToken::new();
        token.cancel();

        assert!(token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_callback_fires_on_cancel() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = counter.clone();
        let _subscription = token.handle().on_cancelled(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 0);

        token.cancel();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_after_cancel_fires_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let subscription = token.handle().on_cancelled(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!subscription.is_active());
    }

    #[test]
    fn test_callback_fires_exactly_once() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = token.handle();

        let c1 = counter.clone();
        let _s1 = handle.on_cancelled(move || {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = counter.clone();
        let _s2 = handle.on_cancelled(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        token.cancel();
        token.cancel();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropped_subscription_not_invoked() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = counter.clone();
        let subscription = token.handle().on_cancelled(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(subscription.is_active());
        drop(subscription);

        token.cancel();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_after_cancel_is_noop() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = counter.clone();
        let subscription = token.handle().on_cancelled(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        token.cancel();
        drop(subscription);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_panic_suppressed() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let _s1 = token.handle().on_cancelled(|| {
            panic!("Intentional panic");
        });
        let counter_clone = counter.clone();
        let _s2 = token.handle().on_cancelled(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Should not panic, and the other callback still fires
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_subscribe_reentrantly() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = token.handle();

        let reentrant_handle = handle.clone();
        let counter_clone = counter.clone();
        let _subscription = handle.on_cancelled(move || {
            // Registers against an already-cancelled token, so this inner
            // callback fires synchronously
            let inner = reentrant_handle.on_cancelled(move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            });
            assert!(!inner.is_active());
        });

        token.cancel();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_outlives_token() {
        let token = CancellationToken::new();
        let handle = token.handle();
        drop(token);

        assert!(handle.is_cancelled());
        assert_eq!(handle.state(), TokenState::Finalized);

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let subscription = handle.on_cancelled(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!subscription.is_active());
    }

    #[test]
    fn test_token_drop_fires_callbacks() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = counter.clone();
        let _subscription = token.handle().on_cancelled(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        drop(token);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_cancel_single_winner() {
        let token = Arc::new(CancellationToken::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = counter.clone();
        let _subscription = token.handle().on_cancelled(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let token = token.clone();
                thread::spawn(move || {
                    token.cancel_with_reason(format!("caller {i}"));
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let reason = token.reason().unwrap();
        assert!(reason.starts_with("caller "));
    }
}
